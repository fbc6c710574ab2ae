//! Shared error taxonomy across switchboard crates.

use thiserror::Error;

use crate::envelope::DecodeError;

/// Shared result type.
pub type Result<T> = std::result::Result<T, SwitchboardError>;

/// Unified error type used by the core codec and the server runtime.
///
/// Per-message failures (`Decode`, `UnregisteredProvider`, `InvalidService`)
/// are recovered locally and reflected to the sender as error envelopes;
/// they never terminate a worker. `TransportDisconnected` and
/// `ExpiredIdleConnection` describe connection teardown and produce no
/// reply to the torn-down side.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SwitchboardError {
    /// The wire text never parsed into an envelope.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// No provider is registered for the requested module.
    #[error("unregistered provider: {0}")]
    UnregisteredProvider(String),

    /// The module is registered but does not offer the requested service.
    #[error("invalid service: {module}/{service}")]
    InvalidService {
        /// Registered module name.
        module: String,
        /// Unknown service name.
        service: String,
    },

    /// A synchronous-style call exhausted its bounded retry budget without
    /// a reply.
    #[error("provider gave no response within {tries} polls")]
    ProviderTimeout {
        /// Number of receive polls attempted.
        tries: u32,
    },

    /// The peer closed the connection.
    #[error("transport disconnected")]
    TransportDisconnected,

    /// The sliding idle timeout elapsed while the connection was not being
    /// processed.
    #[error("session timed out")]
    ExpiredIdleConnection,
}
