//! Connection capability trait and its closed set of variants.
//!
//! A [`Connection`] moves opaque wire text; it knows nothing about
//! envelopes or routing. Three variants exist: TCP stream connections,
//! paired in-process callback connections, and the self-paired loopback
//! used by the control plane. All are safe for one concurrent reader plus
//! one concurrent writer — the controller never reads payloads, and the
//! dispatch protocol guarantees a single router owns a connection's read
//! side at a time.

use std::fmt;
use std::time::Duration;

pub mod callback;
pub mod descriptor;
pub mod loopback;
pub mod tcp;

pub use callback::{callback_pair, CallbackConnection};
pub use descriptor::ConnectionDescriptor;
pub use loopback::LoopbackConnection;
pub use tcp::TcpConnection;

/// Capability set every transport endpoint provides.
pub trait Connection: Send + Sync + fmt::Debug {
    /// Sends one wire message. Returns `false` when the peer is gone or the
    /// write failed.
    fn send(&self, message: &str) -> bool;

    /// Takes the next complete received message, or `None` when nothing is
    /// waiting.
    fn receive(&self) -> Option<String>;

    /// `true` when a complete message is waiting to be received.
    fn is_message_available(&self) -> bool;

    /// `true` until the peer disconnects or [`Connection::disconnect`] is
    /// called.
    fn is_connected(&self) -> bool;

    /// Closes the connection. Idempotent.
    fn disconnect(&self);
}

/// Idle-timeout policy for a connection registered with the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleTimeout {
    /// Use the controller's configured default sliding timeout.
    Default,
    /// Never expire (long-lived service and control connections).
    Never,
    /// Expire after the given idle duration, refreshed on traffic.
    After(Duration),
}

impl IdleTimeout {
    /// Maps the wire-level convention to a policy: `0` means the default
    /// timeout, negative values mean never expire.
    #[must_use]
    pub fn from_secs(seconds: i64) -> Self {
        match seconds {
            0 => Self::Default,
            s if s < 0 => Self::Never,
            s => Self::After(Duration::from_secs(s.unsigned_abs())),
        }
    }
}
