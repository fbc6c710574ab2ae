//! Transport-level collaborators: the pieces that produce connections.
//!
//! A [`Transport`] owns whatever machinery accepts or pairs connections
//! (a listening socket and its monitor thread, or in-process pairing) and
//! hands every new connection to the controller via `add_connection`.
//! Routing never touches transports; the controller only starts and stops
//! them.

pub mod callback;
pub mod tcp;

pub use callback::CallbackTransport;
pub use tcp::TcpTransport;

/// A registered transport collaborator.
pub trait Transport: Send + Sync {
    /// Short transport kind name, used in logs.
    fn name(&self) -> &'static str;

    /// `true` while the transport can still produce connections.
    fn is_active(&self) -> bool;

    /// Stops producing connections and joins any monitor thread.
    /// Idempotent.
    fn shutdown(&self);
}
