//! Switchboard Server — connection lifecycle controller, router pool,
//! service registry, and the transports that feed them.

mod builtin;
pub mod client;
pub mod config;
pub mod connection;
pub mod controller;
pub mod queue;
pub mod registry;
mod router;
pub mod transport;

pub use client::blocking_request;
pub use config::ControllerConfig;
pub use connection::{
    callback_pair, CallbackConnection, Connection, ConnectionDescriptor, IdleTimeout,
    LoopbackConnection, TcpConnection,
};
pub use controller::Controller;
pub use queue::ActiveQueue;
pub use registry::{RegisterOutcome, RegistryError, ServiceRegistration, ServiceRegistry};
pub use transport::{CallbackTransport, TcpTransport, Transport};
