//! In-process callback transport.

use std::sync::Arc;

use tracing::debug;

use crate::connection::{callback_pair, CallbackConnection, IdleTimeout};
use crate::controller::Controller;

use super::Transport;

/// Pairs in-process endpoints with the controller.
///
/// The controller-side endpoint is registered without an expiration:
/// callback connections back long-lived intra-process services, not
/// remote sessions with idle timeouts.
#[derive(Debug, Default)]
pub struct CallbackTransport;

impl CallbackTransport {
    /// Creates the transport.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Creates a connected endpoint pair, hands one end to the controller,
    /// and returns the caller's end.
    pub fn connect(&self, controller: &Controller) -> CallbackConnection {
        let (user_end, controller_end) = callback_pair();
        let id = controller.add_connection(Arc::new(controller_end), IdleTimeout::Never);
        debug!(id, "callback connection added");
        user_end
    }
}

impl Transport for CallbackTransport {
    fn name(&self) -> &'static str {
        "callback"
    }

    fn is_active(&self) -> bool {
        true
    }

    fn shutdown(&self) {}
}

#[cfg(test)]
mod tests {
    use crate::config::ControllerConfig;
    use crate::connection::Connection;

    use super::*;

    #[test]
    fn connect_registers_the_peer_end() {
        let controller = Controller::new(ControllerConfig::default());
        let before = controller.connection_count();

        let transport = CallbackTransport::new();
        let endpoint = transport.connect(&controller);

        assert_eq!(controller.connection_count(), before + 1);
        assert!(endpoint.is_connected());
        assert!(endpoint.send("{}"));
    }
}
