//! Synchronous request convenience for clients and tests.

use std::thread;
use std::time::Duration;

use switchboard_core::{Envelope, SwitchboardError};

use crate::connection::Connection;

/// Sends a request and polls for the reply under a bounded retry budget.
///
/// Each poll that finds nothing sleeps `poll_interval`; after `tries`
/// empty polls the call gives up with
/// [`SwitchboardError::ProviderTimeout`]. Intended for callers that want a
/// blocking call on top of the correlation-routed fabric.
///
/// # Errors
///
/// [`SwitchboardError::TransportDisconnected`] when the send fails,
/// [`SwitchboardError::Decode`] when the reply is malformed, and
/// [`SwitchboardError::ProviderTimeout`] when the budget runs out.
pub fn blocking_request(
    connection: &dyn Connection,
    request: &Envelope,
    tries: u32,
    poll_interval: Duration,
) -> Result<Envelope, SwitchboardError> {
    if !connection.send(&request.encode()) {
        return Err(SwitchboardError::TransportDisconnected);
    }

    for _ in 0..tries {
        if let Some(raw) = connection.receive() {
            return Envelope::decode(&raw).map_err(Into::into);
        }
        thread::sleep(poll_interval);
    }
    Err(SwitchboardError::ProviderTimeout { tries })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use switchboard_core::messages::no_op_request;

    use crate::config::ControllerConfig;
    use crate::connection::{callback_pair, Connection, IdleTimeout};
    use crate::controller::Controller;

    use super::*;

    #[test]
    fn round_trips_against_a_running_controller() {
        let controller = Arc::new(Controller::new(ControllerConfig {
            sweep_interval: Duration::from_millis(5),
            poll_interval: Duration::from_millis(5),
            ..ControllerConfig::default()
        }));
        controller.start();

        let (client, controller_end) = callback_pair();
        controller.add_connection(Arc::new(controller_end), IdleTimeout::Never);

        let reply =
            blocking_request(&client, &no_op_request(), 200, Duration::from_millis(10)).unwrap();
        assert!(reply.body_field("status").is_some());

        controller.stop();
        controller.join();
    }

    #[test]
    fn times_out_when_nobody_answers() {
        let (client, _silent_peer) = callback_pair();
        let err = blocking_request(
            &client,
            &no_op_request(),
            3,
            Duration::from_millis(1),
        )
        .unwrap_err();
        assert_eq!(err, SwitchboardError::ProviderTimeout { tries: 3 });
    }

    #[test]
    fn disconnected_transport_fails_fast() {
        let (client, peer) = callback_pair();
        peer.disconnect();
        let err = blocking_request(
            &client,
            &no_op_request(),
            3,
            Duration::from_millis(1),
        )
        .unwrap_err();
        assert_eq!(err, SwitchboardError::TransportDisconnected);
    }
}
