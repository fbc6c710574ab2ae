//! Dispatch workers: drain queued connections and route their messages.
//!
//! A router pops a descriptor with the dedup set held (two-phase pop), so
//! no second router can touch the same connection until it releases. It
//! then drains every currently-receivable message and routes each one:
//! responses go back by correlation id, requests go to the registered
//! provider with the sender's descriptor id stamped in as `client-id`.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use switchboard_core::messages::{
    decode_error_reply, error_reply, ERROR_INVALID_SERVICE, ERROR_UNREGISTERED_PROVIDER,
};
use switchboard_core::Envelope;

use crate::builtin;
use crate::connection::{Connection, ConnectionDescriptor};
use crate::controller::Controller;

/// Spawns one router worker thread.
pub(crate) fn spawn_router(controller: Arc<Controller>) -> JoinHandle<()> {
    thread::spawn(move || run_router(&controller))
}

fn run_router(controller: &Arc<Controller>) {
    let poll_interval = controller.config().poll_interval;
    while !controller.is_stopped() {
        let Some(descriptor) = controller.active_queue().pop_timeout(poll_interval, false)
        else {
            continue;
        };
        drain_connection(controller, &descriptor);
        descriptor.set_in_flight(false);
        controller.active_queue().release(&descriptor);
    }
    debug!("router exiting");
}

/// Processes every message currently receivable on the descriptor's
/// connection, in receipt order.
fn drain_connection(controller: &Controller, descriptor: &Arc<ConnectionDescriptor>) {
    while !controller.is_stopped() {
        let Some(raw) = descriptor.connection().receive() else {
            break;
        };
        route_message(controller, descriptor, &raw);
    }
}

/// Routes one wire message from `sender`.
///
/// Every failure is reflected to the sender as an error envelope; nothing
/// here terminates the worker.
pub(crate) fn route_message(
    controller: &Controller,
    sender: &Arc<ConnectionDescriptor>,
    raw: &str,
) {
    let envelope = match Envelope::decode(raw) {
        Ok(envelope) => envelope,
        Err(err) => {
            debug!(sender = sender.id(), reason = %err.reason, "undecodable message");
            sender.connection().send(&decode_error_reply(&err).encode());
            return;
        }
    };

    if !envelope.is_supported_version() {
        // Accepted looseness: mismatched versions are still routed.
        debug!(
            sender = sender.id(),
            version = envelope.protocol_version,
            "unsupported protocol version; routing anyway"
        );
    }

    if envelope.is_response() {
        forward_response(controller, &envelope, raw);
    } else {
        route_request(controller, sender, envelope);
    }
}

/// Forwards a response envelope verbatim to the awaiting connection.
///
/// Responses to a vanished client are dropped, not retried: the requester
/// is presumed gone.
fn forward_response(controller: &Controller, envelope: &Envelope, raw: &str) {
    let Ok(client_id) = u64::try_from(envelope.client_id) else {
        return;
    };
    let target = controller
        .get_connection(client_id)
        .filter(|descriptor| descriptor.connection().is_connected());
    match target {
        Some(descriptor) => {
            if !descriptor.connection().send(raw) {
                warn!(client_id, "response delivery failed; client dropped");
            }
        }
        None => warn!(client_id, "response dropped; awaiting client is gone"),
    }
}

fn route_request(controller: &Controller, sender: &Arc<ConnectionDescriptor>, mut envelope: Envelope) {
    let Some(registration) = controller.get_provider(&envelope.module) else {
        debug!(module = %envelope.module, "no provider registered");
        sender
            .connection()
            .send(&error_reply(&envelope, ERROR_UNREGISTERED_PROVIDER).encode());
        return;
    };

    if !registration.has_service(&envelope.service) {
        debug!(
            module = %envelope.module,
            service = %envelope.service,
            "service not registered"
        );
        sender
            .connection()
            .send(&error_reply(&envelope, ERROR_INVALID_SERVICE).encode());
        return;
    }

    // Stamp the correlation id so the provider's reply finds its way back.
    envelope.client_id = i64::try_from(sender.id()).unwrap_or(i64::MAX);

    if registration.is_builtin() {
        builtin::handle_request(controller, &registration, &envelope, sender);
    } else if !registration.descriptor().connection().send(&envelope.encode()) {
        warn!(
            module = %envelope.module,
            provider_id = registration.descriptor().id(),
            "request forward failed; provider connection is dead"
        );
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
