//! Built-in control-plane provider (module `Builtin`).
//!
//! Runs inline on the router thread that dispatched the request and emits
//! its replies through the provider's loopback connection. The loopback
//! echoes them back to the controller, which queues it like any other
//! connection with traffic; a router then routes the reply to the
//! requester by correlation id. Control messages therefore take the exact
//! dispatch path user services do.

use std::sync::Arc;

use tracing::{info, warn};

use switchboard_core::messages::{
    error_reply, status_reply, ERROR_INVALID_SERVICE, ERROR_PARSE, SVC_NO_OP,
    SVC_REGISTER_SERVICE, SVC_SHUTDOWN,
};
use switchboard_core::{Envelope, RegisterServicePayload};

use crate::connection::{Connection, ConnectionDescriptor};
use crate::controller::Controller;
use crate::registry::ServiceRegistration;

const STATUS_NO_OP: &str = "Did nothing, just like you asked.";
const STATUS_SHUTDOWN: &str = "Server shutting down now...";
const STATUS_SERVICES_ADDED: &str = "Services added";
const ERROR_RESERVED_NAME: &str = "Reserved provider name";

/// Handles a control-plane request already stamped with the sender's
/// correlation id.
pub(crate) fn handle_request(
    controller: &Controller,
    registration: &ServiceRegistration,
    request: &Envelope,
    sender: &Arc<ConnectionDescriptor>,
) {
    let reply = match request.service.as_str() {
        SVC_NO_OP => status_reply(request, STATUS_NO_OP),
        SVC_SHUTDOWN => {
            info!(requested_by = sender.id(), "shutdown requested");
            let reply = status_reply(request, STATUS_SHUTDOWN);
            controller.stop();
            reply
        }
        SVC_REGISTER_SERVICE => handle_register_service(controller, request, sender),
        _ => error_reply(request, ERROR_INVALID_SERVICE),
    };
    registration.descriptor().connection().send(&reply.encode());
}

fn handle_register_service(
    controller: &Controller,
    request: &Envelope,
    sender: &Arc<ConnectionDescriptor>,
) -> Envelope {
    let payload = match RegisterServicePayload::parse(&request.body) {
        Ok(payload) => payload,
        Err(reason) => {
            warn!(sender = sender.id(), reason = %reason, "bad registration payload");
            return error_reply(request, ERROR_PARSE);
        }
    };

    match controller.register_provider(&payload.provider_name, Arc::clone(sender), payload.services)
    {
        Ok(()) => {
            info!(
                provider = %payload.provider_name,
                id = sender.id(),
                "provider registered"
            );
            status_reply(request, STATUS_SERVICES_ADDED)
        }
        Err(err) => {
            warn!(
                provider = %payload.provider_name,
                id = sender.id(),
                error = %err,
                "registration rejected"
            );
            error_reply(request, ERROR_RESERVED_NAME)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
