//! System-generated message factories and control-plane payloads.
//!
//! Every reply the fabric itself produces (status, error, disconnect,
//! shutdown) is built here so the wire shapes stay in one place. Status and
//! error replies echo the full original envelope under `original-message`,
//! letting the sender match a reply to the request that caused it without
//! relying on correlation state.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::envelope::{DecodeError, Envelope, PROTOCOL_VERSION};

/// Module name of the built-in control plane.
pub const BUILTIN_MODULE: &str = "Builtin";

/// Liveness no-op control service.
pub const SVC_NO_OP: &str = "NoOp";
/// Controller shutdown control service.
pub const SVC_SHUTDOWN: &str = "Shutdown";
/// Provider registration control service.
pub const SVC_REGISTER_SERVICE: &str = "RegisterService";
/// Service name used on server-initiated disconnect notices.
pub const SVC_DISCONNECT: &str = "Disconnect";

/// Error text sent when no provider is registered for a request's module.
pub const ERROR_UNREGISTERED_PROVIDER: &str = "Unregistered provider";
/// Error text sent when the module is known but the service is not.
pub const ERROR_INVALID_SERVICE: &str = "Invalid service";
/// Error text sent when a control payload fails to parse.
pub const ERROR_PARSE: &str = "Parse error";

/// Disconnect reason for idle connections past their sliding timeout.
pub const REASON_SESSION_TIMEOUT: &str = "Session timed out.";
/// Disconnect reason sent to a provider replaced by a newer registration.
pub const REASON_SUPERSEDED: &str = "Superseded by a new service registration.";

// ---------------------------------------------------------------------------
// Reply factories
// ---------------------------------------------------------------------------

fn reply_to(original: &Envelope) -> Envelope {
    Envelope {
        protocol_version: PROTOCOL_VERSION,
        module: original.module.clone(),
        service: original.service.clone(),
        client_id: original.client_id,
        body: json!({}),
    }
}

/// Builds a status reply echoing the original envelope.
#[must_use]
pub fn status_reply(original: &Envelope, status: &str) -> Envelope {
    let mut reply = reply_to(original);
    reply.set_body_field("status", json!(status));
    reply.set_body_field("original-message", original_as_value(original));
    reply
}

/// Builds an error reply echoing the original envelope.
#[must_use]
pub fn error_reply(original: &Envelope, error: &str) -> Envelope {
    let mut reply = reply_to(original);
    reply.set_body_field("error", json!(error));
    reply.set_body_field("original-message", original_as_value(original));
    reply
}

/// Builds the error reply for input that never decoded into an envelope.
///
/// A synthetic original carrying the raw text is echoed so the sender can
/// recognize which message was rejected.
#[must_use]
pub fn decode_error_reply(error: &DecodeError) -> Envelope {
    let mut original = Envelope::request("", "");
    original.set_body_field("raw-message", json!(error.raw));
    error_reply(&original, &format!("{ERROR_PARSE}: {}", error.reason))
}

/// Builds a server-initiated disconnect notice.
#[must_use]
pub fn disconnect_notice(reason: &str) -> Envelope {
    let mut notice = Envelope::request(BUILTIN_MODULE, SVC_DISCONNECT);
    notice.set_body_field("disconnect-reason", json!(reason));
    notice
}

/// Builds the shutdown notice pushed to providers during teardown. Also the
/// request shape a client sends to ask for shutdown.
#[must_use]
pub fn shutdown_notice() -> Envelope {
    Envelope::request(BUILTIN_MODULE, SVC_SHUTDOWN)
}

/// Builds a keepalive request.
#[must_use]
pub fn no_op_request() -> Envelope {
    Envelope::request(BUILTIN_MODULE, SVC_NO_OP)
}

fn original_as_value(original: &Envelope) -> Value {
    // Envelope always serializes to a Value; see Envelope::encode.
    serde_json::to_value(original).expect("envelope serialization is infallible")
}

// ---------------------------------------------------------------------------
// RegisterService payload
// ---------------------------------------------------------------------------

/// Body payload of a `Builtin/RegisterService` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterServicePayload {
    /// Module name the sender wants to provide.
    #[serde(rename = "provider-name")]
    pub provider_name: String,
    /// Service names offered under that module.
    pub services: Vec<String>,
}

impl RegisterServicePayload {
    /// Parses a request body into a registration payload.
    ///
    /// # Errors
    ///
    /// Returns the parser's diagnostic when the body does not match the
    /// payload shape.
    pub fn parse(body: &Value) -> Result<Self, String> {
        serde_json::from_value(body.clone()).map_err(|err| err.to_string())
    }
}

/// Builds a `Builtin/RegisterService` request for the given provider.
#[must_use]
pub fn register_service_request(provider_name: &str, services: &[&str]) -> Envelope {
    let mut request = Envelope::request(BUILTIN_MODULE, SVC_REGISTER_SERVICE);
    request.set_body_field("provider-name", json!(provider_name));
    request.set_body_field("services", json!(services));
    request
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
