//! Wire envelope codec for the switchboard protocol.
//!
//! Envelopes are self-describing JSON documents with kebab-case field names:
//!
//! ```json
//! {
//!   "protocol-version": 1000,
//!   "module":           "Echo",
//!   "service":          "Go",
//!   "client-id":        -1,
//!   "body":             { "a": 1 }
//! }
//! ```
//!
//! `client-id` is the correlation id: `-1` marks a fresh request, any value
//! `>= 0` addresses the connection descriptor awaiting the response. The
//! codec is stateless; decoding either yields a structurally valid envelope
//! or a [`DecodeError`] carrying the raw text for error reflection.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Protocol version understood by this implementation.
pub const PROTOCOL_VERSION: i64 = 1000;

/// Sentinel `client-id` marking an envelope as a request rather than a
/// response.
pub const REQUEST_CLIENT_ID: i64 = -1;

fn empty_body() -> Value {
    Value::Object(Map::new())
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// An addressed message: the unit every router and provider exchanges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Protocol version the sender speaks. See [`PROTOCOL_VERSION`].
    #[serde(rename = "protocol-version")]
    pub protocol_version: i64,
    /// Logical service group the message is addressed to.
    pub module: String,
    /// Operation name within the module.
    pub service: String,
    /// Correlation id: `-1` = request, `>= 0` = descriptor id awaiting this
    /// response.
    #[serde(rename = "client-id")]
    pub client_id: i64,
    /// Nested payload with arbitrary fields. Defaults to an empty object
    /// when absent on the wire.
    #[serde(default = "empty_body")]
    pub body: Value,
}

impl Envelope {
    /// Creates a request envelope (current protocol version, `client-id`
    /// of `-1`, empty body).
    #[must_use]
    pub fn request(module: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            module: module.into(),
            service: service.into(),
            client_id: REQUEST_CLIENT_ID,
            body: empty_body(),
        }
    }

    /// `true` when `client-id` marks this envelope as a fresh request.
    #[must_use]
    pub fn is_request(&self) -> bool {
        self.client_id < 0
    }

    /// `true` when `client-id` addresses an awaiting connection.
    #[must_use]
    pub fn is_response(&self) -> bool {
        self.client_id >= 0
    }

    /// Whether the sender's protocol version matches [`PROTOCOL_VERSION`].
    ///
    /// Routing does not reject mismatches; callers decide whether to act on
    /// this.
    #[must_use]
    pub fn is_supported_version(&self) -> bool {
        self.protocol_version == PROTOCOL_VERSION
    }

    /// Sets a field in the body object, creating the object if the body was
    /// not one.
    pub fn set_body_field(&mut self, key: impl Into<String>, value: Value) {
        if !self.body.is_object() {
            self.body = empty_body();
        }
        if let Some(map) = self.body.as_object_mut() {
            map.insert(key.into(), value);
        }
    }

    /// Reads a field from the body object, if present.
    #[must_use]
    pub fn body_field(&self, key: &str) -> Option<&Value> {
        self.body.as_object().and_then(|map| map.get(key))
    }

    /// Encodes the envelope to its wire form. Total and deterministic.
    #[must_use]
    pub fn encode(&self) -> String {
        // A Value-backed document with string keys cannot fail to serialize.
        serde_json::to_string(self).expect("envelope serialization is infallible")
    }

    /// Decodes one wire document.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] with the parser's reason and the raw text
    /// when the input is not a well-formed envelope.
    pub fn decode(raw: &str) -> Result<Self, DecodeError> {
        serde_json::from_str(raw).map_err(|err| DecodeError {
            reason: err.to_string(),
            raw: raw.to_owned(),
        })
    }
}

// ---------------------------------------------------------------------------
// DecodeError
// ---------------------------------------------------------------------------

/// Failure to parse a wire document into an [`Envelope`].
///
/// Keeps the raw message so callers can echo it back to the sender in an
/// error reply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed envelope: {reason}")]
pub struct DecodeError {
    /// Human-readable parser diagnostic.
    pub reason: String,
    /// The undecodable wire text, verbatim.
    pub raw: String,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
