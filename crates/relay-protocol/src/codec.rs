//! Codec for encoding and decoding Relay envelopes.
//!
//! Frames are JSON text. Decoding happens in two stages so that a frame
//! which is not JSON at all can be told apart from well-formed JSON that
//! does not describe a valid envelope.

use serde::de::Error as _;
use thiserror::Error;

use crate::envelope::Envelope;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame is not well-formed JSON.
    #[error("Invalid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    /// The frame is JSON but not a valid envelope.
    #[error("Invalid payload: {0}")]
    InvalidPayload(#[source] serde_json::Error),

    /// JSON encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[source] serde_json::Error),
}

impl ProtocolError {
    /// The message reported back to the client in an `error` envelope.
    #[must_use]
    pub fn client_message(&self) -> &'static str {
        match self {
            ProtocolError::InvalidJson(_) => "Invalid JSON",
            ProtocolError::InvalidPayload(_) | ProtocolError::Encode(_) => "Invalid payload",
        }
    }

    /// The `error` envelope answering this failure.
    #[must_use]
    pub fn to_envelope(&self) -> Envelope {
        Envelope::error(self.client_message())
    }

    /// Short label for metrics and logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ProtocolError::InvalidJson(_) => "invalid_json",
            ProtocolError::InvalidPayload(_) => "invalid_payload",
            ProtocolError::Encode(_) => "encode",
        }
    }
}

/// Decode an envelope from frame text.
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidJson`] if the text is not JSON, or
/// [`ProtocolError::InvalidPayload`] if the JSON is not a known envelope
/// with all of its required fields.
pub fn decode(text: &str) -> Result<Envelope, ProtocolError> {
    let value: serde_json::Value = serde_json::from_str(text).map_err(ProtocolError::InvalidJson)?;
    // Tagged enums also deserialize from sequences; only objects are envelopes.
    if !value.is_object() {
        return Err(ProtocolError::InvalidPayload(serde_json::Error::custom(
            "envelope must be a JSON object",
        )));
    }
    serde_json::from_value(value).map_err(ProtocolError::InvalidPayload)
}

/// Encode an envelope to frame text.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode(envelope: &Envelope) -> Result<String, ProtocolError> {
    serde_json::to_string(envelope).map_err(ProtocolError::Encode)
}
