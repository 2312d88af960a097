//! Envelope types for the Relay protocol.
//!
//! Envelopes are the unit of communication between clients and the server.
//! Each one is a JSON object tagged by its `type` field.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Envelope type discriminators, as they appear in the `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeType {
    Subscribe,
    Unsubscribe,
    Publish,
    Error,
}

impl EnvelopeType {
    /// The wire name of this type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvelopeType::Subscribe => "subscribe",
            EnvelopeType::Unsubscribe => "unsubscribe",
            EnvelopeType::Publish => "publish",
            EnvelopeType::Error => "error",
        }
    }
}

impl fmt::Display for EnvelopeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A protocol envelope.
///
/// Unknown `type` values and missing or mistyped fields fail to deserialize.
/// Unrecognised extra fields are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Envelope {
    /// Subscribe to a channel.
    Subscribe {
        /// Channel name to subscribe to.
        channel: String,
    },

    /// Unsubscribe from a channel.
    Unsubscribe {
        /// Channel name to unsubscribe from.
        channel: String,
    },

    /// Publish a payload to a channel.
    Publish {
        /// Target channel.
        channel: String,
        /// Arbitrary JSON payload. Required, but may be `null`.
        payload: serde_json::Value,
    },

    /// Error report, sent server to client.
    Error {
        /// Human-readable error message.
        message: String,
    },
}

impl Envelope {
    /// Get the envelope type.
    #[must_use]
    pub fn envelope_type(&self) -> EnvelopeType {
        match self {
            Envelope::Subscribe { .. } => EnvelopeType::Subscribe,
            Envelope::Unsubscribe { .. } => EnvelopeType::Unsubscribe,
            Envelope::Publish { .. } => EnvelopeType::Publish,
            Envelope::Error { .. } => EnvelopeType::Error,
        }
    }

    /// The channel this envelope targets, if any.
    #[must_use]
    pub fn channel(&self) -> Option<&str> {
        match self {
            Envelope::Subscribe { channel }
            | Envelope::Unsubscribe { channel }
            | Envelope::Publish { channel, .. } => Some(channel),
            Envelope::Error { .. } => None,
        }
    }

    /// Create a new Subscribe envelope.
    #[must_use]
    pub fn subscribe(channel: impl Into<String>) -> Self {
        Envelope::Subscribe {
            channel: channel.into(),
        }
    }

    /// Create a new Unsubscribe envelope.
    #[must_use]
    pub fn unsubscribe(channel: impl Into<String>) -> Self {
        Envelope::Unsubscribe {
            channel: channel.into(),
        }
    }

    /// Create a new Publish envelope.
    #[must_use]
    pub fn publish(channel: impl Into<String>, payload: impl Into<serde_json::Value>) -> Self {
        Envelope::Publish {
            channel: channel.into(),
            payload: payload.into(),
        }
    }

    /// Create a new Error envelope.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Envelope::Error {
            message: message.into(),
        }
    }

    /// Error envelope reporting an unsubscribe from a channel the client never joined.
    #[must_use]
    pub fn not_subscribed(channel: &str) -> Self {
        Envelope::error(format!("Not subscribed to {channel}"))
    }

    /// Error envelope answering a publish while publishing is disabled.
    #[must_use]
    pub fn publish_unavailable() -> Self {
        Envelope::error("Publish not yet implemented")
    }
}
