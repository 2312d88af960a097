//! # relay-protocol
//!
//! Wire protocol definitions for the Relay pub/sub server.
//!
//! Clients and the server exchange JSON objects as WebSocket text frames.
//! Every frame is one [`Envelope`], discriminated by its `type` field.
//!
//! ## Envelope Types
//!
//! - `subscribe` / `unsubscribe` - Channel membership
//! - `publish` - Send a payload to a channel
//! - `error` - Server-reported protocol errors
//!
//! ## Example
//!
//! ```rust
//! use relay_protocol::{codec, Envelope};
//!
//! let envelope = codec::decode(r#"{"type":"subscribe","channel":"news"}"#).unwrap();
//! assert_eq!(envelope, Envelope::subscribe("news"));
//!
//! let reply = codec::encode(&Envelope::error("Invalid JSON")).unwrap();
//! assert_eq!(reply, r#"{"type":"error","message":"Invalid JSON"}"#);
//! ```

pub mod codec;
pub mod envelope;

pub use codec::{decode, encode, ProtocolError};
pub use envelope::{Envelope, EnvelopeType};
