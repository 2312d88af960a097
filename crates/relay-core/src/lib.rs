//! # relay-core
//!
//! Connection registry, subscriptions and fan-out for the Relay pub/sub server.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Connection** - One live client socket and its subscriptions
//! - **Registry** - Insertion-ordered set of live connections
//! - **Hub** - Subscribe, unsubscribe and broadcast over the registry
//! - **Events** - `connect` / `disconnect` hooks for application code
//! - **Session** - The per-connection read/decode/dispatch loop
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Session   │────▶│     Hub     │────▶│  Registry   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                            │
//!                            ▼
//!                     ┌─────────────┐
//!                     │   Events    │
//!                     └─────────────┘
//! ```

pub mod connection;
pub mod events;
pub mod hub;
pub mod registry;
pub mod session;

pub use connection::{ChannelId, Connection};
pub use events::{BoxError, EventDispatcher, EventError, Handler, CONNECT, DISCONNECT};
pub use hub::{Broadcast, BroadcastFailure, Hub, HubError, HubStats};
pub use registry::Registry;
pub use session::{run_session, ProtocolErrorCounts, SessionConfig, SessionSummary};
