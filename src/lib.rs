//! Real-time WebSocket Chat Relay Library
//!
//! Accepts WebSocket connections and broadcasts every chat message to
//! all connected clients, next to a static page served on `GET /`.
//!
//! # Features
//! - WebSocket and HTTP on a single port
//! - Global broadcast with optional sender exclusion
//! - Bounded per-connection outboxes with drop-oldest or reject-new backpressure
//! - Per-connection FIFO delivery and sequence numbers
//! - Graceful drain on shutdown
//!
//! # Architecture
//! - `Registry` tracks live connections and hands out snapshots
//! - `Broadcaster` fans one message out over a snapshot, counting failures
//! - `RelayServer` runs one session task per connection (read + write loops)
//! - `handler` and `http` adapt tungstenite/hyper to the RelayServer
//!
//! # Example
//! ```ignore
//! use std::sync::Arc;
//! use chat_relay::{bind, serve_connection, Config, RelayServer};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::from_env().unwrap();
//!     let listener = bind(&config.listen_addr()).await.unwrap();
//!     let server = Arc::new(RelayServer::new(config.relay));
//!
//!     while let Ok((stream, _)) = listener.accept().await {
//!         tokio::spawn(serve_connection(stream, server.clone()));
//!     }
//! }
//! ```

pub mod broadcast;
pub mod config;
pub mod connection;
pub mod error;
pub mod handler;
pub mod http;
pub mod message;
pub mod registry;
pub mod server;
pub mod types;

// Re-export main types for convenience
pub use broadcast::{BroadcastReport, BroadcastStats, Broadcaster};
pub use config::{Config, RelayConfig, ServerConfig};
pub use connection::{
    CloseReason, Connection, ConnectionState, OutboxConfig, OverflowPolicy, SendOutcome,
};
pub use error::{RelayError, TransportError};
pub use handler::handle_socket;
pub use http::{bind, serve_connection};
pub use message::{ClientMessage, ServerMessage};
pub use registry::Registry;
pub use server::RelayServer;
pub use types::{ConnectionId, Envelope, Message, Payload};
