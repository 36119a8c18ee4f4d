//! Error types for the chat relay
//!
//! Defines relay-level errors and per-connection transport errors.
//! Uses thiserror for ergonomic error definitions.
//!
//! Backpressure and partial broadcast failures are not errors here:
//! they are reported through `SendOutcome` and `BroadcastReport`.

use thiserror::Error;

use crate::types::ConnectionId;

/// Relay-level errors
///
/// Every variant is scoped to a single call or connection; none of them
/// should bring the process down.
#[derive(Debug, Error)]
pub enum RelayError {
    /// A connection with this id is already registered
    #[error("Connection {0} is already registered")]
    DuplicateId(ConnectionId),

    /// The connection reached Closed before it could be registered
    #[error("Connection {0} is closed")]
    ConnectionClosed(ConnectionId),

    /// Inbound payload exceeds the configured size bound
    #[error("Payload of {size} bytes exceeds the limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    /// Per-connection transport failure
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// HTTP connection error
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Transport errors
///
/// Raised by the stream/sink pair a connection is wired to. Any of these
/// closes the affected connection and nothing else.
#[derive(Debug, Error)]
pub enum TransportError {
    /// WebSocket protocol error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Outbound frame could not be encoded
    #[error("Encode error: {0}")]
    Encode(#[from] serde_json::Error),

    /// The other end of the channel has gone away
    #[error("Channel closed")]
    Closed,
}
