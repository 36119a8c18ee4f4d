//! Basic type definitions for the chat relay
//!
//! Provides newtype wrappers for type safety:
//! - `ConnectionId`: UUID-based unique connection identifier
//! - `Payload`: cheaply clonable opaque message body
//! - `Message` / `Envelope`: a chat message before and after sequencing

use std::sync::Arc;

use serde::{Serialize, Serializer};
use uuid::Uuid;

/// Unique connection identifier (newtype pattern)
///
/// Wraps a UUID v4. Implements `Ord` so the registry can iterate
/// connections in a deterministic order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    /// Create a new random connection ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque chat payload
///
/// Backed by `Arc<str>` so fanning one message out to many outboxes
/// never copies the body.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Payload(Arc<str>);

impl Payload {
    pub fn new(text: impl Into<Arc<str>>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Size of the payload in bytes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl std::fmt::Display for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// A chat message submitted for broadcast
#[derive(Debug, Clone)]
pub struct Message {
    /// Originating connection (None for server-originated messages)
    pub sender: Option<ConnectionId>,
    /// Message body
    pub payload: Payload,
}

impl Message {
    /// Message originating from a connected client
    pub fn from_client(sender: ConnectionId, payload: impl Into<Payload>) -> Self {
        Self {
            sender: Some(sender),
            payload: payload.into(),
        }
    }

    /// Message originating from the server itself
    pub fn from_server(payload: impl Into<Payload>) -> Self {
        Self {
            sender: None,
            payload: payload.into(),
        }
    }
}

/// A sequenced message as it sits in a connection's outbox
///
/// Shared between every outbox that received it.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Broadcast sequence number, used for diagnostics only
    pub sequence: u64,
    pub sender: Option<ConnectionId>,
    pub payload: Payload,
}

impl Envelope {
    pub fn new(sequence: u64, message: Message) -> Self {
        Self {
            sequence,
            sender: message.sender,
            payload: message.payload,
        }
    }
}
