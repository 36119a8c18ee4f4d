//! Message protocol definitions
//!
//! JSON-based bidirectional message protocol using Serde's tagged enum
//! for type-safe serialization/deserialization.

use serde::{Deserialize, Serialize};

use crate::types::{ConnectionId, Envelope, Payload};

/// Client → Server message
///
/// All messages from client to server. Uses tagged enum with snake_case naming.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Chat message to relay to everyone else
    ChatMessage { payload: String },
}

/// Server → Client message
///
/// All messages from server to client. Uses tagged enum with snake_case naming.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Connection successful, client ID issued
    Connected { client_id: ConnectionId },
    /// Relayed chat message
    ChatMessage {
        payload: Payload,
        sequence: u64,
        sender: Option<ConnectionId>,
    },
}

impl From<&Envelope> for ServerMessage {
    fn from(envelope: &Envelope) -> Self {
        ServerMessage::ChatMessage {
            payload: envelope.payload.clone(),
            sequence: envelope.sequence,
            sender: envelope.sender,
        }
    }
}
