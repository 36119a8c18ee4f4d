//! WebSocket connection handler
//!
//! Adapts an established WebSocket stream to the RelayServer: inbound
//! text frames become payloads, outbound envelopes become text frames.

use std::sync::Arc;

use futures_util::{future, SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

use crate::error::{RelayError, TransportError};
use crate::message::{ClientMessage, ServerMessage};
use crate::server::RelayServer;
use crate::types::{ConnectionId, Envelope, Payload};

/// Handle an upgraded WebSocket connection
///
/// Greets the client with its id, hands the stream to the RelayServer
/// and waits until the connection is closed.
pub async fn handle_socket<S>(
    ws_stream: WebSocketStream<S>,
    server: Arc<RelayServer>,
) -> Result<(), RelayError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut ws_sender, ws_receiver) = ws_stream.split();

    // Generate client ID
    let client_id = ConnectionId::new();

    // Greeting goes out before the connection can receive any broadcast
    let connected = serde_json::to_string(&ServerMessage::Connected { client_id })
        .map_err(TransportError::from)?;
    ws_sender
        .send(Message::Text(connected.into()))
        .await
        .map_err(TransportError::from)?;

    let inbound =
        ws_receiver.filter_map(move |frame| future::ready(decode_frame(client_id, frame)));
    let outbound =
        ws_sender.with(|envelope: Arc<Envelope>| future::ready(encode_envelope(&envelope)));

    let connection = server.on_connect(client_id, inbound, outbound)?;
    connection.closed().await;

    info!("Client {} connection closed", client_id);

    Ok(())
}

/// Convert a WebSocket frame into an inbound payload
///
/// Frames that carry no chat message yield `None`.
fn decode_frame(
    client_id: ConnectionId,
    frame: Result<Message, tungstenite::Error>,
) -> Option<Result<Payload, TransportError>> {
    match frame {
        Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
            Ok(ClientMessage::ChatMessage { payload }) => Some(Ok(Payload::from(payload))),
            Err(e) => {
                warn!("Invalid JSON from {}: {}", client_id, e);
                None
            }
        },
        Ok(Message::Close(_)) => {
            debug!("Client {} sent close frame", client_id);
            None
        }
        Ok(Message::Ping(_)) => {
            // Pong is handled automatically by tungstenite
            debug!("Ping from {}", client_id);
            None
        }
        Ok(Message::Pong(_)) => {
            debug!("Pong from {}", client_id);
            None
        }
        Ok(_) => {
            debug!("Ignoring non-text frame from {}", client_id);
            None
        }
        Err(e) => Some(Err(e.into())),
    }
}

/// Convert an outbound envelope into a WebSocket text frame
fn encode_envelope(envelope: &Envelope) -> Result<Message, TransportError> {
    let json = serde_json::to_string(&ServerMessage::from(envelope))?;
    Ok(Message::Text(json.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::types::Message as ChatMessage;

    #[test]
    fn test_decode_chat_message() {
        let frame = Ok(Message::Text(
            r#"{"type":"chat_message","payload":"hello"}"#.into(),
        ));
        let decoded = decode_frame(ConnectionId::new(), frame);
        assert_eq!(decoded.unwrap().unwrap().as_str(), "hello");
    }

    #[test]
    fn test_decode_skips_invalid_json() {
        let frame = Ok(Message::Text("not json".into()));
        assert!(decode_frame(ConnectionId::new(), frame).is_none());
    }

    #[test]
    fn test_decode_skips_control_frames() {
        let id = ConnectionId::new();
        assert!(decode_frame(id, Ok(Message::Ping(vec![]))).is_none());
        assert!(decode_frame(id, Ok(Message::Binary(vec![1, 2, 3]))).is_none());
        assert!(decode_frame(id, Ok(Message::Close(None))).is_none());
    }

    #[test]
    fn test_decode_surfaces_transport_error() {
        let frame = Err(tungstenite::Error::ConnectionClosed);
        let decoded = decode_frame(ConnectionId::new(), frame);
        assert!(matches!(decoded, Some(Err(TransportError::WebSocket(_)))));
    }

    #[test]
    fn test_encode_envelope() {
        let sender = ConnectionId::new();
        let envelope = Envelope::new(5, ChatMessage::from_client(sender, "hey"));

        let frame = encode_envelope(&envelope).unwrap();

        let text = frame.to_text().unwrap();
        let value: serde_json::Value = serde_json::from_str(text).unwrap();
        assert_eq!(value["type"], "chat_message");
        assert_eq!(value["payload"], "hey");
        assert_eq!(value["sequence"], 5);
        assert_eq!(value["sender"], sender.to_string());
    }
}
