//! RelayServer facade
//!
//! Owns the registry and the broadcaster. Accepts transport channels,
//! runs one session task per connection and tears connections down on
//! disconnect or shutdown.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tracing::{debug, info, warn};

use crate::broadcast::{BroadcastReport, BroadcastStats, Broadcaster};
use crate::config::RelayConfig;
use crate::connection::{CloseReason, Connection};
use crate::error::{RelayError, TransportError};
use crate::registry::Registry;
use crate::types::{ConnectionId, Envelope, Message, Payload};

/// Upper bound on flushing and closing a transport sink
const SINK_CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// The chat relay
///
/// One instance per process, shared behind an `Arc`.
#[derive(Debug)]
pub struct RelayServer {
    config: RelayConfig,
    registry: Registry,
    broadcaster: Broadcaster,
}

impl RelayServer {
    /// Create a new RelayServer with an empty registry
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            registry: Registry::new(),
            broadcaster: Broadcaster::new(),
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn stats(&self) -> BroadcastStats {
        self.broadcaster.stats()
    }

    /// Handle a new transport channel
    ///
    /// Registers a connection for `id` and spawns its session task: the
    /// read loop feeds inbound payloads to `publish`, the write loop
    /// drains the outbox into `outbound`. Once both loops end the
    /// connection is deregistered.
    pub fn on_connect<I, O>(
        self: &Arc<Self>,
        id: ConnectionId,
        inbound: I,
        outbound: O,
    ) -> Result<Arc<Connection>, RelayError>
    where
        I: Stream<Item = Result<Payload, TransportError>> + Unpin + Send + 'static,
        O: Sink<Arc<Envelope>, Error = TransportError> + Unpin + Send + 'static,
    {
        let connection = Arc::new(Connection::new(id, self.config.outbox));
        self.registry.register(connection.clone())?;

        info!(
            "Client {} connected, total connections: {}",
            id,
            self.registry.len()
        );

        let server = Arc::clone(self);
        let session = connection.clone();
        tokio::spawn(async move {
            tokio::join!(
                server.read_loop(&session, inbound),
                write_loop(&session, outbound),
            );
            server.on_disconnect(session.id());
        });

        Ok(connection)
    }

    /// Handle a disconnect
    ///
    /// Deregisters and closes the connection. Unknown ids are ignored.
    pub fn on_disconnect(&self, id: ConnectionId) {
        let Some(connection) = self.registry.deregister(id) else {
            return;
        };

        connection.close(CloseReason::Normal);
        info!(
            "Client {} disconnected, total connections: {}",
            id,
            self.registry.len()
        );
    }

    /// Broadcast a payload
    ///
    /// `sender` is None for server-originated messages. Whether the
    /// sender gets its own message back is decided by `echo_to_sender`.
    pub fn publish(
        &self,
        sender: Option<ConnectionId>,
        payload: Payload,
    ) -> Result<BroadcastReport, RelayError> {
        let limit = self.config.max_payload_bytes;
        if payload.len() > limit {
            return Err(RelayError::PayloadTooLarge {
                size: payload.len(),
                limit,
            });
        }

        let message = Message { sender, payload };
        Ok(self
            .broadcaster
            .broadcast(&self.registry, message, !self.config.echo_to_sender))
    }

    /// Drain every connection, then empty the registry
    pub async fn shutdown(&self) {
        let connections = self.registry.snapshot();
        info!("Draining {} connections", connections.len());

        join_all(
            connections
                .iter()
                .map(|connection| connection.drain(self.config.drain_timeout)),
        )
        .await;

        for connection in self.registry.drain_all() {
            connection.close(CloseReason::Normal);
        }

        info!("RelayServer shut down");
    }

    async fn read_loop<I>(&self, connection: &Connection, inbound: I)
    where
        I: Stream<Item = Result<Payload, TransportError>> + Unpin + Send,
    {
        let id = connection.id();
        let mut inbound = connection.receive(inbound);
        let mut reason = CloseReason::Normal;

        while let Some(item) = inbound.next().await {
            match item {
                Ok(payload) => {
                    if let Err(e) = self.publish(Some(id), payload) {
                        warn!("Dropping message from {}: {}", id, e);
                    }
                }
                Err(e) => {
                    warn!("Transport error for {}: {}", id, e);
                    reason = CloseReason::TransportError;
                    break;
                }
            }
        }

        debug!("Read loop ended for {}", id);
        connection.close(reason);
    }
}

async fn write_loop<O>(connection: &Connection, mut outbound: O)
where
    O: Sink<Arc<Envelope>, Error = TransportError> + Unpin,
{
    while let Some(envelope) = connection.next_outbound().await {
        tokio::select! {
            result = outbound.send(envelope) => {
                if let Err(e) = result {
                    debug!("Write failed for {}: {}", connection.id(), e);
                    connection.close(CloseReason::TransportError);
                    break;
                }
            }
            _ = connection.closed() => break,
        }
    }

    match tokio::time::timeout(SINK_CLOSE_TIMEOUT, outbound.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("Closing transport failed for {}: {}", connection.id(), e),
        Err(_) => debug!("Closing transport timed out for {}", connection.id()),
    }
    debug!("Write loop ended for {}", connection.id());
}
