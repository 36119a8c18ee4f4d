//! Chat Relay - Entry Point
//!
//! Starts the TCP listener and the RelayServer, accepting connections
//! until Ctrl-C, then drains every client before exiting.

use std::env;
use std::sync::Arc;

use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use chat_relay::{bind, serve_connection, Config, RelayServer};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=chat_relay=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("chat_relay=info")),
        )
        .init();

    let config = Config::from_env()?;

    // Bind address from command line overrides RELAY_HOST/RELAY_PORT
    let addr = env::args().nth(1).unwrap_or_else(|| config.listen_addr());

    let listener = bind(&addr).await?;
    info!("Chat relay listening on {}", addr);

    let outbox = config.relay.outbox;
    info!(
        "Outbox capacity {}, overflow policy {}, echo to sender: {}",
        outbox.capacity,
        outbox.policy.as_str(),
        config.relay.echo_to_sender
    );

    let server = Arc::new(RelayServer::new(config.relay));

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    // Connection accept loop
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!("New connection from {}", peer);
                    let server = server.clone();

                    // Spawn handler task for each connection
                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(stream, server).await {
                            error!("Connection handler error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            },
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    server.shutdown().await;

    Ok(())
}
