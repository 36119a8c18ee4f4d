//! HTTP front door
//!
//! Serves the static chat page on `GET /` and upgrades WebSocket
//! requests (on any path) to relay connections, all on one port.

use std::convert::Infallible;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{self, HeaderMap, HeaderName, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error};

use crate::error::RelayError;
use crate::handler::handle_socket;
use crate::server::RelayServer;

const INDEX_HTML: &str = include_str!("../static/index.html");

/// Bind the relay's listener
pub async fn bind(addr: &str) -> Result<TcpListener, RelayError> {
    let listener = TcpListener::bind(addr).await?;
    Ok(listener)
}

/// Serve one accepted TCP connection
pub async fn serve_connection(
    stream: TcpStream,
    server: Arc<RelayServer>,
) -> Result<(), RelayError> {
    let io = TokioIo::new(stream);

    let service = service_fn(move |req: Request<Incoming>| {
        let server = server.clone();
        async move { Ok::<_, Infallible>(route(req, server)) }
    });

    http1::Builder::new()
        .serve_connection(io, service)
        .with_upgrades()
        .await?;

    Ok(())
}

fn route(req: Request<Incoming>, server: Arc<RelayServer>) -> Response<Full<Bytes>> {
    if is_websocket_upgrade(&req) {
        return upgrade(req, server);
    }

    match (req.method(), req.uri().path()) {
        (&Method::GET, "/") | (&Method::GET, "/index.html") => {
            response(StatusCode::OK, "text/html; charset=utf-8", INDEX_HTML)
        }
        _ => response(StatusCode::NOT_FOUND, "text/plain", "Not Found"),
    }
}

/// Answer the handshake and hand the upgraded IO to the relay
fn upgrade(mut req: Request<Incoming>, server: Arc<RelayServer>) -> Response<Full<Bytes>> {
    let Some(key) = req.headers().get(header::SEC_WEBSOCKET_KEY) else {
        return response(
            StatusCode::BAD_REQUEST,
            "text/plain",
            "Missing Sec-WebSocket-Key",
        );
    };
    let Ok(accept) = HeaderValue::from_str(&derive_accept_key(key.as_bytes())) else {
        return response(
            StatusCode::BAD_REQUEST,
            "text/plain",
            "Invalid Sec-WebSocket-Key",
        );
    };

    let on_upgrade = hyper::upgrade::on(&mut req);
    tokio::spawn(async move {
        match on_upgrade.await {
            Ok(upgraded) => {
                let ws_stream =
                    WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Server, None)
                        .await;
                if let Err(e) = handle_socket(ws_stream, server).await {
                    error!("Connection handler error: {}", e);
                }
            }
            Err(e) => {
                debug!("WebSocket upgrade failed: {}", e);
            }
        }
    });

    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
    let headers = response.headers_mut();
    headers.insert(header::CONNECTION, HeaderValue::from_static("Upgrade"));
    headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
    headers.insert(header::SEC_WEBSOCKET_ACCEPT, accept);
    response
}

fn is_websocket_upgrade<B>(req: &Request<B>) -> bool {
    req.method() == Method::GET
        && header_has_token(req.headers(), header::CONNECTION, "upgrade")
        && header_has_token(req.headers(), header::UPGRADE, "websocket")
}

/// Check a comma-separated header for a token, case-insensitively
fn header_has_token(headers: &HeaderMap, name: HeaderName, token: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|part| part.trim().eq_ignore_ascii_case(token))
}

fn response(
    status: StatusCode,
    content_type: &'static str,
    body: &'static str,
) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::SocketAddr;
    use std::time::Duration;

    use futures_util::{SinkExt, StreamExt};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::time::{sleep, timeout};
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::{connect_async, MaybeTlsStream};

    use crate::config::RelayConfig;

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    async fn start() -> (SocketAddr, Arc<RelayServer>) {
        let listener = bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Arc::new(RelayServer::new(RelayConfig::default()));

        let accept_server = server.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let server = accept_server.clone();
                tokio::spawn(async move {
                    let _ = serve_connection(stream, server).await;
                });
            }
        });

        (addr, server)
    }

    async fn get(addr: SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!(
            "GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
            path
        );
        stream.write_all(request.as_bytes()).await.unwrap();

        let mut raw = String::new();
        timeout(Duration::from_secs(2), stream.read_to_string(&mut raw))
            .await
            .unwrap()
            .unwrap();
        raw
    }

    async fn next_json(client: &mut Client) -> serde_json::Value {
        let frame = timeout(Duration::from_secs(2), client.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        serde_json::from_str(frame.to_text().unwrap()).unwrap()
    }

    async fn wait_for_connections(server: &RelayServer, count: usize) {
        for _ in 0..200 {
            if server.registry().len() == count {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "expected {} connections, found {}",
            count,
            server.registry().len()
        );
    }

    #[tokio::test]
    async fn test_index_page_served() {
        let (addr, _server) = start().await;

        let raw = get(addr, "/").await;

        assert!(raw.starts_with("HTTP/1.1 200 OK"));
        assert!(raw.to_lowercase().contains("content-type: text/html"));
        assert!(raw.contains("<html"));
    }

    #[tokio::test]
    async fn test_unknown_path_not_found() {
        let (addr, _server) = start().await;

        let raw = get(addr, "/missing").await;

        assert!(raw.starts_with("HTTP/1.1 404 Not Found"));
    }

    #[tokio::test]
    async fn test_websocket_clients_exchange_messages() {
        let (addr, server) = start().await;
        let url = format!("ws://{}/", addr);

        let (mut alice, _) = connect_async(url.as_str()).await.unwrap();
        let (mut bob, _) = connect_async(url.as_str()).await.unwrap();

        let greeting = next_json(&mut alice).await;
        assert_eq!(greeting["type"], "connected");
        let alice_id = greeting["client_id"].as_str().unwrap().to_string();
        assert_eq!(next_json(&mut bob).await["type"], "connected");
        wait_for_connections(&server, 2).await;

        alice
            .send(Message::Text(
                r#"{"type":"chat_message","payload":"hello"}"#.into(),
            ))
            .await
            .unwrap();

        let relayed = next_json(&mut bob).await;
        assert_eq!(relayed["type"], "chat_message");
        assert_eq!(relayed["payload"], "hello");
        assert_eq!(relayed["sender"], alice_id);

        // The sender does not get its own message back
        let echo = timeout(Duration::from_millis(100), alice.next()).await;
        assert!(echo.is_err());

        alice.close(None).await.unwrap();
        wait_for_connections(&server, 1).await;
    }

    #[tokio::test]
    async fn test_bind_taken_address_fails() {
        let (addr, _server) = start().await;

        let result = bind(&addr.to_string()).await;

        assert!(matches!(result, Err(RelayError::Io(_))));
    }

    #[test]
    fn test_header_has_token() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONNECTION,
            HeaderValue::from_static("keep-alive, Upgrade"),
        );

        assert!(header_has_token(&headers, header::CONNECTION, "upgrade"));
        assert!(!header_has_token(&headers, header::CONNECTION, "close"));
        assert!(!header_has_token(&headers, header::UPGRADE, "websocket"));
    }
}
