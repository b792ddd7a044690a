#![allow(dead_code)]
//! In-process realtime endpoint for the integration tests.

use std::net::SocketAddr;
use std::time::Duration;

use cozy_realtime_client::{ConnectionOptions, RealtimeConfig, ReconnectConfig, SUBPROTOCOL};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};
use tracing_subscriber::EnvFilter;

pub const TOKEN: &str = "test-token";
pub const WAIT: Duration = Duration::from_secs(5);
pub const QUIET: Duration = Duration::from_millis(200);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("cozy_realtime_client=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Options with a short backoff and no Ctrl-C hook.
pub fn fast_options(max_attempts: u32) -> ConnectionOptions {
    ConnectionOptions {
        reconnect: ReconnectConfig {
            max_attempts,
            initial_delay: Duration::from_millis(20),
            backoff_multiplier: 2,
        },
        ..ConnectionOptions::default()
    }
}

/// A websocket server accepting any number of connections.
pub struct TestServer {
    pub addr: SocketAddr,
    connections: mpsc::UnboundedReceiver<ServerConn>,
    acceptor: JoinHandle<()>,
}

impl TestServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, connections) = mpsc::unbounded_channel();

        let acceptor = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let tx = tx.clone();
                tokio::spawn(async move {
                    if let Some(conn) = ServerConn::handshake(stream).await {
                        let _ = tx.send(conn);
                    }
                });
            }
        });

        Self {
            addr,
            connections,
            acceptor,
        }
    }

    /// Configuration pointing a client at this server.
    pub fn config(&self) -> RealtimeConfig {
        RealtimeConfig::new()
            .with_url(format!("http://{}", self.addr))
            .with_token(TOKEN)
    }

    pub async fn accept(&mut self) -> ServerConn {
        timeout(WAIT, self.connections.recv())
            .await
            .expect("no connection in time")
            .expect("acceptor stopped")
    }

    /// Whether a new connection shows up within `within`.
    pub async fn has_new_connection(&mut self, within: Duration) -> bool {
        matches!(timeout(within, self.connections.recv()).await, Ok(Some(_)))
    }

    /// Close the listening socket: further connection attempts are refused.
    pub fn stop_accepting(&self) {
        self.acceptor.abort();
    }
}

/// Server side of one client connection.
pub struct ServerConn {
    pub path: String,
    pub protocol: Option<String>,
    ws: WebSocketStream<TcpStream>,
}

impl ServerConn {
    async fn handshake(stream: TcpStream) -> Option<Self> {
        let mut path = String::new();
        let mut protocol = None;
        let callback = |req: &Request, mut resp: Response| -> Result<Response, ErrorResponse> {
            path = req.uri().path().to_string();
            protocol = req
                .headers()
                .get(SEC_WEBSOCKET_PROTOCOL)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            resp.headers_mut()
                .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(SUBPROTOCOL));
            Ok(resp)
        };
        let ws = accept_hdr_async(stream, callback).await.ok()?;
        Some(Self { path, protocol, ws })
    }

    async fn next_text(&mut self) -> Option<String> {
        while let Some(message) = self.ws.next().await {
            match message {
                Ok(Message::Text(text)) => return Some(text.to_string()),
                Ok(Message::Close(_)) | Err(_) => return None,
                Ok(_) => {}
            }
        }
        None
    }

    /// Next text frame from the client.
    pub async fn recv_text(&mut self) -> String {
        timeout(WAIT, self.next_text())
            .await
            .expect("no frame in time")
            .expect("connection closed")
    }

    /// Collect text frames until the client stays quiet for a while.
    pub async fn recv_until_quiet(&mut self) -> Vec<String> {
        let mut frames = Vec::new();
        while let Ok(Some(text)) = timeout(QUIET, self.next_text()).await {
            frames.push(text);
        }
        frames
    }

    pub async fn expect_quiet(&mut self) {
        if let Ok(Some(text)) = timeout(QUIET, self.next_text()).await {
            panic!("unexpected frame from client: {}", text);
        }
    }

    /// Wait for the client's close frame, answer it and drain the socket.
    /// Returns the text frames received before the close.
    pub async fn expect_close(&mut self) -> Vec<String> {
        let drained = timeout(WAIT, async {
            let mut texts = Vec::new();
            let mut got_close = false;
            while let Some(message) = self.ws.next().await {
                match message {
                    Ok(Message::Text(text)) if !got_close => texts.push(text.to_string()),
                    Ok(Message::Close(_)) => got_close = true,
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
            (texts, got_close)
        })
        .await;
        let (texts, got_close) = drained.expect("client did not close the socket in time");
        assert!(got_close, "client dropped the socket without a close frame");
        texts
    }

    /// Send without failing once the client went away.
    pub async fn try_send_json(&mut self, value: Value) -> bool {
        self.ws
            .send(Message::Text(value.to_string().into()))
            .await
            .is_ok()
    }

    pub async fn send_json(&mut self, value: Value) {
        self.ws
            .send(Message::Text(value.to_string().into()))
            .await
            .unwrap();
    }

    /// Orderly close with a close handshake.
    pub async fn close_clean(mut self) {
        self.ws.close(None).await.unwrap();
        let _ = timeout(WAIT, async { while let Some(Ok(_)) = self.ws.next().await {} }).await;
    }

    /// Drop the TCP connection without a close frame.
    pub fn drop_unclean(self) {
        drop(self.ws);
    }
}

pub fn auth_frame() -> String {
    format!(r#"{{"method":"AUTH","payload":"{}"}}"#, TOKEN)
}
