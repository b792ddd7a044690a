//! Connection loop using tokio-tungstenite.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use cozy_realtime_shared::{ClientFrame, EntityRef, RealtimeError, Result, SUBPROTOCOL};
use futures_channel::mpsc::unbounded;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::{Backoff, ConnectionState, SocketHandle};
use crate::config::{ConnectionOptions, Endpoint};
use crate::registry::SubscriptionRegistry;
use crate::router::MessageRouter;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Exit status of a process stopped by SIGINT.
const SIGINT_EXIT_CODE: i32 = 130;

/// What the public API shares with the connection task.
#[derive(Default)]
struct Session {
    /// Writer of the open socket, `None` while not connected.
    socket: Option<SocketHandle>,
    /// Subscribe frames already sent on this socket.
    sent: HashSet<String>,
}

impl Session {
    /// Send a subscribe frame unless the exact same frame already went out on
    /// the current socket.
    fn send_once(&mut self, frame: &ClientFrame) -> Result<()> {
        let raw = frame
            .to_text()
            .map_err(|e| RealtimeError::TransportSend(format!("cannot serialize frame: {}", e)))?;
        if self.sent.contains(&raw) {
            tracing::debug!(frame = %raw, "already subscribed on this socket");
            return Ok(());
        }

        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| RealtimeError::TransportSend("socket is not open".to_string()))?;
        socket.send_text(raw.clone())?;
        self.sent.insert(raw);
        Ok(())
    }
}

/// Owns the single realtime socket of a client.
///
/// A background task opens the socket, authenticates, replays the registry
/// and reads frames until the socket closes, then either reconnects with
/// exponential backoff or stops for good. Callers wait for readiness on a
/// shared `watch` channel.
pub struct ConnectionManager {
    endpoint: Endpoint,
    options: ConnectionOptions,
    registry: Arc<SubscriptionRegistry>,
    router: MessageRouter,
    session: Mutex<Session>,
    state: watch::Sender<ConnectionState>,
    shutdown: CancellationToken,
}

impl ConnectionManager {
    /// Create the manager and start connecting. Must be called from within a
    /// tokio runtime.
    pub fn start(
        endpoint: Endpoint,
        options: ConnectionOptions,
        registry: Arc<SubscriptionRegistry>,
        router: MessageRouter,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(ConnectionState::Connecting { attempt: 0 });
        let manager = Arc::new(Self {
            endpoint,
            options,
            registry,
            router,
            session: Mutex::new(Session::default()),
            state,
            shutdown: CancellationToken::new(),
        });

        tokio::spawn(manager.clone().run());
        manager
    }

    pub fn url(&self) -> &str {
        &self.endpoint.url
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Whether the connection is closed for good, or closing after
    /// [`close`](Self::close).
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled() || self.state.borrow().is_terminal()
    }

    /// Wait until the socket is open. Fails once the connection is closed
    /// for good or [`close`](Self::close) was called.
    pub async fn ready(&self) -> Result<()> {
        if self.is_closed() {
            return Err(RealtimeError::ConnectionClosed);
        }

        let mut state = self.state.subscribe();
        let open = tokio::select! {
            _ = self.shutdown.cancelled() => false,
            reached = state.wait_for(|s| s.is_open() || s.is_terminal()) => {
                reached.map(|s| s.is_open()).unwrap_or(false)
            }
        };

        if open && !self.shutdown.is_cancelled() {
            Ok(())
        } else {
            Err(RealtimeError::ConnectionClosed)
        }
    }

    /// Send the subscribe frame for `entity` once the socket is open.
    pub async fn send_subscribe(&self, entity: &EntityRef) -> Result<()> {
        self.ready().await?;
        self.session()
            .send_once(&ClientFrame::Subscribe(entity.clone()))
            .inspect_err(|error| {
                tracing::warn!(doctype = %entity.doctype, %error, "cannot subscribe");
            })
    }

    /// Close the socket cleanly and stop reconnecting.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ConnectionState) {
        tracing::debug!(?state, "realtime state");
        self.state.send_replace(state);
    }

    async fn run(self: Arc<Self>) {
        let mut backoff = Backoff::new(self.options.reconnect.clone());

        loop {
            self.set_state(ConnectionState::Connecting {
                attempt: backoff.retries(),
            });

            let clean = match self.open().await {
                Ok(Some(stream)) => {
                    backoff.reset();
                    self.serve(stream).await
                }
                Ok(None) => true,
                Err(error) => {
                    tracing::error!(url = %self.endpoint.url, %error, "realtime socket error");
                    false
                }
            };

            if clean || self.shutdown.is_cancelled() {
                tracing::info!(url = %self.endpoint.url, "realtime connection closed");
                break;
            }

            let Some(delay) = backoff.next_delay() else {
                tracing::warn!(
                    url = %self.endpoint.url,
                    attempts = self.options.reconnect.max_attempts,
                    "giving up reconnecting"
                );
                break;
            };

            tracing::info!(
                url = %self.endpoint.url,
                attempt = backoff.retries(),
                delay_ms = delay.as_millis() as u64,
                "realtime socket closed unexpectedly, reconnecting"
            );
            self.set_state(ConnectionState::Closed {
                reconnect_in: Some(delay),
            });

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown.cancelled() => break,
            }
        }

        self.set_state(ConnectionState::Closed { reconnect_in: None });
    }

    /// Open the socket, or `None` if the client was closed meanwhile.
    async fn open(&self) -> Result<Option<WsStream>> {
        let mut request = self
            .endpoint
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| RealtimeError::Connect(e.to_string()))?;
        request
            .headers_mut()
            .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(SUBPROTOCOL));

        tokio::select! {
            _ = self.shutdown.cancelled() => Ok(None),
            result = connect_async(request) => result
                .map(|(stream, _response)| Some(stream))
                .map_err(|e| RealtimeError::Connect(e.to_string())),
        }
    }

    /// Drive an open socket until it closes. Returns whether the close was
    /// clean.
    async fn serve(&self, stream: WsStream) -> bool {
        tracing::info!(url = %self.endpoint.url, "realtime socket open");
        let (mut write, mut read) = stream.split();
        let (sender, mut outbound) = unbounded::<Message>();

        let writer = tokio::spawn(async move {
            while let Some(message) = outbound.next().await {
                if let Err(error) = write.send(message).await {
                    tracing::error!(%error, "realtime send failed");
                    break;
                }
            }
        });

        let socket = SocketHandle::new(sender);
        self.on_open(&socket);
        self.set_state(ConnectionState::Open);

        let mut unload_hook = self.listen_unload();
        let mut closing = false;
        // Armed once closing starts, never pushed back by later frames.
        let close_deadline = tokio::time::sleep(self.options.close_timeout);
        tokio::pin!(close_deadline);

        let clean = loop {
            tokio::select! {
                _ = self.shutdown.cancelled(), if !closing => {
                    closing = true;
                    stop_listening_unload(&mut unload_hook);
                    socket.close();
                    close_deadline
                        .as_mut()
                        .reset(Instant::now() + self.options.close_timeout);
                }
                _ = &mut close_deadline, if closing => {
                    tracing::warn!("no close frame from peer, dropping realtime socket");
                    break true;
                }
                message = read.next() => match message {
                    Some(Ok(Message::Text(text))) => self.router.route(text.as_str()),
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!(?frame, "realtime socket closed by peer");
                        break true;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(error)) => {
                        if !closing {
                            tracing::error!(%error, "realtime socket error");
                        }
                        break closing;
                    }
                    None => break closing,
                },
            }
        };

        stop_listening_unload(&mut unload_hook);
        self.session().socket = None;
        drop(socket);
        writer.abort();
        clean
    }

    /// Authenticate, then re-send a subscribe frame for every live key. The
    /// de-duplication log starts empty on every socket.
    fn on_open(&self, socket: &SocketHandle) {
        let mut session = self.session();
        session.sent.clear();
        session.socket = Some(socket.clone());

        if let Err(error) = socket.send_frame(&ClientFrame::Auth(self.endpoint.token.clone())) {
            tracing::warn!(%error, "cannot authenticate realtime socket");
            return;
        }

        for frame in self.registry.to_subscribe_messages() {
            if let Err(error) = session.send_once(&frame) {
                tracing::warn!(%error, "cannot replay subscription");
            }
        }
    }

    /// On Ctrl-C, close the socket cleanly, then let the process die as
    /// SIGINT would have made it.
    fn listen_unload(&self) -> Option<JoinHandle<()>> {
        if !self.options.close_on_shutdown {
            return None;
        }
        let shutdown = self.shutdown.clone();
        let mut state = self.state.subscribe();
        let grace = self.options.close_timeout + Duration::from_secs(1);

        Some(tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            tracing::info!("interrupted, closing realtime socket");
            shutdown.cancel();
            // This task is aborted as soon as the socket starts closing.
            tokio::spawn(async move {
                let closed = state.wait_for(ConnectionState::is_terminal);
                let _ = tokio::time::timeout(grace, closed).await;
                std::process::exit(SIGINT_EXIT_CODE);
            });
        }))
    }
}

fn stop_listening_unload(hook: &mut Option<JoinHandle<()>>) {
    if let Some(hook) = hook.take() {
        hook.abort();
    }
}
