//! Realtime socket lifecycle: state, outbound handle and auto-reconnect.
//!
//! ```text
//!            open                 clean close / budget exhausted
//! Connecting ────▶ Open ──────────────────────────────────────▶ Closed (terminal)
//!     ▲             │
//!     │             │ unclean close, retries left
//!     │             ▼
//!     └──── Closed { reconnect_in } (one timer pending)
//! ```

use std::time::Duration;

use cozy_realtime_shared::{ClientFrame, RealtimeError, Result};
use futures_channel::mpsc::UnboundedSender;
use tokio_tungstenite::tungstenite::Message;

mod manager;
mod reconnect;

pub use manager::ConnectionManager;
pub use reconnect::{Backoff, ReconnectConfig};

/// Connection state of a realtime client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Opening the socket. `attempt` is 0 on first connection.
    Connecting { attempt: u32 },
    /// Socket open and authenticated.
    Open,
    /// Socket closed. A reconnect is scheduled after `reconnect_in`; `None`
    /// means the client gave up or was closed on purpose.
    Closed { reconnect_in: Option<Duration> },
}

impl ConnectionState {
    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting { .. } | ConnectionState::Closed { reconnect_in: Some(_) }
        )
    }

    /// Closed for good: no reconnect will ever happen.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Closed { reconnect_in: None })
    }
}

/// Handle for writing frames to the currently open socket.
///
/// Frames are queued to the socket's writer task, so sends never block and
/// keep their order.
#[derive(Clone)]
pub struct SocketHandle {
    sender: UnboundedSender<Message>,
}

impl SocketHandle {
    pub(crate) fn new(sender: UnboundedSender<Message>) -> Self {
        Self { sender }
    }

    /// Serialize and send a frame, returning the raw text that was sent.
    pub fn send_frame(&self, frame: &ClientFrame) -> Result<String> {
        let raw = frame
            .to_text()
            .map_err(|e| RealtimeError::TransportSend(format!("cannot serialize frame: {}", e)))?;
        self.send_text(raw.clone())?;
        Ok(raw)
    }

    pub fn send_text(&self, raw: String) -> Result<()> {
        tracing::debug!(frame = %raw, "sending");
        self.sender
            .unbounded_send(Message::Text(raw.into()))
            .map_err(|e| RealtimeError::TransportSend(e.to_string()))
    }

    /// Start the closing handshake.
    pub fn close(&self) {
        let _ = self.sender.unbounded_send(Message::Close(None));
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
