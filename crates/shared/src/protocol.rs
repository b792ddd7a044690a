//! Realtime wire protocol spoken with the stack over `/realtime/`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::EntityRef;

/// Path of the realtime endpoint on a cozy instance.
pub const REALTIME_PATH: &str = "/realtime/";

/// WebSocket sub-protocol advertised in `Sec-WebSocket-Protocol`.
pub const SUBPROTOCOL: &str = "io.cozy.websocket";

/// Inbound event name carrying a [`crate::ServerError`].
pub const ERROR_EVENT: &str = "error";

/// Frames sent by the client.
///
/// ```json
/// {"method":"AUTH","payload":"<token>"}
/// {"method":"SUBSCRIBE","payload":{"type":"io.cozy.files","id":"42"}}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "payload", rename_all = "UPPERCASE")]
pub enum ClientFrame {
    Auth(String),
    Subscribe(EntityRef),
}

impl ClientFrame {
    /// Serialized text frame. The exact string doubles as the de-duplication
    /// key for subscribe frames, so field order must stay stable.
    pub fn to_text(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Frames pushed by the stack.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServerFrame {
    /// Event name, in whatever case the stack chose.
    pub event: String,
    #[serde(default)]
    pub payload: ServerPayload,
}

/// Union of the change and error payload fields.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ServerPayload {
    #[serde(rename = "type")]
    pub doctype: Option<String>,
    pub id: Option<String>,
    /// Changed document; absent for some deletions.
    pub doc: Option<Value>,
    pub title: Option<String>,
    pub status: Option<Value>,
    pub code: Option<Value>,
    pub source: Option<Value>,
}
