//! Shared error types, including the error object sent by the stack.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Error pushed by the stack on the realtime channel (`"event": "error"`).
///
/// Mirrors the JSON:API error object the stack uses for its HTTP routes. Only
/// the fields the realtime endpoint actually fills are kept; any of them may
/// be missing.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerError {
    /// A short, human-readable summary of the problem.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// HTTP status code, as a string ("401").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Application specific error code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// What part of the request caused the error, kept verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<serde_json::Value>,
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title.as_deref().unwrap_or("realtime error"))?;
        if let Some(status) = &self.status {
            write!(f, " (status {})", status)?;
        }
        if let Some(code) = &self.code {
            write!(f, " [{}]", code)?;
        }
        Ok(())
    }
}

/// Error type shared by every realtime operation.
///
/// Cheap to clone so it can be fanned out to all error channel receivers.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RealtimeError {
    /// Bad construction input. Raised before any connection attempt.
    #[error("{field} {message}")]
    Configuration {
        field: &'static str,
        message: String,
    },

    /// Subscription target or event name that can never be matched.
    #[error("invalid subscription: {0}")]
    InvalidSubscription(String),

    /// A frame could not be written to the socket.
    #[error("cannot send on the realtime socket: {0}")]
    TransportSend(String),

    /// The stack rejected something on the realtime channel.
    #[error("server error: {0}")]
    Server(ServerError),

    /// The connection is permanently closed.
    #[error("realtime connection is closed")]
    ConnectionClosed,

    /// An inbound frame did not match the protocol.
    #[error("cannot decode realtime frame: {0}")]
    Decode(String),

    /// Transport level failure while opening the socket.
    #[error("cannot connect to realtime endpoint: {0}")]
    Connect(String),
}

impl From<serde_json::Error> for RealtimeError {
    fn from(err: serde_json::Error) -> Self {
        RealtimeError::Decode(err.to_string())
    }
}

pub type Result<T, E = RealtimeError> = std::result::Result<T, E>;
