//! Decoding and dispatch of inbound realtime frames.

use std::sync::Arc;

use cozy_realtime_shared::{
    EntityRef, EventName, RealtimeError, Result, ServerError, ServerFrame, ERROR_EVENT,
};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::registry::SubscriptionRegistry;

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A document changed.
    Change {
        entity: EntityRef,
        event: EventName,
        doc: Option<Value>,
    },
    /// The stack reported an error.
    Error(ServerError),
    /// Well-formed frame with an event name this client does not handle.
    Unknown { event: String },
}

/// Routes frames read from the socket to the registry or the error channel.
pub struct MessageRouter {
    registry: Arc<SubscriptionRegistry>,
    errors: broadcast::Sender<RealtimeError>,
}

impl MessageRouter {
    pub fn new(
        registry: Arc<SubscriptionRegistry>,
        errors: broadcast::Sender<RealtimeError>,
    ) -> Self {
        Self { registry, errors }
    }

    /// Decode one text frame.
    pub fn decode(raw: &str) -> Result<Inbound> {
        let frame: ServerFrame = serde_json::from_str(raw)?;
        let event = frame.event.to_lowercase();
        let payload = frame.payload;

        if event == ERROR_EVENT {
            return Ok(Inbound::Error(ServerError {
                title: payload.title,
                status: payload.status.map(value_to_string),
                code: payload.code.map(value_to_string),
                source: payload.source,
            }));
        }

        let Ok(name) = event.parse::<EventName>() else {
            return Ok(Inbound::Unknown { event });
        };

        let doctype = payload
            .doctype
            .filter(|t| !t.is_empty())
            .ok_or_else(|| RealtimeError::Decode(format!("'{}' event without a type", event)))?;

        Ok(Inbound::Change {
            entity: EntityRef {
                doctype,
                id: payload.id,
            },
            event: name,
            doc: payload.doc,
        })
    }

    /// Decode `raw` and deliver it. Decode failures and server errors are
    /// logged and published on the error channel.
    pub fn route(&self, raw: &str) {
        match Self::decode(raw) {
            Ok(Inbound::Change { entity, event, doc }) => {
                let delivered = self.registry.handle(&entity, event, doc.as_ref());
                tracing::debug!(key = %entity, %event, delivered, "realtime change");
            }
            Ok(Inbound::Error(error)) => {
                tracing::error!(%error, "realtime error from server");
                self.publish(RealtimeError::Server(error));
            }
            Ok(Inbound::Unknown { event }) => {
                tracing::warn!(%event, "ignoring unknown realtime event");
            }
            Err(error) => {
                tracing::error!(%error, frame = raw, "malformed realtime frame");
                self.publish(error);
            }
        }
    }

    fn publish(&self, error: RealtimeError) {
        // No receiver is not an error, the log line above is the record.
        let _ = self.errors.send(error);
    }
}

fn value_to_string(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}
