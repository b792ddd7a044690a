//! The realtime client, the only type collaborators need.

use std::sync::Arc;

use cozy_realtime_shared::{EntityRef, EventName, RealtimeError, Result};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, watch};

use crate::config::{ConnectionOptions, Endpoint, RealtimeConfig};
use crate::connection::{ConnectionManager, ConnectionState};
use crate::registry::{Handler, SubscriptionRegistry};
use crate::router::MessageRouter;
use crate::validator::validate;

/// Capacity of the error channel; slow receivers lose the oldest errors.
const ERROR_CHANNEL_CAPACITY: usize = 64;

/// Realtime client of a cozy instance.
///
/// Keeps one socket open to the instance and multiplexes every subscription
/// over it. Subscription state belongs to the instance: two clients never
/// share listeners.
///
/// ```rust,no_run
/// use cozy_realtime_client::{EntityRef, EventName, Handler, RealtimeClient, RealtimeConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = RealtimeClient::init(
///     RealtimeConfig::new().with_domain("alice.mycozy.cloud").with_token("app-token"),
/// )?;
///
/// let on_update = Handler::new(|doc| println!("updated: {:?}", doc));
/// let file = EntityRef::document("io.cozy.files", "42");
/// client.subscribe(&file, EventName::Updated, on_update.clone()).await?;
/// // ...
/// client.unsubscribe(&file, EventName::Updated, &on_update);
/// # Ok(())
/// # }
/// ```
pub struct RealtimeClient {
    registry: Arc<SubscriptionRegistry>,
    connection: Arc<ConnectionManager>,
    errors: broadcast::Sender<RealtimeError>,
}

impl RealtimeClient {
    /// Validate `config` and start connecting with the default options.
    ///
    /// Must be called from within a tokio runtime.
    pub fn init(config: RealtimeConfig) -> Result<Self> {
        Self::with_options(config, ConnectionOptions::default())
    }

    pub fn with_options(config: RealtimeConfig, options: ConnectionOptions) -> Result<Self> {
        validate(&config)?;
        let endpoint = Endpoint::resolve(&config)?;
        tracing::debug!(url = %endpoint.url, "starting realtime client");

        let registry = Arc::new(SubscriptionRegistry::new());
        let (errors, _) = broadcast::channel(ERROR_CHANNEL_CAPACITY);
        let router = MessageRouter::new(registry.clone(), errors.clone());
        let connection = ConnectionManager::start(endpoint, options, registry.clone(), router);

        Ok(Self {
            registry,
            connection,
            errors,
        })
    }

    /// Register `handler` for `event` on `entity` and make sure the stack
    /// knows about the subscription.
    ///
    /// Waits for the socket to be open. Fails with
    /// [`RealtimeError::ConnectionClosed`] once the client is closed or gave
    /// up reconnecting, without keeping the handler. Fails with
    /// [`RealtimeError::TransportSend`] if the frame could not be written; the
    /// handler then stays registered and is replayed on the next open.
    pub async fn subscribe(
        &self,
        entity: &EntityRef,
        event: EventName,
        handler: Handler,
    ) -> Result<()> {
        entity.validate()?;
        if self.connection.is_closed() {
            return Err(RealtimeError::ConnectionClosed);
        }

        self.registry.add_handler(entity, event, handler.clone());
        let sent = self.connection.send_subscribe(entity).await;
        if matches!(sent, Err(RealtimeError::ConnectionClosed)) {
            self.registry.remove_handler(entity, event, &handler);
        }
        sent
    }

    /// Remove one registration of `handler`. Local only: the protocol has no
    /// unsubscribe frame, the key is simply not replayed on reconnect once it
    /// has no listener left.
    pub fn unsubscribe(&self, entity: &EntityRef, event: EventName, handler: &Handler) -> bool {
        self.registry.remove_handler(entity, event, handler)
    }

    /// Subscribe and receive changes through a [`Listener`] instead of a
    /// callback.
    pub async fn listen(&self, entity: &EntityRef, event: EventName) -> Result<Listener> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let handler = {
            let entity = entity.clone();
            Handler::new(move |doc| {
                let _ = sender.send(Change {
                    entity: entity.clone(),
                    event,
                    doc: doc.cloned(),
                });
            })
        };

        let listener = Listener {
            entity: entity.clone(),
            event,
            handler: handler.clone(),
            registry: self.registry.clone(),
            changes: receiver,
            state: self.connection.watch_state(),
        };
        self.subscribe(entity, event, handler).await?;
        Ok(listener)
    }

    /// Whether `entity` has at least one live handler.
    pub fn is_subscribed(&self, entity: &EntityRef) -> bool {
        self.registry.contains(entity)
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Receiver notified on every connection state change.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.connection.watch_state()
    }

    /// Server errors and undecodable frames, as they arrive.
    pub fn errors(&self) -> broadcast::Receiver<RealtimeError> {
        self.errors.subscribe()
    }

    /// Wait for the socket to be open.
    pub async fn ready(&self) -> Result<()> {
        self.connection.ready().await
    }

    /// URL of the realtime endpoint.
    pub fn url(&self) -> &str {
        self.connection.url()
    }

    /// Close the socket cleanly. The client does not reconnect afterwards.
    pub fn close(&self) {
        self.connection.close();
    }
}

impl Drop for RealtimeClient {
    fn drop(&mut self) {
        self.connection.close();
    }
}

/// A change delivered to a [`Listener`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Change {
    #[serde(flatten)]
    pub entity: EntityRef,
    pub event: EventName,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc: Option<Value>,
}

/// Channel backed subscription, unsubscribed when dropped.
pub struct Listener {
    entity: EntityRef,
    event: EventName,
    handler: Handler,
    registry: Arc<SubscriptionRegistry>,
    changes: mpsc::UnboundedReceiver<Change>,
    state: watch::Receiver<ConnectionState>,
}

impl Listener {
    /// Next change, or `None` once the connection is closed for good and
    /// every pending change was received.
    pub async fn recv(&mut self) -> Option<Change> {
        tokio::select! {
            biased;
            change = self.changes.recv() => return change,
            _ = self.state.wait_for(ConnectionState::is_terminal) => {}
        }
        self.changes.try_recv().ok()
    }

    pub fn entity(&self) -> &EntityRef {
        &self.entity
    }

    pub fn event(&self) -> EventName {
        self.event
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.registry
            .remove_handler(&self.entity, self.event, &self.handler);
    }
}
