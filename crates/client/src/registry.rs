//! Per-client index of listeners, keyed by subscription target and event.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use cozy_realtime_shared::{ClientFrame, EntityRef, EventName};
use serde_json::Value;

/// Callback invoked with the changed document (`None` when the stack sent
/// no document, as for some deletions).
///
/// Handlers are compared by identity: keep a clone of the handler given to
/// `subscribe` to be able to `unsubscribe` it later.
#[derive(Clone)]
pub struct Handler(Arc<dyn Fn(Option<&Value>) + Send + Sync>);

impl Handler {
    pub fn new(f: impl Fn(Option<&Value>) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn call(&self, doc: Option<&Value>) {
        (self.0)(doc)
    }
}

impl PartialEq for Handler {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Handler {}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handler({:p})", Arc::as_ptr(&self.0))
    }
}

struct Entry {
    entity: EntityRef,
    handlers: HashMap<EventName, Vec<Handler>>,
}

impl Entry {
    fn is_empty(&self) -> bool {
        self.handlers.values().all(Vec::is_empty)
    }
}

/// Listeners by normalized key (`doctype` or `doctype/id`).
///
/// A key lives exactly as long as it has at least one handler, under any
/// event name. Delivery only ever uses exact key equality: a listener on
/// `io.cozy.files` does not see events for `io.cozy.files/42` and the other
/// way around.
#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: Mutex<BTreeMap<String, Entry>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a handler. Registering the same handler twice stores it twice.
    pub fn add_handler(&self, entity: &EntityRef, event: EventName, handler: Handler) {
        self.entries()
            .entry(entity.key())
            .or_insert_with(|| Entry {
                entity: entity.clone(),
                handlers: HashMap::new(),
            })
            .handlers
            .entry(event)
            .or_default()
            .push(handler);
    }

    /// Remove one stored occurrence of `handler`, pruning the key once it has
    /// no handler left. Returns whether a handler was removed.
    pub fn remove_handler(&self, entity: &EntityRef, event: EventName, handler: &Handler) -> bool {
        let key = entity.key();
        let mut entries = self.entries();
        let Some(entry) = entries.get_mut(&key) else {
            return false;
        };

        let removed = match entry.handlers.get_mut(&event) {
            Some(handlers) => match handlers.iter().position(|h| h == handler) {
                Some(index) => {
                    handlers.remove(index);
                    true
                }
                None => false,
            },
            None => false,
        };

        if entry.is_empty() {
            entries.remove(&key);
        }
        removed
    }

    /// Invoke, in registration order, every handler registered for exactly
    /// `entity` and `event`. Returns how many ran.
    ///
    /// Handlers run after the registry lock is released, so they may
    /// subscribe or unsubscribe themselves.
    pub fn handle(&self, entity: &EntityRef, event: EventName, doc: Option<&Value>) -> usize {
        let handlers: Vec<Handler> = self
            .entries()
            .get(&entity.key())
            .and_then(|entry| entry.handlers.get(&event))
            .cloned()
            .unwrap_or_default();

        for handler in &handlers {
            handler.call(doc);
        }
        handlers.len()
    }

    /// Subscribe frames for every live key, in key order.
    ///
    /// Built lazily from a snapshot of the keys, so calling it again after a
    /// mutation starts over from the current state.
    pub fn to_subscribe_messages(&self) -> impl Iterator<Item = ClientFrame> {
        let entities: Vec<EntityRef> = self.entries().values().map(|e| e.entity.clone()).collect();
        entities.into_iter().map(ClientFrame::Subscribe)
    }

    pub fn contains(&self, entity: &EntityRef) -> bool {
        self.entries().contains_key(&entity.key())
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn recording(log: &Arc<Mutex<Vec<String>>>, name: &'static str) -> Handler {
        let log = log.clone();
        Handler::new(move |doc| {
            log.lock()
                .unwrap()
                .push(format!("{}:{}", name, doc.map(|d| d.to_string()).unwrap_or_default()));
        })
    }

    fn files_42() -> EntityRef {
        EntityRef::document("io.cozy.files", "42")
    }

    #[test]
    fn handlers_run_once_each_in_registration_order() {
        let registry = SubscriptionRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        registry.add_handler(&files_42(), EventName::Updated, recording(&log, "first"));
        registry.add_handler(&files_42(), EventName::Updated, recording(&log, "second"));

        let doc = json!({"name": "x"});
        let ran = registry.handle(&files_42(), EventName::Updated, Some(&doc));

        assert_eq!(ran, 2);
        assert_eq!(
            *log.lock().unwrap(),
            vec![r#"first:{"name":"x"}"#, r#"second:{"name":"x"}"#]
        );
    }

    #[test]
    fn duplicate_registration_is_invoked_twice() {
        let registry = SubscriptionRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let handler = recording(&log, "dup");
        registry.add_handler(&files_42(), EventName::Created, handler.clone());
        registry.add_handler(&files_42(), EventName::Created, handler.clone());

        registry.handle(&files_42(), EventName::Created, None);
        assert_eq!(log.lock().unwrap().len(), 2);

        // Removing drops a single occurrence.
        assert!(registry.remove_handler(&files_42(), EventName::Created, &handler));
        registry.handle(&files_42(), EventName::Created, None);
        assert_eq!(log.lock().unwrap().len(), 3);
        assert!(registry.contains(&files_42()));
    }

    #[test]
    fn delivery_requires_exact_key_and_event() {
        let registry = SubscriptionRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        registry.add_handler(&files_42(), EventName::Updated, recording(&log, "doc"));
        registry.add_handler(
            &EntityRef::all("io.cozy.files"),
            EventName::Updated,
            recording(&log, "type"),
        );

        registry.handle(&files_42(), EventName::Updated, None);
        assert_eq!(*log.lock().unwrap(), vec!["doc:"]);

        registry.handle(&EntityRef::all("io.cozy.files"), EventName::Updated, None);
        assert_eq!(*log.lock().unwrap(), vec!["doc:", "type:"]);

        assert_eq!(registry.handle(&files_42(), EventName::Deleted, None), 0);
        assert_eq!(
            registry.handle(&EntityRef::document("io.cozy.files", "43"), EventName::Updated, None),
            0
        );
    }

    #[test]
    fn removing_only_listener_prunes_key() {
        let registry = SubscriptionRegistry::new();
        let handler = Handler::new(|_| {});
        registry.add_handler(&files_42(), EventName::Updated, handler.clone());
        registry.add_handler(
            &EntityRef::all("io.cozy.jobs"),
            EventName::Created,
            Handler::new(|_| {}),
        );
        assert_eq!(registry.to_subscribe_messages().count(), 2);

        assert!(registry.remove_handler(&files_42(), EventName::Updated, &handler));

        let frames: Vec<ClientFrame> = registry.to_subscribe_messages().collect();
        assert_eq!(frames, vec![ClientFrame::Subscribe(EntityRef::all("io.cozy.jobs"))]);
        assert!(!registry.contains(&files_42()));
    }

    #[test]
    fn key_survives_while_another_event_has_listeners() {
        let registry = SubscriptionRegistry::new();
        let updated = Handler::new(|_| {});
        registry.add_handler(&files_42(), EventName::Updated, updated.clone());
        registry.add_handler(&files_42(), EventName::Deleted, Handler::new(|_| {}));

        registry.remove_handler(&files_42(), EventName::Updated, &updated);
        assert!(registry.contains(&files_42()));
    }

    #[test]
    fn removing_unknown_handler_is_a_noop() {
        let registry = SubscriptionRegistry::new();
        registry.add_handler(&files_42(), EventName::Updated, Handler::new(|_| {}));

        let stranger = Handler::new(|_| {});
        assert!(!registry.remove_handler(&files_42(), EventName::Updated, &stranger));
        assert!(!registry.remove_handler(&files_42(), EventName::Deleted, &stranger));
        assert!(!registry.remove_handler(
            &EntityRef::all("io.cozy.jobs"),
            EventName::Updated,
            &stranger
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn subscribe_messages_are_restartable() {
        let registry = SubscriptionRegistry::new();
        registry.add_handler(
            &EntityRef::all("io.cozy.jobs"),
            EventName::Updated,
            Handler::new(|_| {}),
        );

        let first: Vec<ClientFrame> = registry.to_subscribe_messages().collect();
        registry.add_handler(&files_42(), EventName::Updated, Handler::new(|_| {}));
        let second: Vec<ClientFrame> = registry.to_subscribe_messages().collect();

        assert_eq!(first.len(), 1);
        assert_eq!(
            second,
            vec![
                ClientFrame::Subscribe(files_42()),
                ClientFrame::Subscribe(EntityRef::all("io.cozy.jobs")),
            ]
        );
    }

    #[test]
    fn handler_may_unsubscribe_itself() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let slot: Arc<Mutex<Option<Handler>>> = Arc::new(Mutex::new(None));

        let handler = {
            let registry = registry.clone();
            let slot = slot.clone();
            Handler::new(move |_| {
                if let Some(me) = slot.lock().unwrap().take() {
                    registry.remove_handler(&files_42(), EventName::Updated, &me);
                }
            })
        };
        *slot.lock().unwrap() = Some(handler.clone());
        registry.add_handler(&files_42(), EventName::Updated, handler);

        assert_eq!(registry.handle(&files_42(), EventName::Updated, None), 1);
        assert!(registry.is_empty());
    }
}
