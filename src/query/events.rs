//! Cache event feed.
//!
//! Every cache mutation is published as a [`CacheEvent`] to the listeners registered on the
//! cache. The feed is passive: listeners receive a snapshot of the entry and cannot mutate it
//! through the event.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde::Serialize;
use time::OffsetDateTime;
use tracing::{debug, warn};
use uuid::Uuid;

use super::key::{QueryHash, QueryKey};
use super::lock::mutex_lock;
use super::state::{ActionKind, QueryState};

const SOURCE: &str = "query::events";

/// Monotonic epoch for ordering events within one cache.
pub type Epoch = u64;

/// Point-in-time projection of an entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuerySnapshot {
    pub hash: QueryHash,
    pub key: QueryKey,
    pub state: QueryState,
    pub observers: usize,
    /// Stale for at least one observer, or by the entry's own stale time when unobserved.
    pub is_stale: bool,
}

impl QuerySnapshot {
    pub fn is_active(&self) -> bool {
        self.observers > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EventKind {
    /// An entry was created.
    Added,
    /// An entry was removed, explicitly or by garbage collection.
    Removed,
    /// The entry's state changed.
    Updated { action: ActionKind },
    ObserverAdded,
    ObserverRemoved,
    /// An observer's view changed without a state transition (it went stale).
    ObserverResultsUpdated,
}

#[derive(Debug, Clone)]
pub struct CacheEvent {
    /// Unique identifier (UUIDv4).
    pub id: Uuid,
    pub epoch: Epoch,
    pub kind: EventKind,
    pub query: QuerySnapshot,
    pub timestamp: OffsetDateTime,
}

impl CacheEvent {
    pub fn new(kind: EventKind, query: QuerySnapshot, epoch: Epoch) -> Self {
        Self {
            id: Uuid::new_v4(),
            epoch,
            kind,
            query,
            timestamp: OffsetDateTime::now_utc(),
        }
    }
}

/// Cache event callback.
pub type EventListener = Arc<dyn Fn(&CacheEvent) + Send + Sync>;

/// Fan-out of cache events to registered listeners.
pub(crate) struct EventBus {
    listeners: Mutex<Vec<(u64, EventListener)>>,
    epoch_counter: AtomicU64,
    listener_counter: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            epoch_counter: AtomicU64::new(0),
            listener_counter: AtomicU64::new(0),
        }
    }

    pub fn next_epoch(&self) -> Epoch {
        self.epoch_counter.fetch_add(1, Ordering::SeqCst)
    }

    pub fn subscribe(&self, listener: EventListener) -> u64 {
        let id = self.listener_counter.fetch_add(1, Ordering::Relaxed);
        mutex_lock(&self.listeners, SOURCE, "subscribe").push((id, listener));
        id
    }

    pub fn unsubscribe(&self, id: u64) -> bool {
        let mut listeners = mutex_lock(&self.listeners, SOURCE, "unsubscribe");
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Publishes an event to every listener registered at the time of the call.
    ///
    /// Listeners run outside the listener lock, so they may subscribe or unsubscribe.
    pub fn publish(&self, kind: EventKind, query: QuerySnapshot) {
        let listeners: Vec<EventListener> = mutex_lock(&self.listeners, SOURCE, "publish")
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();

        let event = CacheEvent::new(kind, query, self.next_epoch());
        debug!(
            event_id = %event.id,
            event_epoch = event.epoch,
            event_kind = ?event.kind,
            query_hash = %event.query.hash,
            listeners = listeners.len(),
            "Cache event published"
        );

        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                warn!(
                    target_module = SOURCE,
                    event_epoch = event.epoch,
                    event_kind = ?event.kind,
                    "Cache event listener panicked"
                );
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps a cache listener registered; unsubscribes on drop.
#[must_use = "dropping a Subscription unsubscribes the listener"]
pub struct Subscription {
    bus: Weak<EventBus>,
    id: u64,
}

impl Subscription {
    pub(crate) fn new(bus: &Arc<EventBus>, id: u64) -> Self {
        Self {
            bus: Arc::downgrade(bus),
            id,
        }
    }

    /// Idempotent.
    pub fn unsubscribe(&self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(name: &str) -> QuerySnapshot {
        let key = QueryKey::from(name);
        QuerySnapshot {
            hash: key.hash(),
            key,
            state: QueryState::default(),
            observers: 0,
            is_stale: true,
        }
    }

    fn recording(bus: &EventBus) -> (u64, Arc<Mutex<Vec<CacheEvent>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let id = bus.subscribe(Arc::new(move |event: &CacheEvent| {
            sink.lock().expect("sink lock").push(event.clone());
        }));
        (id, seen)
    }

    #[test]
    fn epochs_are_monotonic() {
        let bus = EventBus::new();
        let (_, seen) = recording(&bus);

        bus.publish(EventKind::Added, snapshot("a"));
        bus.publish(EventKind::Removed, snapshot("a"));

        let seen = seen.lock().expect("sink lock");
        assert_eq!(seen.len(), 2);
        assert!(seen[0].epoch < seen[1].epoch);
        assert_eq!(seen[1].kind, EventKind::Removed);
        assert!(!seen[0].id.is_nil());
    }

    #[test]
    fn unsubscribed_listener_stops_receiving() {
        let bus = EventBus::new();
        let (id, seen) = recording(&bus);

        bus.publish(EventKind::Added, snapshot("a"));
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.publish(EventKind::Removed, snapshot("a"));

        assert_eq!(seen.lock().expect("sink lock").len(), 1);
    }

    #[test]
    fn subscription_guard_unsubscribes_on_drop() {
        let bus = Arc::new(EventBus::new());
        let (id, seen) = recording(&bus);
        drop(Subscription::new(&bus, id));

        bus.publish(EventKind::Added, snapshot("a"));
        assert!(seen.lock().expect("sink lock").is_empty());
    }

    #[test]
    fn event_kind_serializes_with_type_tag() {
        let json = serde_json::to_string(&EventKind::Updated {
            action: ActionKind::Success,
        })
        .expect("serializable");
        assert_eq!(json, r#"{"type":"updated","action":"success"}"#);
    }

    #[test]
    fn panicking_listener_does_not_starve_later_ones() {
        fn failing(_: &CacheEvent) {
            panic!("listener failure");
        }
        let bus = EventBus::new();
        bus.subscribe(Arc::new(failing));
        let (_, seen) = recording(&bus);

        bus.publish(EventKind::Added, snapshot("a"));
        bus.publish(EventKind::Removed, snapshot("a"));
        assert_eq!(seen.lock().expect("sink lock").len(), 2);
    }

    #[test]
    fn publish_recovers_from_poisoned_lock() {
        let bus = EventBus::new();
        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = bus.listeners.lock().expect("lock should be acquired");
            panic!("poison listeners lock");
        }));

        let (_, seen) = recording(&bus);
        bus.publish(EventKind::Added, snapshot("a"));
        assert_eq!(seen.lock().expect("sink lock").len(), 1);
    }
}
