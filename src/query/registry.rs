//! Per-entry observer registry.
//!
//! Slots are kept in subscription order. Delivery always works on a snapshot of the slots
//! taken under the entry lock, and every slot re-checks its own `active` flag right before its
//! callback runs, so a callback that unsubscribes itself or another observer never receives a
//! late delivery.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::task::AbortHandle;
use tracing::warn;

use super::config::ResolvedOptions;
use super::lock::mutex_lock;
use super::state::QueryResult;

const SOURCE: &str = "query::registry";

static NEXT_OBSERVER_ID: AtomicU64 = AtomicU64::new(1);

/// Observer callback. Invoked synchronously on every transition of the watched entry.
pub type Listener = Arc<dyn Fn(&QueryResult) + Send + Sync>;

pub(crate) struct ObserverSlot {
    pub id: u64,
    pub options: ResolvedOptions,
    listener: Listener,
    active: AtomicBool,
    stale_timer: Mutex<Option<AbortHandle>>,
}

impl ObserverSlot {
    pub fn new(options: ResolvedOptions, listener: Listener) -> Self {
        Self {
            id: NEXT_OBSERVER_ID.fetch_add(1, Ordering::Relaxed),
            options,
            listener,
            active: AtomicBool::new(true),
            stale_timer: Mutex::new(None),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Stops all further deliveries and timers for this slot.
    pub fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
        self.replace_stale_timer(None);
    }

    /// Runs the callback unless the slot was deactivated. A panicking callback is logged and
    /// does not affect other observers.
    pub fn deliver(&self, result: &QueryResult) {
        if !self.is_active() {
            return;
        }
        if catch_unwind(AssertUnwindSafe(|| (self.listener)(result))).is_err() {
            warn!(
                target_module = SOURCE,
                observer_id = self.id,
                status = result.status.as_str(),
                "Observer callback panicked"
            );
        }
    }

    /// Installs a new stale timer, aborting the previous one.
    pub fn replace_stale_timer(&self, timer: Option<AbortHandle>) {
        let previous = std::mem::replace(
            &mut *mutex_lock(&self.stale_timer, SOURCE, "replace_stale_timer"),
            timer,
        );
        if let Some(previous) = previous {
            previous.abort();
        }
    }
}

impl fmt::Debug for ObserverSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverSlot")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

/// Ordered set of observer slots attached to one entry.
#[derive(Debug, Default)]
pub(crate) struct ObserverRegistry {
    slots: Vec<Arc<ObserverSlot>>,
}

impl ObserverRegistry {
    /// Appends a slot. Returns true if the registry was empty before.
    pub fn add(&mut self, slot: Arc<ObserverSlot>) -> bool {
        let was_empty = self.slots.is_empty();
        self.slots.push(slot);
        was_empty
    }

    /// Removes a slot by id. Removing an unknown id is a no-op.
    pub fn remove(&mut self, id: u64) -> Option<Arc<ObserverSlot>> {
        let index = self.slots.iter().position(|slot| slot.id == id)?;
        Some(self.slots.remove(index))
    }

    pub fn get(&self, id: u64) -> Option<&Arc<ObserverSlot>> {
        self.slots.iter().find(|slot| slot.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ObserverSlot>> {
        self.slots.iter()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
