//! A single cache entry.
//!
//! A [`Query`] owns the state machine of one key together with its observers, its in-flight
//! fetch and its garbage-collection timer. All of that lives behind one mutex; callbacks and
//! event listeners are only ever invoked after the mutex is released.
//!
//! Notifications are queued while the lock is held and delivered afterwards by whichever
//! caller finds the queue idle, so transitions reach observers in the order they happened and
//! one transition is fully delivered before the next one starts, even when a callback
//! re-enters the entry.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use metrics::counter;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use super::cache::CacheShared;
use super::clock::Clock;
use super::config::{Environment, RefetchOnMount, ResolvedOptions};
use super::error::{FetchError, QueryError};
use super::events::{EventBus, EventKind, QuerySnapshot};
use super::fetch::{self, FetchTask, InFlight, QueryFn, RetryPolicy, SharedFetch};
use super::key::{QueryHash, QueryKey};
use super::lock::mutex_lock;
use super::registry::{ObserverRegistry, ObserverSlot};
use super::state::{Action, ActionKind, QueryResult, QueryState};

const SOURCE: &str = "query::entry";

const METRIC_FETCH_TOTAL: &str = "hydrocache_fetch_total";
const METRIC_FETCH_DEDUPLICATED_TOTAL: &str = "hydrocache_fetch_deduplicated_total";
const METRIC_FETCH_CANCELLED_TOTAL: &str = "hydrocache_fetch_cancelled_total";

static NEXT_FETCH_ID: AtomicU64 = AtomicU64::new(1);

/// Cache-level collaborators every entry needs.
#[derive(Clone)]
pub(crate) struct EntryContext {
    pub clock: Clock,
    pub environment: Environment,
    pub events: Arc<EventBus>,
    pub cache: Weak<CacheShared>,
}

pub struct Query {
    hash: QueryHash,
    key: QueryKey,
    seq: u64,
    context: EntryContext,
    inner: Mutex<QueryInner>,
    outbox: Mutex<Outbox>,
}

struct QueryInner {
    state: QueryState,
    stale_time: Duration,
    cache_time: Duration,
    retry: RetryPolicy,
    query_fn: Option<QueryFn>,
    observers: ObserverRegistry,
    fetch: Option<InFlight>,
    gc: Option<AbortHandle>,
    gc_generation: u64,
    /// Re-checks freshness of an unobserved entry.
    stale_timer: Option<AbortHandle>,
    removed: bool,
}

#[derive(Default)]
struct Outbox {
    pending: VecDeque<Notification>,
    delivering: bool,
}

struct Notification {
    deliveries: Vec<(Arc<ObserverSlot>, QueryResult)>,
    kind: EventKind,
    snapshot: QuerySnapshot,
}

enum Targets<'a> {
    All,
    One(&'a Arc<ObserverSlot>),
    Nobody,
}

impl Query {
    pub(crate) fn new(
        key: QueryKey,
        seq: u64,
        options: &ResolvedOptions,
        context: EntryContext,
    ) -> Self {
        Self {
            hash: key.hash(),
            key,
            seq,
            context,
            inner: Mutex::new(QueryInner {
                state: QueryState::default(),
                stale_time: options.stale_time,
                cache_time: options.cache_time,
                retry: options.retry.clone(),
                query_fn: None,
                observers: ObserverRegistry::default(),
                fetch: None,
                gc: None,
                gc_generation: 0,
                stale_timer: None,
                removed: false,
            }),
            outbox: Mutex::new(Outbox::default()),
        }
    }

    pub fn hash(&self) -> &QueryHash {
        &self.hash
    }

    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    /// Creation order within the owning cache.
    pub(crate) fn seq(&self) -> u64 {
        self.seq
    }

    pub fn state(&self) -> QueryState {
        self.lock("state").state.clone()
    }

    pub fn snapshot(&self) -> QuerySnapshot {
        let inner = self.lock("snapshot");
        self.snapshot_locked(&inner, self.context.clock.now_millis())
    }

    pub fn observer_count(&self) -> usize {
        self.lock("observer_count").observers.len()
    }

    pub fn is_active(&self) -> bool {
        self.observer_count() > 0
    }

    pub fn is_fetching(&self) -> bool {
        self.lock("is_fetching").fetch.is_some()
    }

    /// Stale for at least one observer, or by the entry's own stale time when unobserved.
    pub fn is_stale(&self) -> bool {
        let inner = self.lock("is_stale");
        inner.is_stale(self.context.clock.now_millis())
    }

    /// Whether data fetched at `data_updated_at` is still fresh for `stale_time`.
    pub fn is_stale_by_time(&self, stale_time: Duration) -> bool {
        self.lock("is_stale_by_time")
            .state
            .is_stale_by_time(stale_time, self.context.clock.now_millis())
    }

    /// True once the entry left its cache. A removed entry never changes again.
    pub fn is_removed(&self) -> bool {
        self.lock("is_removed").removed
    }

    pub(crate) fn has_query_fn(&self) -> bool {
        self.lock("has_query_fn").query_fn.is_some()
    }

    pub(crate) fn has_enabled_observer(&self) -> bool {
        self.lock("has_enabled_observer")
            .observers
            .iter()
            .any(|slot| slot.options.enabled)
    }

    /// Whether an observer opted into window-focus refetches and sees the entry as stale.
    pub(crate) fn wants_focus_refetch(&self) -> bool {
        let inner = self.lock("wants_focus_refetch");
        let now = self.context.clock.now_millis();
        inner.observers.iter().any(|slot| {
            slot.options.enabled
                && slot.options.refetch_on_window_focus
                && inner.state.is_stale_by_time(slot.options.stale_time, now)
        })
    }

    /// Current result as seen by observer `slot_id`.
    pub(crate) fn result_for(&self, slot_id: u64) -> Option<QueryResult> {
        let inner = self.lock("result_for");
        let slot = inner.observers.get(slot_id)?;
        let now = self.context.clock.now_millis();
        Some(inner.result_for(slot, now))
    }

    /// Merges options from a new consumer: the longest cache time wins, the latest stale time
    /// and retry policy replace the previous ones.
    pub(crate) fn apply_options(&self, options: &ResolvedOptions) {
        let mut inner = self.lock("apply_options");
        inner.merge_options(options);
    }

    /// Starts a fetch, or joins the one already in flight.
    ///
    /// Returns the shared result and whether this call started new work.
    pub(crate) fn fetch(
        self: &Arc<Self>,
        query_fn: Option<QueryFn>,
    ) -> Result<(SharedFetch, bool), QueryError> {
        let handle = Handle::try_current().map_err(|_| QueryError::NoRuntime)?;
        let mut inner = self.lock("fetch");
        if let Some(query_fn) = query_fn {
            inner.query_fn = Some(query_fn);
        }

        let (shared, started) = self.begin_fetch(&mut inner, &handle)?;
        if started {
            self.enqueue(
                &inner,
                EventKind::Updated {
                    action: ActionKind::Fetch,
                },
                Targets::All,
            );
        }
        drop(inner);

        self.flush();
        Ok((shared, started))
    }

    fn begin_fetch(
        self: &Arc<Self>,
        inner: &mut QueryInner,
        handle: &Handle,
    ) -> Result<(SharedFetch, bool), QueryError> {
        if inner.removed {
            return Err(QueryError::Cancelled);
        }
        if let Some(flight) = &inner.fetch {
            counter!(METRIC_FETCH_DEDUPLICATED_TOTAL).increment(1);
            debug!(
                query_hash = %self.hash,
                fetch_id = flight.id,
                "Joined in-flight query fetch"
            );
            return Ok((flight.shared.clone(), false));
        }
        let Some(query_fn) = inner.query_fn.clone() else {
            return Err(QueryError::Fetch(FetchError::with_code(
                "no query function registered for this key",
                "missing_query_fn",
            )));
        };

        let id = NEXT_FETCH_ID.fetch_add(1, Ordering::Relaxed);
        let revert_status = inner.state.status;
        inner.state.apply(Action::Fetch);

        let (shared, abort) = fetch::spawn(
            handle,
            FetchTask {
                query: Arc::downgrade(self),
                id,
                query_fn,
                retry: inner.retry.clone(),
            },
        );
        inner.fetch = Some(InFlight {
            id,
            shared: shared.clone(),
            abort,
            revert_status,
        });

        counter!(METRIC_FETCH_TOTAL).increment(1);
        debug!(query_hash = %self.hash, fetch_id = id, "Query fetch started");
        Ok((shared, true))
    }

    /// Records a failed attempt of fetch `id`. Returns false if that fetch is no longer current.
    pub(crate) fn record_failure(&self, id: u64, failure_count: u32) -> bool {
        let mut inner = self.lock("record_failure");
        if !inner.is_current_fetch(id) {
            return false;
        }
        inner.state.apply(Action::Failed { failure_count });
        true
    }

    /// Applies the outcome of fetch `id`, unless it was cancelled or superseded meanwhile.
    pub(crate) fn settle(
        self: &Arc<Self>,
        id: u64,
        outcome: Result<Value, FetchError>,
        failure_count: u32,
    ) -> Result<Value, QueryError> {
        let now = self.context.clock.now_millis();
        let mut inner = self.lock("settle");
        if !inner.is_current_fetch(id) {
            debug!(query_hash = %self.hash, fetch_id = id, "Discarded superseded fetch result");
            return Err(QueryError::Cancelled);
        }
        inner.fetch = None;

        let (action, result) = match outcome {
            Ok(data) => (
                Action::Success {
                    data: data.clone(),
                    updated_at: now,
                },
                Ok(data),
            ),
            Err(error) => {
                inner.state.apply(Action::Failed { failure_count });
                (
                    Action::Error {
                        error: error.clone(),
                        updated_at: now,
                    },
                    Err(QueryError::Fetch(error)),
                )
            }
        };
        let kind = action.kind();
        inner.state.apply(action);
        debug!(
            query_hash = %self.hash,
            fetch_id = id,
            status = inner.state.status.as_str(),
            failure_count,
            "Query fetch settled"
        );

        self.enqueue(&inner, EventKind::Updated { action: kind }, Targets::All);
        self.arm_all_stale_timers(&mut inner);
        if inner.observers.is_empty() {
            self.schedule_gc(&mut inner);
        }
        drop(inner);

        self.flush();
        result
    }

    /// Cancels the in-flight fetch and reverts the entry to its pre-fetch status.
    ///
    /// Returns false if nothing was in flight.
    pub(crate) fn cancel(self: &Arc<Self>, silent: bool) -> bool {
        let mut inner = self.lock("cancel");
        if !self.abort_fetch(&mut inner) {
            return false;
        }
        if !silent {
            self.enqueue(
                &inner,
                EventKind::Updated {
                    action: ActionKind::Revert,
                },
                Targets::All,
            );
        }
        if inner.observers.is_empty() {
            self.schedule_gc(&mut inner);
        }
        drop(inner);

        self.flush();
        true
    }

    pub(crate) fn invalidate(&self) {
        let mut inner = self.lock("invalidate");
        if inner.removed {
            return;
        }
        inner.state.apply(Action::Invalidate);
        Self::cancel_stale_timers(&mut inner);
        self.enqueue(
            &inner,
            EventKind::Updated {
                action: ActionKind::Invalidate,
            },
            Targets::All,
        );
        drop(inner);

        self.flush();
    }

    /// Installs `data` as a successful result, cancelling any fetch in flight.
    pub(crate) fn set_data(self: &Arc<Self>, data: Value) {
        let now = self.context.clock.now_millis();
        let mut inner = self.lock("set_data");
        if inner.removed {
            return;
        }
        let cancelled = self.abort_fetch(&mut inner);
        let action = Action::Success {
            data,
            updated_at: now,
        };
        let kind = action.kind();
        inner.state.apply(action);

        self.enqueue(&inner, EventKind::Updated { action: kind }, Targets::All);
        self.arm_all_stale_timers(&mut inner);
        // A collection attempt refused while the fetch ran has to be retried.
        if cancelled && inner.observers.is_empty() {
            self.schedule_gc(&mut inner);
        }
        drop(inner);

        self.flush();
    }

    /// Installs a result produced elsewhere without running a fetch.
    pub(crate) fn restore(
        self: &Arc<Self>,
        data: Option<Value>,
        error: Option<FetchError>,
        data_updated_at: i64,
        error_updated_at: i64,
    ) {
        let mut inner = self.lock("restore");
        if inner.removed {
            return;
        }
        let action = Action::Restore {
            data,
            error,
            data_updated_at,
            error_updated_at,
        };
        let kind = action.kind();
        inner.state.apply(action);

        self.enqueue(&inner, EventKind::Updated { action: kind }, Targets::All);
        self.arm_all_stale_timers(&mut inner);
        drop(inner);

        self.flush();
    }

    /// Attaches an observer slot and fetches if that observer needs data.
    ///
    /// Returns false if the entry was removed from its cache in the meantime; the caller
    /// should look the key up again.
    pub(crate) fn subscribe(self: &Arc<Self>, slot: Arc<ObserverSlot>, query_fn: QueryFn) -> bool {
        let mut inner = self.lock("subscribe");
        if inner.removed {
            return false;
        }
        inner.query_fn = Some(query_fn);
        inner.merge_options(&slot.options);
        if inner.observers.add(slot.clone()) {
            Self::cancel_gc(&mut inner);
            if let Some(timer) = inner.stale_timer.take() {
                timer.abort();
            }
        }

        let now = self.context.clock.now_millis();
        let stale = inner.state.is_stale_by_time(slot.options.stale_time, now);
        let should_fetch = slot.options.enabled
            && !self.context.environment.is_server()
            && (!inner.state.has_data()
                || match slot.options.refetch_on_mount {
                    RefetchOnMount::Never => false,
                    RefetchOnMount::IfStale => stale,
                    RefetchOnMount::Always => true,
                });

        let mut started = false;
        if should_fetch {
            match Handle::try_current() {
                Ok(handle) => match self.begin_fetch(&mut inner, &handle) {
                    Ok((_, fresh_fetch)) => started = fresh_fetch,
                    Err(err) => {
                        warn!(query_hash = %self.hash, error = %err, "Observer fetch not started");
                    }
                },
                Err(_) => {
                    warn!(query_hash = %self.hash, "Observer attached outside a tokio runtime");
                }
            }
        }

        if started {
            self.enqueue(&inner, EventKind::ObserverAdded, Targets::Nobody);
            self.enqueue(
                &inner,
                EventKind::Updated {
                    action: ActionKind::Fetch,
                },
                Targets::All,
            );
        } else {
            self.enqueue(&inner, EventKind::ObserverAdded, Targets::One(&slot));
        }
        self.arm_stale_timer(&inner, &slot);
        drop(inner);

        self.flush();
        true
    }

    /// Detaches an observer slot. Unknown ids are ignored.
    ///
    /// When the last observer leaves, any fetch in flight is cancelled silently and garbage
    /// collection is scheduled.
    pub(crate) fn unsubscribe(self: &Arc<Self>, slot_id: u64) {
        let mut inner = self.lock("unsubscribe");
        let Some(slot) = inner.observers.remove(slot_id) else {
            return;
        };
        slot.deactivate();
        if inner.removed {
            return;
        }
        if inner.observers.is_empty() {
            self.abort_fetch(&mut inner);
            self.schedule_gc(&mut inner);
            self.arm_entry_stale_timer(&mut inner);
        }
        self.enqueue(&inner, EventKind::ObserverRemoved, Targets::Nobody);
        drop(inner);

        self.flush();
    }

    /// Schedules collection of a freshly created entry that nobody observes yet.
    pub(crate) fn schedule_initial_gc(self: &Arc<Self>) {
        let mut inner = self.lock("schedule_initial_gc");
        if inner.observers.is_empty() && inner.gc.is_none() && inner.fetch.is_none() {
            self.schedule_gc(&mut inner);
        }
    }

    /// Marks the entry removed, cancelling its fetch and timers.
    ///
    /// With `gc_generation` set, only succeeds if that garbage-collection timer is still the
    /// current one and the entry is unobserved and idle. Runs while the cache map holds the
    /// entry's slot, so it must not touch the map.
    pub(crate) fn retire(&self, gc_generation: Option<u64>) -> bool {
        let mut inner = self.lock("retire");
        if inner.removed {
            return false;
        }
        if let Some(generation) = gc_generation {
            let collectable = inner.gc_generation == generation
                && inner.observers.is_empty()
                && inner.fetch.is_none();
            if !collectable {
                return false;
            }
        }

        inner.removed = true;
        self.abort_fetch(&mut inner);
        Self::cancel_gc(&mut inner);
        Self::cancel_stale_timers(&mut inner);
        true
    }

    fn abort_fetch(&self, inner: &mut QueryInner) -> bool {
        let Some(flight) = inner.fetch.take() else {
            return false;
        };
        flight.abort.abort();
        inner.state.apply(Action::Revert {
            status: flight.revert_status,
        });
        counter!(METRIC_FETCH_CANCELLED_TOTAL).increment(1);
        debug!(query_hash = %self.hash, fetch_id = flight.id, "Query fetch cancelled");
        true
    }

    fn schedule_gc(self: &Arc<Self>, inner: &mut QueryInner) {
        Self::cancel_gc(inner);
        if inner.removed
            || self.context.environment.is_server()
            || inner.cache_time == Duration::MAX
        {
            return;
        }
        let Ok(handle) = Handle::try_current() else {
            debug!(query_hash = %self.hash, "No runtime to schedule garbage collection");
            return;
        };

        let generation = inner.gc_generation;
        let delay = inner.cache_time;
        let query = Arc::downgrade(self);
        let cache = self.context.cache.clone();
        let task = handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if let (Some(cache), Some(query)) = (cache.upgrade(), query.upgrade()) {
                cache.evict(&query, generation);
            }
        });
        inner.gc = Some(task.abort_handle());
    }

    fn cancel_gc(inner: &mut QueryInner) {
        if let Some(gc) = inner.gc.take() {
            gc.abort();
        }
        inner.gc_generation = inner.gc_generation.wrapping_add(1);
    }

    fn arm_all_stale_timers(self: &Arc<Self>, inner: &mut QueryInner) {
        for slot in inner.observers.iter() {
            self.arm_stale_timer(inner, slot);
        }
        self.arm_entry_stale_timer(inner);
    }

    fn cancel_stale_timers(inner: &mut QueryInner) {
        for slot in inner.observers.iter() {
            slot.replace_stale_timer(None);
        }
        if let Some(timer) = inner.stale_timer.take() {
            timer.abort();
        }
    }

    /// Publishes a freshness update once an unobserved entry turns stale by its own stale time.
    fn arm_entry_stale_timer(self: &Arc<Self>, inner: &mut QueryInner) {
        if let Some(timer) = inner.stale_timer.take() {
            timer.abort();
        }
        if !inner.observers.is_empty() || self.context.environment.is_server() {
            return;
        }
        let clock = self.context.clock;
        let Some(deadline) = inner
            .state
            .stale_deadline(inner.stale_time)
            .filter(|deadline| *deadline > clock.now_millis())
        else {
            return;
        };
        let Ok(handle) = Handle::try_current() else {
            return;
        };

        let query = Arc::downgrade(self);
        let task = handle.spawn(async move {
            tokio::time::sleep(clock.until(deadline)).await;
            if let Some(query) = query.upgrade() {
                query.entry_stale_elapsed();
            }
        });
        inner.stale_timer = Some(task.abort_handle());
    }

    /// Re-delivers to `slot` once its view of the current data turns stale.
    fn arm_stale_timer(self: &Arc<Self>, inner: &QueryInner, slot: &Arc<ObserverSlot>) {
        if self.context.environment.is_server() {
            return;
        }
        let clock = self.context.clock;
        let deadline = match inner.state.stale_deadline(slot.options.stale_time) {
            Some(deadline) if deadline > clock.now_millis() => deadline,
            _ => {
                slot.replace_stale_timer(None);
                return;
            }
        };
        let Ok(handle) = Handle::try_current() else {
            return;
        };

        let query = Arc::downgrade(self);
        let slot_id = slot.id;
        let task = handle.spawn(async move {
            tokio::time::sleep(clock.until(deadline)).await;
            if let Some(query) = query.upgrade() {
                query.stale_elapsed(slot_id);
            }
        });
        slot.replace_stale_timer(Some(task.abort_handle()));
    }

    fn stale_elapsed(&self, slot_id: u64) {
        let inner = self.lock("stale_elapsed");
        if inner.removed {
            return;
        }
        let Some(slot) = inner.observers.get(slot_id).cloned() else {
            return;
        };
        if !inner
            .state
            .is_stale_by_time(slot.options.stale_time, self.context.clock.now_millis())
        {
            return;
        }
        self.enqueue(&inner, EventKind::ObserverResultsUpdated, Targets::One(&slot));
        drop(inner);

        self.flush();
    }

    fn entry_stale_elapsed(&self) {
        let mut inner = self.lock("entry_stale_elapsed");
        inner.stale_timer = None;
        if inner.removed
            || !inner.observers.is_empty()
            || !inner
                .state
                .is_stale_by_time(inner.stale_time, self.context.clock.now_millis())
        {
            return;
        }
        self.enqueue(&inner, EventKind::ObserverResultsUpdated, Targets::Nobody);
        drop(inner);

        self.flush();
    }

    /// Queues a notification. Must be called with the entry lock held so queue order matches
    /// transition order.
    fn enqueue(&self, inner: &QueryInner, kind: EventKind, targets: Targets<'_>) {
        let now = self.context.clock.now_millis();
        let deliveries = match targets {
            Targets::All => inner
                .observers
                .iter()
                .map(|slot| (slot.clone(), inner.result_for(slot, now)))
                .collect(),
            Targets::One(slot) => vec![(slot.clone(), inner.result_for(slot, now))],
            Targets::Nobody => Vec::new(),
        };
        let notification = Notification {
            deliveries,
            kind,
            snapshot: self.snapshot_locked(inner, now),
        };
        mutex_lock(&self.outbox, SOURCE, "enqueue")
            .pending
            .push_back(notification);
    }

    /// Delivers queued notifications unless another caller already is. Must be called without
    /// the entry lock held.
    fn flush(&self) {
        {
            let mut outbox = mutex_lock(&self.outbox, SOURCE, "flush");
            if outbox.delivering {
                return;
            }
            outbox.delivering = true;
        }

        loop {
            let next = {
                let mut outbox = mutex_lock(&self.outbox, SOURCE, "flush");
                match outbox.pending.pop_front() {
                    Some(next) => next,
                    None => {
                        outbox.delivering = false;
                        return;
                    }
                }
            };
            for (slot, result) in &next.deliveries {
                slot.deliver(result);
            }
            self.context.events.publish(next.kind, next.snapshot);
        }
    }

    fn snapshot_locked(&self, inner: &QueryInner, now: i64) -> QuerySnapshot {
        QuerySnapshot {
            hash: self.hash.clone(),
            key: self.key.clone(),
            state: inner.state.clone(),
            observers: inner.observers.len(),
            is_stale: inner.is_stale(now),
        }
    }

    fn lock(&self, op: &'static str) -> std::sync::MutexGuard<'_, QueryInner> {
        mutex_lock(&self.inner, SOURCE, op)
    }
}

impl QueryInner {
    fn merge_options(&mut self, options: &ResolvedOptions) {
        self.stale_time = options.stale_time;
        self.cache_time = self.cache_time.max(options.cache_time);
        self.retry = options.retry.clone();
    }

    fn is_current_fetch(&self, id: u64) -> bool {
        !self.removed && self.fetch.as_ref().is_some_and(|flight| flight.id == id)
    }

    fn is_stale(&self, now: i64) -> bool {
        if self.observers.is_empty() {
            return self.state.is_stale_by_time(self.stale_time, now);
        }
        self.observers
            .iter()
            .any(|slot| self.state.is_stale_by_time(slot.options.stale_time, now))
    }

    fn result_for(&self, slot: &ObserverSlot, now: i64) -> QueryResult {
        let stale = self.state.is_stale_by_time(slot.options.stale_time, now);
        QueryResult::new(&self.state, stale)
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("hash", &self.hash)
            .field("seq", &self.seq)
            .finish_non_exhaustive()
    }
}

impl Drop for Query {
    fn drop(&mut self) {
        let inner = match self.inner.get_mut() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(gc) = inner.gc.take() {
            gc.abort();
        }
        if let Some(timer) = inner.stale_timer.take() {
            timer.abort();
        }
        if let Some(flight) = inner.fetch.take() {
            flight.abort.abort();
        }
    }
}
