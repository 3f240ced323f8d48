//! The query cache: one [`Query`] per hash.
//!
//! Lock order is map shard first, entry second. Entries never reach back into the map while
//! holding their own lock; removal runs [`Query::retire`] inside the map's `remove_if` so an
//! entry is marked removed exactly when it leaves the map.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use metrics::{counter, gauge};
use tracing::debug;

use super::clock::Clock;
use super::config::{CacheConfig, Environment, QueryOptions};
use super::entry::{EntryContext, Query};
use super::events::{CacheEvent, EventBus, EventKind, Subscription};
use super::filters::QueryFilters;
use super::inspect::CacheStats;
use super::key::{QueryHash, QueryKey};

const METRIC_QUERIES: &str = "hydrocache_queries";
const METRIC_GC_EVICT_TOTAL: &str = "hydrocache_gc_evict_total";

/// A set of queries sharing defaults, a clock and an event feed.
///
/// Cloning is cheap and yields a handle to the same cache. Separate `QueryCache::new` calls
/// produce caches that share nothing.
#[derive(Clone)]
pub struct QueryCache {
    shared: Arc<CacheShared>,
}

pub(crate) struct CacheShared {
    queries: DashMap<QueryHash, Arc<Query>>,
    config: CacheConfig,
    environment: Environment,
    clock: Clock,
    events: Arc<EventBus>,
    seq: AtomicU64,
}

/// Non-owning handle, for listeners and timers that must not keep a cache alive.
#[derive(Clone)]
pub(crate) struct WeakQueryCache(Weak<CacheShared>);

impl WeakQueryCache {
    pub fn upgrade(&self) -> Option<QueryCache> {
        self.0.upgrade().map(|shared| QueryCache { shared })
    }
}

impl QueryCache {
    pub fn new(config: CacheConfig) -> Self {
        let environment = config.environment();
        Self {
            shared: Arc::new(CacheShared {
                queries: DashMap::new(),
                config,
                environment,
                clock: Clock::new(),
                events: Arc::new(EventBus::new()),
                seq: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.shared.config
    }

    pub fn environment(&self) -> Environment {
        self.shared.environment
    }

    pub fn clock(&self) -> Clock {
        self.shared.clock
    }

    pub(crate) fn downgrade(&self) -> WeakQueryCache {
        WeakQueryCache(Arc::downgrade(&self.shared))
    }

    /// Returns the entry for `key`, creating an idle one without observers if needed.
    pub fn find_or_create(&self, key: &QueryKey) -> Arc<Query> {
        self.build(key, None).0
    }

    /// Like [`Self::find_or_create`], merging `options` into an existing entry. Also returns
    /// whether the entry was created by this call.
    pub(crate) fn build(
        &self,
        key: &QueryKey,
        options: Option<&QueryOptions>,
    ) -> (Arc<Query>, bool) {
        let resolved = options
            .cloned()
            .unwrap_or_default()
            .resolve(&self.shared.config);
        let hash = key.hash();
        let mut created = false;
        let query = self
            .shared
            .queries
            .entry(hash)
            .or_insert_with(|| {
                created = true;
                Arc::new(Query::new(
                    key.clone(),
                    self.shared.seq.fetch_add(1, Ordering::Relaxed),
                    &resolved,
                    self.entry_context(),
                ))
            })
            .clone();

        if created {
            debug!(query_hash = %query.hash(), "Query created");
            self.record_size();
            self.notify(EventKind::Added, &query);
            query.schedule_initial_gc();
        } else if options.is_some() {
            query.apply_options(&resolved);
        }
        (query, created)
    }

    fn entry_context(&self) -> EntryContext {
        EntryContext {
            clock: self.shared.clock,
            environment: self.shared.environment,
            events: self.shared.events.clone(),
            cache: Arc::downgrade(&self.shared),
        }
    }

    pub fn find(&self, hash: &QueryHash) -> Option<Arc<Query>> {
        self.shared
            .queries
            .get(hash)
            .map(|entry| entry.value().clone())
    }

    pub fn find_by_key(&self, key: &QueryKey) -> Option<Arc<Query>> {
        self.find(&key.hash())
    }

    /// All entries in creation order.
    pub fn get_all(&self) -> Vec<Arc<Query>> {
        let mut queries: Vec<Arc<Query>> = self
            .shared
            .queries
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        queries.sort_by_key(|query| query.seq());
        queries
    }

    /// Entries matching `filters`, in creation order.
    pub fn find_all(&self, filters: &QueryFilters) -> Vec<Arc<Query>> {
        self.get_all()
            .into_iter()
            .filter(|query| filters.matches(&query.snapshot()))
            .collect()
    }

    /// Evicts `query`, cancelling its fetch and timers. No-op if it is no longer cached.
    pub fn remove(&self, query: &Arc<Query>) -> bool {
        self.shared.remove_where(query, None)
    }

    pub fn clear(&self) {
        for query in self.get_all() {
            self.remove(&query);
        }
    }

    /// Publishes an event about `query` to every cache listener.
    pub fn notify(&self, kind: EventKind, query: &Query) {
        self.shared.events.publish(kind, query.snapshot());
    }

    /// Registers a listener for every cache event. Dropping the returned guard unsubscribes.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&CacheEvent) + Send + Sync + 'static,
    {
        let id = self.shared.events.subscribe(Arc::new(listener));
        Subscription::new(&self.shared.events, id)
    }

    pub fn stats(&self) -> CacheStats {
        let snapshots: Vec<_> = self
            .get_all()
            .iter()
            .map(|query| query.snapshot())
            .collect();
        CacheStats::from_snapshots(&snapshots)
    }

    pub fn len(&self) -> usize {
        self.shared.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.queries.is_empty()
    }

    fn record_size(&self) {
        self.shared.record_size();
    }
}

impl CacheShared {
    /// Garbage-collects `query` if timer `generation` is still current for it.
    pub(crate) fn evict(&self, query: &Arc<Query>, generation: u64) {
        if self.remove_where(query, Some(generation)) {
            counter!(METRIC_GC_EVICT_TOTAL).increment(1);
            debug!(query_hash = %query.hash(), "Query garbage-collected");
        }
    }

    fn remove_where(&self, query: &Arc<Query>, gc_generation: Option<u64>) -> bool {
        let removed = self
            .queries
            .remove_if(query.hash(), |_, existing| {
                Arc::ptr_eq(existing, query) && existing.retire(gc_generation)
            })
            .is_some();

        if removed {
            debug!(query_hash = %query.hash(), "Query removed");
            self.record_size();
            self.events.publish(EventKind::Removed, query.snapshot());
        }
        removed
    }

    fn record_size(&self) {
        gauge!(METRIC_QUERIES).set(self.queries.len() as f64);
    }
}

impl std::fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCache")
            .field("environment", &self.shared.environment)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}
