//! Read-only inspection of a cache.
//!
//! An [`Inspector`] listens to a cache's event feed, keeps a bounded log of recent events and
//! the freshness counts as of the latest one. Inspection tooling can poll it without touching
//! the cache.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde::Serialize;

use super::cache::{QueryCache, WeakQueryCache};
use super::events::{CacheEvent, QuerySnapshot, Subscription};
use super::lock::mutex_lock;

const SOURCE: &str = "query::inspect";

/// Entry counts of a cache at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub total: usize,
    pub fresh: usize,
    pub stale: usize,
    pub fetching: usize,
    /// Entries with at least one observer.
    pub active: usize,
    pub inactive: usize,
}

impl CacheStats {
    pub fn from_snapshots<'a>(snapshots: impl IntoIterator<Item = &'a QuerySnapshot>) -> Self {
        snapshots
            .into_iter()
            .fold(Self::default(), |mut stats, snapshot| {
                stats.total += 1;
                if snapshot.is_stale {
                    stats.stale += 1;
                } else {
                    stats.fresh += 1;
                }
                if snapshot.state.is_fetching() {
                    stats.fetching += 1;
                }
                if snapshot.is_active() {
                    stats.active += 1;
                } else {
                    stats.inactive += 1;
                }
                stats
            })
    }
}

pub struct Inspector {
    capacity: usize,
    log: Mutex<VecDeque<CacheEvent>>,
    stats: Mutex<CacheStats>,
    subscription: Mutex<Option<Subscription>>,
}

impl Inspector {
    /// Starts recording events of `cache`, keeping at most `capacity` of them.
    pub fn attach(cache: &QueryCache, capacity: usize) -> Arc<Self> {
        let inspector = Arc::new(Self {
            capacity,
            log: Mutex::new(VecDeque::with_capacity(capacity)),
            stats: Mutex::new(cache.stats()),
            subscription: Mutex::new(None),
        });

        let weak_inspector = Arc::downgrade(&inspector);
        let weak_cache = cache.downgrade();
        let subscription = cache.subscribe(move |event| {
            if let Some(inspector) = weak_inspector.upgrade() {
                inspector.record(event, &weak_cache);
            }
        });
        *mutex_lock(&inspector.subscription, SOURCE, "attach") = Some(subscription);
        inspector
    }

    fn record(&self, event: &CacheEvent, cache: &WeakQueryCache) {
        if self.capacity > 0 {
            let mut log = mutex_lock(&self.log, SOURCE, "record");
            if log.len() == self.capacity {
                log.pop_front();
            }
            log.push_back(event.clone());
        }
        if let Some(cache) = cache.upgrade() {
            let stats = cache.stats();
            *mutex_lock(&self.stats, SOURCE, "record") = stats;
        }
    }

    /// Counts as of the most recent event.
    pub fn stats(&self) -> CacheStats {
        *mutex_lock(&self.stats, SOURCE, "stats")
    }

    /// Removes up to `limit` events, oldest first.
    pub fn drain(&self, limit: usize) -> Vec<CacheEvent> {
        let mut log = mutex_lock(&self.log, SOURCE, "drain");
        let count = limit.min(log.len());
        log.drain(..count).collect()
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.log, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops recording. Already recorded events stay drainable.
    pub fn detach(&self) {
        mutex_lock(&self.subscription, SOURCE, "detach").take();
    }
}

impl std::fmt::Debug for Inspector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inspector")
            .field("capacity", &self.capacity)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
