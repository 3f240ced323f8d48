//! Observer handles returned to consumers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

use super::cache::QueryCache;
use super::config::QueryOptions;
use super::entry::Query;
use super::error::QueryError;
use super::fetch::QueryFn;
use super::key::{QueryHash, QueryKey};
use super::registry::{Listener, ObserverSlot};
use super::state::QueryResult;

/// One consumer's subscription to a key.
///
/// The listener receives the current result once on attach and then every transition of the
/// entry. Dropping the observer unsubscribes it.
pub struct QueryObserver {
    query: Arc<Query>,
    slot_id: u64,
    stale_time: Duration,
    interval: Option<AbortHandle>,
    detached: AtomicBool,
}

impl QueryObserver {
    pub(crate) fn attach(
        cache: &QueryCache,
        key: &QueryKey,
        query_fn: QueryFn,
        options: &QueryOptions,
        listener: Listener,
    ) -> Result<Self, QueryError> {
        let handle = Handle::try_current().map_err(|_| QueryError::NoRuntime)?;
        let resolved = options.resolve(cache.config());
        let slot = Arc::new(ObserverSlot::new(resolved.clone(), listener));

        let query = loop {
            let (query, _) = cache.build(key, Some(options));
            if query.subscribe(slot.clone(), query_fn.clone()) {
                break query;
            }
            debug!(query_hash = %query.hash(), "Entry removed during attach, retrying");
        };

        let interval = resolved
            .refetch_interval
            .filter(|_| resolved.enabled && !cache.environment().is_server())
            .map(|every| spawn_refetch_interval(&handle, &query, every));

        Ok(Self {
            query,
            slot_id: slot.id,
            stale_time: resolved.stale_time,
            interval,
            detached: AtomicBool::new(false),
        })
    }

    pub fn query(&self) -> &Arc<Query> {
        &self.query
    }

    pub fn hash(&self) -> &QueryHash {
        self.query.hash()
    }

    pub fn key(&self) -> &QueryKey {
        self.query.key()
    }

    /// The entry as this observer sees it now.
    pub fn current_result(&self) -> QueryResult {
        self.query.result_for(self.slot_id).unwrap_or_else(|| {
            let state = self.query.state();
            let stale = self.query.is_stale_by_time(self.stale_time);
            QueryResult::new(&state, stale)
        })
    }

    /// Fetches again, joining a fetch already in flight.
    pub async fn refetch(&self) -> Result<Value, QueryError> {
        let (shared, _) = self.query.fetch(None)?;
        shared.await
    }

    pub fn is_subscribed(&self) -> bool {
        !self.detached.load(Ordering::Acquire)
    }

    /// Idempotent. Once this returns the listener is never called again.
    pub fn unsubscribe(&self) {
        if self.detached.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(interval) = &self.interval {
            interval.abort();
        }
        self.query.unsubscribe(self.slot_id);
    }
}

impl Drop for QueryObserver {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for QueryObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryObserver")
            .field("hash", self.query.hash())
            .field("slot_id", &self.slot_id)
            .field("subscribed", &self.is_subscribed())
            .finish()
    }
}

fn spawn_refetch_interval(handle: &Handle, query: &Arc<Query>, every: Duration) -> AbortHandle {
    let query = Arc::downgrade(query);
    let task = handle.spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(query) = query.upgrade() else {
                break;
            };
            if query.is_removed() {
                break;
            }
            if let Err(err) = query.fetch(None) {
                debug!(query_hash = %query.hash(), error = %err, "Interval refetch skipped");
            }
        }
    });
    task.abort_handle()
}
