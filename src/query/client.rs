//! High-level facade over one cache.

use std::sync::Arc;

use futures::future::join_all;
use serde_json::Value;
use tracing::debug;

use super::cache::QueryCache;
use super::config::{CacheConfig, Environment, QueryOptions};
use super::error::QueryError;
use super::fetch::QueryFn;
use super::filters::QueryFilters;
use super::hydration::{self, DehydrateOptions, DehydratedState, HydrateOptions};
use super::key::QueryKey;
use super::observer::QueryObserver;
use super::state::{QueryResult, QueryState};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CancelOptions {
    /// Revert without notifying observers.
    pub silent: bool,
}

/// Entry point for consumers: watching, fetching, invalidating and moving snapshots.
#[derive(Debug, Clone)]
pub struct QueryClient {
    cache: QueryCache,
}

impl QueryClient {
    pub fn new(config: CacheConfig) -> Self {
        Self::with_cache(QueryCache::new(config))
    }

    pub fn with_cache(cache: QueryCache) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub fn environment(&self) -> Environment {
        self.cache.environment()
    }

    /// Attaches an observer to `key`; see [`QueryObserver`].
    ///
    /// Outside server context this fetches when the observer is enabled and the entry has no
    /// data, or is stale for this observer and `refetch_on_mount` allows it.
    pub fn watch<L>(
        &self,
        key: impl Into<QueryKey>,
        query_fn: QueryFn,
        options: QueryOptions,
        listener: L,
    ) -> Result<QueryObserver, QueryError>
    where
        L: Fn(&QueryResult) + Send + Sync + 'static,
    {
        QueryObserver::attach(
            &self.cache,
            &key.into(),
            query_fn,
            &options,
            Arc::new(listener),
        )
    }

    /// Returns cached data if fresh for `options.stale_time`, otherwise fetches and waits.
    pub async fn fetch_query(
        &self,
        key: impl Into<QueryKey>,
        query_fn: QueryFn,
        options: QueryOptions,
    ) -> Result<Value, QueryError> {
        let key = key.into();
        let (query, _) = self.cache.build(&key, Some(&options));
        let stale_time = options
            .stale_time
            .unwrap_or_else(|| self.cache.config().stale_time());

        let state = query.state();
        if !state.is_stale_by_time(stale_time, self.cache.clock().now_millis())
            && let Some(data) = state.data
        {
            return Ok(data);
        }

        let (shared, _) = query.fetch(Some(query_fn))?;
        shared.await
    }

    /// Like [`Self::fetch_query`], but a failed or cancelled fetch is not an error: it is
    /// recorded in the entry. Resolves once the entry settled.
    pub async fn prefetch_query(
        &self,
        key: impl Into<QueryKey>,
        query_fn: QueryFn,
        options: QueryOptions,
    ) -> Result<(), QueryError> {
        match self.fetch_query(key, query_fn, options).await {
            Ok(_) | Err(QueryError::Fetch(_)) | Err(QueryError::Cancelled) => Ok(()),
            Err(err) => Err(err),
        }
    }

    pub fn get_query_data(&self, key: impl Into<QueryKey>) -> Option<Value> {
        self.cache
            .find_by_key(&key.into())
            .and_then(|query| query.state().data)
    }

    pub fn get_query_state(&self, key: impl Into<QueryKey>) -> Option<QueryState> {
        self.cache
            .find_by_key(&key.into())
            .map(|query| query.state())
    }

    /// Installs `data` as a successful result for `key`, creating the entry if needed.
    pub fn set_query_data(&self, key: impl Into<QueryKey>, data: Value) {
        let query = self.cache.find_or_create(&key.into());
        query.set_data(data);
    }

    /// Marks matching entries stale and refetches those that have an enabled observer.
    /// Returns the number of invalidated entries.
    pub fn invalidate_queries(&self, filters: &QueryFilters) -> usize {
        let queries = self.cache.find_all(filters);
        for query in &queries {
            query.invalidate();
        }
        if !self.environment().is_server() {
            for query in &queries {
                if query.has_enabled_observer()
                    && query.has_query_fn()
                    && let Err(err) = query.fetch(None)
                {
                    debug!(query_hash = %query.hash(), error = %err, "Refetch after invalidation skipped");
                }
            }
        }
        queries.len()
    }

    /// Refetches matching entries that know their query function, skipping entries whose
    /// observers are all disabled. Waits for every fetch and returns how many ran.
    pub async fn refetch_queries(&self, filters: &QueryFilters) -> Result<usize, QueryError> {
        let mut pending = Vec::new();
        for query in self.cache.find_all(filters) {
            let disabled = query.is_active() && !query.has_enabled_observer();
            if disabled || !query.has_query_fn() {
                continue;
            }
            let (shared, _) = query.fetch(None)?;
            pending.push(shared);
        }

        let count = pending.len();
        join_all(pending).await;
        Ok(count)
    }

    /// Cancels in-flight fetches of matching entries. Returns how many were cancelled.
    pub fn cancel_queries(&self, filters: &QueryFilters, options: CancelOptions) -> usize {
        self.cache
            .find_all(filters)
            .iter()
            .filter(|query| query.cancel(options.silent))
            .count()
    }

    /// Removes matching entries. Returns how many were removed.
    pub fn remove_queries(&self, filters: &QueryFilters) -> usize {
        self.cache
            .find_all(filters)
            .iter()
            .filter(|query| self.cache.remove(query))
            .count()
    }

    /// Number of matching entries with a fetch in flight.
    pub fn is_fetching(&self, filters: &QueryFilters) -> usize {
        self.cache
            .find_all(filters)
            .iter()
            .filter(|query| query.is_fetching())
            .count()
    }

    /// Refetches entries whose observers opted into focus refetches and consider them stale.
    /// Returns how many fetches were requested.
    pub fn notify_window_focus(&self) -> usize {
        if self.environment().is_server() {
            return 0;
        }
        let mut requested = 0;
        for query in self.cache.get_all() {
            if !query.wants_focus_refetch() || !query.has_query_fn() {
                continue;
            }
            match query.fetch(None) {
                Ok(_) => requested += 1,
                Err(err) => {
                    debug!(query_hash = %query.hash(), error = %err, "Focus refetch skipped");
                }
            }
        }
        requested
    }

    pub fn dehydrate(&self, options: &DehydrateOptions) -> DehydratedState {
        hydration::dehydrate(&self.cache, options)
    }

    pub fn hydrate(
        &self,
        state: &DehydratedState,
        options: &HydrateOptions,
    ) -> Result<usize, QueryError> {
        hydration::hydrate(&self.cache, state, options)
    }

    pub fn clear(&self) {
        self.cache.clear();
    }
}
