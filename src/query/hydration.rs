//! Dehydration and hydration of cache snapshots.
//!
//! A [`DehydratedState`] is a plain, ordered projection of entry state: no observers, timers or
//! in-flight fetches. It is produced on the server after prefetching and fed into a fresh
//! client cache before the first consumer attaches.

use std::fmt;
use std::sync::Arc;

use metrics::counter;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use super::cache::QueryCache;
use super::error::{FetchError, QueryError};
use super::events::QuerySnapshot;
use super::filters::QueryFilters;
use super::key::{QueryHash, QueryKey};
use super::state::QueryStatus;

const METRIC_HYDRATE_TOTAL: &str = "hydrocache_hydrate_total";

/// One entry of a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DehydratedQuery {
    pub hash: QueryHash,
    pub key: QueryKey,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<FetchError>,
    pub updated_at: i64,
    pub error_updated_at: i64,
}

/// Keeps an explicit `null` as `Some(Value::Null)`; only a missing field means no data.
fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

impl DehydratedQuery {
    fn from_snapshot(snapshot: QuerySnapshot) -> Self {
        Self {
            hash: snapshot.hash,
            key: snapshot.key,
            data: snapshot.state.data,
            error: snapshot.state.error,
            updated_at: snapshot.state.data_updated_at,
            error_updated_at: snapshot.state.error_updated_at,
        }
    }
}

/// A transportable cache snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DehydratedState {
    pub queries: Vec<DehydratedQuery>,
}

impl DehydratedState {
    pub fn to_json(&self) -> Result<String, QueryError> {
        serde_json::to_string(self).map_err(|err| QueryError::hydration(err.to_string()))
    }

    pub fn to_json_pretty(&self) -> Result<String, QueryError> {
        serde_json::to_string_pretty(self).map_err(|err| QueryError::hydration(err.to_string()))
    }

    pub fn from_json(text: &str) -> Result<Self, QueryError> {
        serde_json::from_str(text).map_err(|err| QueryError::hydration(err.to_string()))
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}

type SnapshotFilter = Arc<dyn Fn(&QuerySnapshot) -> bool + Send + Sync>;
type DehydratedFilter = Arc<dyn Fn(&DehydratedQuery) -> bool + Send + Sync>;

/// Which entries [`dehydrate`] projects. Defaults to successful entries only.
#[derive(Clone, Default)]
pub struct DehydrateOptions {
    should_dehydrate: Option<SnapshotFilter>,
}

impl DehydrateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&QuerySnapshot) -> bool + Send + Sync + 'static,
    {
        self.should_dehydrate = Some(Arc::new(filter));
        self
    }

    pub fn filters(self, filters: QueryFilters) -> Self {
        self.filter(move |snapshot| filters.matches(snapshot))
    }

    fn accepts(&self, snapshot: &QuerySnapshot) -> bool {
        match &self.should_dehydrate {
            Some(filter) => filter(snapshot),
            None => snapshot.state.status == QueryStatus::Success,
        }
    }
}

impl fmt::Debug for DehydrateOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DehydrateOptions")
            .field("custom_filter", &self.should_dehydrate.is_some())
            .finish()
    }
}

/// Which snapshot entries [`hydrate`] merges. Defaults to all of them.
#[derive(Clone, Default)]
pub struct HydrateOptions {
    filter: Option<DehydratedFilter>,
}

impl HydrateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&DehydratedQuery) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }

    fn accepts(&self, query: &DehydratedQuery) -> bool {
        self.filter.as_ref().is_none_or(|filter| filter(query))
    }
}

impl fmt::Debug for HydrateOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HydrateOptions")
            .field("custom_filter", &self.filter.is_some())
            .finish()
    }
}

/// Projects the entries of `cache` accepted by `options`, in creation order.
pub fn dehydrate(cache: &QueryCache, options: &DehydrateOptions) -> DehydratedState {
    let queries: Vec<DehydratedQuery> = cache
        .get_all()
        .iter()
        .map(|query| query.snapshot())
        .filter(|snapshot| options.accepts(snapshot))
        .map(DehydratedQuery::from_snapshot)
        .collect();
    debug!(queries = queries.len(), total = cache.len(), "Dehydrated cache");
    DehydratedState { queries }
}

/// Merges `state` into `cache` and returns how many entries were created.
///
/// Hashes absent from the cache become new, unobserved entries holding the snapshot's result;
/// hashes already present are left untouched. Fails before touching the cache if any entry's
/// hash does not match its key.
pub fn hydrate(
    cache: &QueryCache,
    state: &DehydratedState,
    options: &HydrateOptions,
) -> Result<usize, QueryError> {
    for query in &state.queries {
        let expected = query.key.hash();
        if expected != query.hash {
            return Err(QueryError::hydration(format!(
                "hash {} does not match its key (expected {expected})",
                query.hash
            )));
        }
    }

    let mut created = 0;
    let mut skipped = 0;
    for query in state.queries.iter().filter(|query| options.accepts(query)) {
        if cache.find(&query.hash).is_some() {
            skipped += 1;
            continue;
        }
        let (entry, is_new) = cache.build(&query.key, None);
        if !is_new {
            skipped += 1;
            continue;
        }
        entry.restore(
            query.data.clone(),
            query.error.clone(),
            query.updated_at,
            query.error_updated_at,
        );
        created += 1;
    }

    counter!(METRIC_HYDRATE_TOTAL).increment(created as u64);
    info!(
        created,
        skipped,
        total = state.queries.len(),
        "Hydrated cache snapshot"
    );
    Ok(created)
}
