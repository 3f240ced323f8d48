//! Entry selection for lookups and bulk operations.

use std::fmt;
use std::sync::Arc;

use super::events::QuerySnapshot;
use super::key::QueryKey;
use super::state::QueryStatus;

type Predicate = Arc<dyn Fn(&QuerySnapshot) -> bool + Send + Sync>;

/// Selects entries. Every set criterion must match; an empty filter matches everything.
#[derive(Clone, Default)]
pub struct QueryFilters {
    /// Prefix of array keys, or the whole key when `exact` is set.
    pub query_key: Option<QueryKey>,
    pub exact: bool,
    pub hash_contains: Option<String>,
    pub status: Option<QueryStatus>,
    pub stale: Option<bool>,
    pub fetching: Option<bool>,
    /// Whether the entry has observers.
    pub active: Option<bool>,
    pub predicate: Option<Predicate>,
}

impl QueryFilters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(mut self, key: impl Into<QueryKey>) -> Self {
        self.query_key = Some(key.into());
        self.exact = false;
        self
    }

    pub fn exact(mut self, key: impl Into<QueryKey>) -> Self {
        self.query_key = Some(key.into());
        self.exact = true;
        self
    }

    pub fn hash_contains(mut self, needle: impl Into<String>) -> Self {
        self.hash_contains = Some(needle.into());
        self
    }

    pub fn status(mut self, status: QueryStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn stale(mut self, stale: bool) -> Self {
        self.stale = Some(stale);
        self
    }

    pub fn fetching(mut self, fetching: bool) -> Self {
        self.fetching = Some(fetching);
        self
    }

    pub fn active(mut self, active: bool) -> Self {
        self.active = Some(active);
        self
    }

    pub fn predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&QuerySnapshot) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    pub fn matches(&self, query: &QuerySnapshot) -> bool {
        if let Some(key) = &self.query_key {
            let key_matches = if self.exact {
                query.hash == key.hash()
            } else {
                query.key.starts_with(key)
            };
            if !key_matches {
                return false;
            }
        }
        if let Some(needle) = &self.hash_contains
            && !query.hash.as_str().contains(needle.as_str())
        {
            return false;
        }
        if self.status.is_some_and(|status| status != query.state.status) {
            return false;
        }
        if self.stale.is_some_and(|stale| stale != query.is_stale) {
            return false;
        }
        if self
            .fetching
            .is_some_and(|fetching| fetching != query.state.is_fetching())
        {
            return false;
        }
        if self.active.is_some_and(|active| active != query.is_active()) {
            return false;
        }
        self.predicate
            .as_ref()
            .is_none_or(|predicate| predicate(query))
    }
}

impl fmt::Debug for QueryFilters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryFilters")
            .field("query_key", &self.query_key)
            .field("exact", &self.exact)
            .field("hash_contains", &self.hash_contains)
            .field("status", &self.status)
            .field("stale", &self.stale)
            .field("fetching", &self.fetching)
            .field("active", &self.active)
            .field("predicate", &self.predicate.is_some())
            .finish()
    }
}
