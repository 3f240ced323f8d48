//! Cache defaults and per-observer query options.
//!
//! [`CacheConfig`] is what operators put in `hydrocache.toml`; [`QueryOptions`] is what each
//! consumer passes when it watches or fetches a key. Unset options fall back to the cache
//! defaults, which in turn depend on the [`Environment`].

use std::time::Duration;

use serde::Deserialize;

use super::fetch::RetryPolicy;

// Default values for cache configuration
const DEFAULT_STALE_TIME_MS: u64 = 0;
const DEFAULT_CACHE_TIME_MS: u64 = 5 * 60 * 1000;
const DEFAULT_RETRY: u32 = 3;
const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 1000;
const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 30_000;

/// Where a cache runs.
///
/// Passed explicitly into every cache instead of living in global state, so a server can run
/// one cache per request next to a client-context cache in the same process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Environment {
    is_server: bool,
}

impl Environment {
    pub const fn client() -> Self {
        Self { is_server: false }
    }

    pub const fn server() -> Self {
        Self { is_server: true }
    }

    /// Server context suppresses client-only side effects: garbage collection, stale timers,
    /// and fetches triggered by observers.
    pub fn is_server(&self) -> bool {
        self.is_server
    }
}

/// Cache-wide defaults from `hydrocache.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// How long fetched data counts as fresh.
    pub stale_time_ms: u64,
    /// How long an unobserved entry is kept. `None` keeps entries forever in server context
    /// and uses five minutes on the client.
    pub cache_time_ms: Option<u64>,
    /// Retries after the first failed attempt. `None` means 3 on the client and 0 on the
    /// server.
    pub retry: Option<u32>,
    /// First retry delay; doubled on every further attempt.
    pub retry_base_delay_ms: u64,
    /// Upper bound for a single retry delay.
    pub retry_max_delay_ms: u64,
    /// Run the cache in server context.
    pub is_server: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            stale_time_ms: DEFAULT_STALE_TIME_MS,
            cache_time_ms: None,
            retry: None,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            retry_max_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS,
            is_server: false,
        }
    }
}

impl CacheConfig {
    pub fn server() -> Self {
        Self {
            is_server: true,
            ..Self::default()
        }
    }

    pub fn environment(&self) -> Environment {
        if self.is_server {
            Environment::server()
        } else {
            Environment::client()
        }
    }

    pub fn stale_time(&self) -> Duration {
        Duration::from_millis(self.stale_time_ms)
    }

    pub fn cache_time(&self) -> Duration {
        match (self.cache_time_ms, self.is_server) {
            (Some(ms), _) => Duration::from_millis(ms),
            (None, true) => Duration::MAX,
            (None, false) => Duration::from_millis(DEFAULT_CACHE_TIME_MS),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let retries = match (self.retry, self.is_server) {
            (Some(retries), _) => retries,
            (None, true) => 0,
            (None, false) => DEFAULT_RETRY,
        };
        RetryPolicy::new(retries)
            .with_base_delay(Duration::from_millis(self.retry_base_delay_ms))
            .with_max_delay(Duration::from_millis(self.retry_max_delay_ms))
    }
}

/// When an observer refetches on attach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefetchOnMount {
    Never,
    #[default]
    IfStale,
    Always,
}

/// Options one consumer passes for one key. `None` fields use the cache defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOptions {
    pub stale_time: Option<Duration>,
    pub cache_time: Option<Duration>,
    pub retry: Option<RetryPolicy>,
    /// Disabled observers never trigger a fetch.
    pub enabled: bool,
    pub refetch_on_mount: RefetchOnMount,
    pub refetch_interval: Option<Duration>,
    pub refetch_on_window_focus: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            stale_time: None,
            cache_time: None,
            retry: None,
            enabled: true,
            refetch_on_mount: RefetchOnMount::IfStale,
            refetch_interval: None,
            refetch_on_window_focus: true,
        }
    }
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = Some(stale_time);
        self
    }

    pub fn cache_time(mut self, cache_time: Duration) -> Self {
        self.cache_time = Some(cache_time);
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn refetch_on_mount(mut self, refetch_on_mount: RefetchOnMount) -> Self {
        self.refetch_on_mount = refetch_on_mount;
        self
    }

    pub fn refetch_interval(mut self, interval: Duration) -> Self {
        self.refetch_interval = Some(interval);
        self
    }

    pub fn refetch_on_window_focus(mut self, refetch: bool) -> Self {
        self.refetch_on_window_focus = refetch;
        self
    }

    pub(crate) fn resolve(&self, config: &CacheConfig) -> ResolvedOptions {
        ResolvedOptions {
            stale_time: self.stale_time.unwrap_or_else(|| config.stale_time()),
            cache_time: self.cache_time.unwrap_or_else(|| config.cache_time()),
            retry: self.retry.clone().unwrap_or_else(|| config.retry_policy()),
            enabled: self.enabled,
            refetch_on_mount: self.refetch_on_mount,
            refetch_interval: self.refetch_interval.filter(|interval| !interval.is_zero()),
            refetch_on_window_focus: self.refetch_on_window_focus,
        }
    }
}

/// [`QueryOptions`] with every default applied.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ResolvedOptions {
    pub stale_time: Duration,
    pub cache_time: Duration,
    pub retry: RetryPolicy,
    pub enabled: bool,
    pub refetch_on_mount: RefetchOnMount,
    pub refetch_interval: Option<Duration>,
    pub refetch_on_window_focus: bool,
}
