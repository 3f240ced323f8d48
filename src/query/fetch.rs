//! Fetch coordination: query functions, retry policy and the shared in-flight task.
//!
//! Each entry owns at most one [`InFlight`] fetch. The task runs on the tokio runtime
//! independently of who awaits it, and every caller that asks for the same entry while it runs
//! receives a clone of the same [`SharedFetch`].

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use metrics::counter;
use serde::Serialize;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::debug;

use super::entry::Query;
use super::error::{FetchError, QueryError};
use super::key::QueryKey;
use super::state::QueryStatus;

const METRIC_FETCH_RETRY_TOTAL: &str = "hydrocache_fetch_retry_total";

const DEFAULT_RETRIES: u32 = 3;
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// What a query function is called with.
#[derive(Debug, Clone)]
pub struct QueryContext {
    pub key: QueryKey,
    /// Zero for the first attempt, incremented on every retry.
    pub attempt: u32,
}

type BoxedQueryFn =
    dyn Fn(QueryContext) -> BoxFuture<'static, Result<Value, FetchError>> + Send + Sync;

/// The caller-supplied async producer of a query's data.
#[derive(Clone)]
pub struct QueryFn(Arc<BoxedQueryFn>);

impl QueryFn {
    /// Wraps an async function returning any serializable value.
    pub fn new<F, Fut, T, E>(f: F) -> Self
    where
        F: Fn(QueryContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Serialize + Send + 'static,
        E: Into<FetchError> + Send + 'static,
    {
        Self(Arc::new(move |context| {
            let pending = f(context);
            async move {
                let value = pending.await.map_err(Into::into)?;
                serde_json::to_value(value).map_err(FetchError::from)
            }
            .boxed()
        }))
    }

    /// A query function that always resolves to `value`.
    pub fn constant(value: Value) -> Self {
        Self::new(move |_| {
            let value = value.clone();
            async move { Ok::<_, FetchError>(value) }
        })
    }

    fn call(&self, context: QueryContext) -> BoxFuture<'static, Result<Value, FetchError>> {
        (self.0)(context)
    }
}

impl fmt::Debug for QueryFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("QueryFn(..)")
    }
}

/// Retries with exponential backoff: `min(base_delay * 2^(n-1), max_delay)` before retry `n`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first failed attempt.
    pub retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(retries: u32) -> Self {
        Self {
            retries,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }

    pub fn none() -> Self {
        Self::new(0)
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Whether another attempt follows after `failure_count` failures.
    pub fn should_retry(&self, failure_count: u32) -> bool {
        failure_count <= self.retries
    }

    /// Delay before the attempt that follows the `failure_count`-th failure.
    pub fn delay_for(&self, failure_count: u32) -> Duration {
        let exponent = failure_count.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1_u32 << exponent)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RETRIES)
    }
}

/// A fetch result every awaiting caller can clone.
pub type SharedFetch = Shared<BoxFuture<'static, Result<Value, QueryError>>>;

pub(crate) struct InFlight {
    pub id: u64,
    pub shared: SharedFetch,
    pub abort: AbortHandle,
    /// Status to restore if the fetch is cancelled.
    pub revert_status: QueryStatus,
}

pub(crate) struct FetchTask {
    pub query: Weak<Query>,
    pub id: u64,
    pub query_fn: QueryFn,
    pub retry: RetryPolicy,
}

/// Spawns the fetch task and wraps its join handle into a shareable future.
pub(crate) fn spawn(handle: &Handle, task: FetchTask) -> (SharedFetch, AbortHandle) {
    let join = handle.spawn(run(task));
    let abort = join.abort_handle();
    let shared = async move {
        match join.await {
            Ok(outcome) => outcome,
            Err(err) if err.is_cancelled() => Err(QueryError::Cancelled),
            Err(err) => Err(QueryError::Fetch(FetchError::with_code(
                format!("fetch task failed: {err}"),
                "task",
            ))),
        }
    }
    .boxed()
    .shared();
    (shared, abort)
}

async fn run(task: FetchTask) -> Result<Value, QueryError> {
    let FetchTask {
        query,
        id,
        query_fn,
        retry,
    } = task;
    let Some(key) = query.upgrade().map(|query| query.key().clone()) else {
        return Err(QueryError::Cancelled);
    };

    let mut failure_count = 0;
    let outcome = loop {
        let context = QueryContext {
            key: key.clone(),
            attempt: failure_count,
        };
        match attempt(&query_fn, context).await {
            Ok(data) => break Ok(data),
            Err(error) => {
                failure_count += 1;
                if !retry.should_retry(failure_count) {
                    break Err(error);
                }

                let delay = retry.delay_for(failure_count);
                debug!(
                    query_hash = %key,
                    failure_count,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %error,
                    "Query attempt failed, retrying"
                );
                counter!(METRIC_FETCH_RETRY_TOTAL).increment(1);

                let still_current = query
                    .upgrade()
                    .is_some_and(|query| query.record_failure(id, failure_count));
                if !still_current {
                    return Err(QueryError::Cancelled);
                }
                tokio::time::sleep(delay).await;
            }
        }
    };

    match query.upgrade() {
        Some(query) => query.settle(id, outcome, failure_count),
        None => Err(QueryError::Cancelled),
    }
}

async fn attempt(query_fn: &QueryFn, context: QueryContext) -> Result<Value, FetchError> {
    let pending = match std::panic::catch_unwind(AssertUnwindSafe(|| query_fn.call(context))) {
        Ok(pending) => pending,
        Err(_) => return Err(FetchError::with_code("query function panicked", "panic")),
    };
    match AssertUnwindSafe(pending).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(_) => Err(FetchError::with_code("query function panicked", "panic")),
    }
}
