//! Query state machine.
//!
//! `idle → loading → {success, error}`, with refetches re-entering `loading` while keeping the
//! previous data and error visible. All mutations go through [`QueryState::apply`].

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::clock::duration_millis;
use super::error::FetchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryStatus {
    Idle,
    Loading,
    Success,
    Error,
}

impl QueryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Loading => "loading",
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchStatus {
    Idle,
    Fetching,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryState {
    pub status: QueryStatus,
    pub fetch_status: FetchStatus,
    pub data: Option<Value>,
    pub error: Option<FetchError>,
    /// Unix-epoch millis of the last successful result, `0` if there never was one.
    pub data_updated_at: i64,
    /// Unix-epoch millis of the last failure, `0` if there never was one.
    pub error_updated_at: i64,
    /// Failed attempts of the current (or last) fetch.
    pub failure_count: u32,
    pub is_invalidated: bool,
}

impl Default for QueryState {
    fn default() -> Self {
        Self {
            status: QueryStatus::Idle,
            fetch_status: FetchStatus::Idle,
            data: None,
            error: None,
            data_updated_at: 0,
            error_updated_at: 0,
            failure_count: 0,
            is_invalidated: false,
        }
    }
}

/// A state transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// A fetch started.
    Fetch,
    /// One attempt failed and another one will follow.
    Failed { failure_count: u32 },
    Success { data: Value, updated_at: i64 },
    Error { error: FetchError, updated_at: i64 },
    /// The in-flight fetch was cancelled; restore the status it started from.
    Revert { status: QueryStatus },
    Invalidate,
    /// Install a result that was produced elsewhere (hydration).
    Restore {
        data: Option<Value>,
        error: Option<FetchError>,
        data_updated_at: i64,
        error_updated_at: i64,
    },
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Fetch => ActionKind::Fetch,
            Self::Failed { .. } => ActionKind::Failed,
            Self::Success { .. } => ActionKind::Success,
            Self::Error { .. } => ActionKind::Error,
            Self::Revert { .. } => ActionKind::Revert,
            Self::Invalidate => ActionKind::Invalidate,
            Self::Restore { .. } => ActionKind::Restore,
        }
    }
}

/// Payload-free tag of an [`Action`], carried by cache events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Fetch,
    Failed,
    Success,
    Error,
    Revert,
    Invalidate,
    Restore,
}

impl QueryState {
    pub fn apply(&mut self, action: Action) {
        match action {
            Action::Fetch => {
                self.status = QueryStatus::Loading;
                self.fetch_status = FetchStatus::Fetching;
                self.failure_count = 0;
            }
            Action::Failed { failure_count } => {
                self.failure_count = failure_count;
            }
            Action::Success { data, updated_at } => {
                self.status = QueryStatus::Success;
                self.fetch_status = FetchStatus::Idle;
                self.data = Some(data);
                self.data_updated_at = updated_at;
                self.error = None;
                self.failure_count = 0;
                self.is_invalidated = false;
            }
            Action::Error { error, updated_at } => {
                self.status = QueryStatus::Error;
                self.fetch_status = FetchStatus::Idle;
                self.error = Some(error);
                self.error_updated_at = updated_at;
            }
            Action::Revert { status } => {
                self.status = status;
                self.fetch_status = FetchStatus::Idle;
            }
            Action::Invalidate => {
                self.is_invalidated = true;
            }
            Action::Restore {
                data,
                error,
                data_updated_at,
                error_updated_at,
            } => {
                self.status = if error.is_some() {
                    QueryStatus::Error
                } else if data.is_some() || data_updated_at > 0 {
                    QueryStatus::Success
                } else {
                    QueryStatus::Idle
                };
                self.fetch_status = FetchStatus::Idle;
                self.data = data;
                self.error = error;
                self.data_updated_at = data_updated_at;
                self.error_updated_at = error_updated_at;
                self.failure_count = 0;
            }
        }
    }

    pub fn has_data(&self) -> bool {
        self.data_updated_at > 0 || self.data.is_some()
    }

    pub fn is_fetching(&self) -> bool {
        self.fetch_status == FetchStatus::Fetching
    }

    /// Stale iff invalidated, without data, or `now - data_updated_at >= stale_time`.
    pub fn is_stale_by_time(&self, stale_time: Duration, now: i64) -> bool {
        if self.is_invalidated || !self.has_data() {
            return true;
        }
        if stale_time == Duration::MAX {
            return false;
        }
        now.saturating_sub(self.data_updated_at) >= duration_millis(stale_time)
    }

    /// When data becomes stale for `stale_time`, if it ever does.
    pub(crate) fn stale_deadline(&self, stale_time: Duration) -> Option<i64> {
        if self.is_invalidated || !self.has_data() || stale_time == Duration::MAX {
            return None;
        }
        Some(
            self.data_updated_at
                .saturating_add(duration_millis(stale_time)),
        )
    }
}

/// What an observer sees: the entry state plus that observer's view of freshness.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub status: QueryStatus,
    pub fetch_status: FetchStatus,
    pub data: Option<Value>,
    pub error: Option<FetchError>,
    pub data_updated_at: i64,
    pub error_updated_at: i64,
    pub failure_count: u32,
    pub is_invalidated: bool,
    pub is_stale: bool,
}

impl QueryResult {
    pub(crate) fn new(state: &QueryState, is_stale: bool) -> Self {
        Self {
            status: state.status,
            fetch_status: state.fetch_status,
            data: state.data.clone(),
            error: state.error.clone(),
            data_updated_at: state.data_updated_at,
            error_updated_at: state.error_updated_at,
            failure_count: state.failure_count,
            is_invalidated: state.is_invalidated,
            is_stale,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.status == QueryStatus::Idle
    }

    pub fn is_loading(&self) -> bool {
        self.status == QueryStatus::Loading
    }

    pub fn is_success(&self) -> bool {
        self.status == QueryStatus::Success
    }

    pub fn is_error(&self) -> bool {
        self.status == QueryStatus::Error
    }

    pub fn is_fetching(&self) -> bool {
        self.fetch_status == FetchStatus::Fetching
    }

    /// Deserializes the current data, if any.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<Option<T>, serde_json::Error> {
        self.data.clone().map(serde_json::from_value).transpose()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn succeeded(at: i64) -> QueryState {
        let mut state = QueryState::default();
        state.apply(Action::Fetch);
        state.apply(Action::Success {
            data: json!("test"),
            updated_at: at,
        });
        state
    }

    #[test]
    fn fetch_then_success_populates_data() {
        let state = succeeded(1_000);

        assert_eq!(state.status, QueryStatus::Success);
        assert_eq!(state.fetch_status, FetchStatus::Idle);
        assert_eq!(state.data, Some(json!("test")));
        assert_eq!(state.data_updated_at, 1_000);
        assert!(state.error.is_none());
    }

    #[test]
    fn refetch_keeps_previous_data_until_result_lands() {
        let mut state = succeeded(1_000);
        state.apply(Action::Fetch);

        assert_eq!(state.status, QueryStatus::Loading);
        assert!(state.is_fetching());
        assert_eq!(state.data, Some(json!("test")));
    }

    #[test]
    fn error_keeps_data_and_success_clears_error() {
        let mut state = succeeded(1_000);
        state.apply(Action::Fetch);
        state.apply(Action::Failed { failure_count: 1 });
        state.apply(Action::Error {
            error: FetchError::new("boom"),
            updated_at: 2_000,
        });

        assert_eq!(state.status, QueryStatus::Error);
        assert_eq!(state.data, Some(json!("test")));
        assert_eq!(state.failure_count, 1);
        assert_eq!(state.error_updated_at, 2_000);

        state.apply(Action::Fetch);
        assert_eq!(state.failure_count, 0);
        state.apply(Action::Success {
            data: json!("again"),
            updated_at: 3_000,
        });
        assert!(state.error.is_none());
        assert_eq!(state.status, QueryStatus::Success);
    }

    #[test]
    fn revert_restores_pre_fetch_status() {
        let mut state = succeeded(1_000);
        state.apply(Action::Fetch);
        state.apply(Action::Revert {
            status: QueryStatus::Success,
        });

        assert_eq!(state.status, QueryStatus::Success);
        assert_eq!(state.fetch_status, FetchStatus::Idle);
    }

    #[test]
    fn staleness_boundary_is_inclusive() {
        let state = succeeded(1_000);
        let stale_time = Duration::from_millis(300);

        assert!(!state.is_stale_by_time(stale_time, 1_000));
        assert!(!state.is_stale_by_time(stale_time, 1_299));
        assert!(state.is_stale_by_time(stale_time, 1_300));
        assert!(!state.is_stale_by_time(Duration::MAX, i64::MAX));
        assert_eq!(state.stale_deadline(stale_time), Some(1_300));
    }

    #[test]
    fn invalidated_or_empty_state_is_always_stale() {
        assert!(QueryState::default().is_stale_by_time(Duration::MAX, 0));

        let mut state = succeeded(1_000);
        state.apply(Action::Invalidate);
        assert!(state.is_stale_by_time(Duration::MAX, 1_000));
        assert_eq!(state.stale_deadline(Duration::from_secs(1)), None);
    }

    #[test]
    fn result_exposes_typed_data() {
        let state = succeeded(1_000);
        let result = QueryResult::new(&state, false);

        assert!(result.is_success());
        assert!(!result.is_fetching());
        assert_eq!(result.data_as::<String>().expect("string data"), Some("test".to_string()));
        assert!(result.data_as::<u32>().is_err());
    }

    #[test]
    fn restore_synthesizes_error_state() {
        let mut state = QueryState::default();
        state.apply(Action::Restore {
            data: None,
            error: Some(FetchError::new("server said no")),
            data_updated_at: 0,
            error_updated_at: 5,
        });

        assert_eq!(state.status, QueryStatus::Error);
        assert_eq!(state.error_updated_at, 5);
    }
}
