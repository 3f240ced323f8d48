//! Query error taxonomy.
//!
//! Only key and hydration errors surface to callers as failures. Fetch failures are captured
//! into entry state, and cancellations are swallowed by the coordinator.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A query key could not be turned into a stable hash.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidKeyError {
    /// The key's `Serialize` implementation failed, or produced a map with non-string keys.
    #[error("query key is not serializable: {0}")]
    Unserializable(String),
}

/// The failure payload of a query function.
///
/// This is what observers see as `error` and what travels inside a dehydrated snapshot, so it
/// is a plain serializable value rather than a boxed error.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct FetchError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl FetchError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: Some(code.into()),
        }
    }

    /// Captures any error as a fetch failure, keeping its source chain in the message.
    pub fn from_error(error: &dyn std::error::Error) -> Self {
        let mut message = error.to_string();
        let mut current = error.source();
        while let Some(inner) = current {
            message.push_str(": ");
            message.push_str(&inner.to_string());
            current = inner.source();
        }
        Self::new(message)
    }
}

impl From<String> for FetchError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for FetchError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(error: serde_json::Error) -> Self {
        Self::with_code(error.to_string(), "serialization")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error(transparent)]
    InvalidKey(#[from] InvalidKeyError),
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("fetch was cancelled")]
    Cancelled,
    #[error("hydration failed: {0}")]
    Hydration(String),
    #[error("no tokio runtime is available to drive the fetch")]
    NoRuntime,
}

impl QueryError {
    pub fn hydration(reason: impl Into<String>) -> Self {
        Self::Hydration(reason.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use std::fmt;

    use super::*;

    #[derive(Debug)]
    struct Outer(Inner);

    #[derive(Debug)]
    struct Inner;

    impl fmt::Display for Outer {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("request failed")
        }
    }

    impl fmt::Display for Inner {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("connection reset")
        }
    }

    impl std::error::Error for Outer {
        fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
            Some(&self.0)
        }
    }

    impl std::error::Error for Inner {}

    #[test]
    fn from_error_flattens_source_chain() {
        let error = FetchError::from_error(&Outer(Inner));
        assert_eq!(error.message, "request failed: connection reset");
        assert_eq!(error.code, None);
    }

    #[test]
    fn fetch_error_serializes_without_empty_code() {
        let json = serde_json::to_string(&FetchError::new("boom")).expect("serializable");
        assert_eq!(json, r#"{"message":"boom"}"#);

        let coded: FetchError =
            serde_json::from_str(r#"{"message":"nope","code":"404"}"#).expect("deserializable");
        assert_eq!(coded, FetchError::with_code("nope", "404"));
    }
}
