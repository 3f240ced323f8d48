//! Hydrocache query engine
//!
//! Tracks asynchronous query results keyed by a normalized key:
//!
//! - **Keys** hash canonically, so structurally equal keys share one entry
//! - **Entries** run the `idle → loading → success | error` state machine, keep previous data
//!   visible while refetching, and are garbage-collected once unobserved for `cache_time`
//! - **Observers** are notified synchronously, in subscription order, on every transition
//! - **Fetches** are deduplicated per entry, retried with exponential backoff and cancellable
//! - **Snapshots** move successful results from a server-context cache into a client cache
//!
//! ## Configuration
//!
//! Cache defaults come from the `[cache]` table of `hydrocache.toml`:
//!
//! ```toml
//! [cache]
//! stale_time_ms = 0
//! cache_time_ms = 300000
//! retry = 3
//! # ... see config.rs for all options
//! ```

mod cache;
mod client;
mod clock;
mod config;
mod entry;
mod error;
mod events;
mod fetch;
mod filters;
pub mod hydration;
mod inspect;
mod key;
mod lock;
mod observer;
mod registry;
mod state;

pub use cache::QueryCache;
pub use client::{CancelOptions, QueryClient};
pub use clock::Clock;
pub use config::{CacheConfig, Environment, QueryOptions, RefetchOnMount};
pub use entry::Query;
pub use error::{FetchError, InvalidKeyError, QueryError};
pub use events::{CacheEvent, Epoch, EventKind, EventListener, QuerySnapshot, Subscription};
pub use fetch::{QueryContext, QueryFn, RetryPolicy, SharedFetch};
pub use filters::QueryFilters;
pub use hydration::{
    DehydrateOptions, DehydratedQuery, DehydratedState, HydrateOptions, dehydrate, hydrate,
};
pub use inspect::{CacheStats, Inspector};
pub use key::{QueryHash, QueryKey, hash_key};
pub use observer::QueryObserver;
pub use registry::Listener;
pub use state::{Action, ActionKind, FetchStatus, QueryResult, QueryState, QueryStatus};
