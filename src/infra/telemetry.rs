use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
///
/// Logs go to stderr so command output on stdout stays machine-readable.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

/// Registers descriptions for every metric the query engine records. Idempotent.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "hydrocache_fetch_total",
            Unit::Count,
            "Total number of fetches started."
        );
        describe_counter!(
            "hydrocache_fetch_deduplicated_total",
            Unit::Count,
            "Total number of fetch requests that joined an in-flight fetch."
        );
        describe_counter!(
            "hydrocache_fetch_retry_total",
            Unit::Count,
            "Total number of failed attempts that were retried."
        );
        describe_counter!(
            "hydrocache_fetch_cancelled_total",
            Unit::Count,
            "Total number of in-flight fetches cancelled."
        );
        describe_counter!(
            "hydrocache_gc_evict_total",
            Unit::Count,
            "Total number of unobserved entries garbage-collected."
        );
        describe_counter!(
            "hydrocache_hydrate_total",
            Unit::Count,
            "Total number of entries created from snapshots."
        );
        describe_gauge!(
            "hydrocache_queries",
            Unit::Count,
            "Current number of entries in the most recently updated cache."
        );
    });
}
