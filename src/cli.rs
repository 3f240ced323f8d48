//! Command handlers for the hydrocache binary.
//!
//! Each handler writes its report to the supplied writer; logs go through `tracing`.

use std::io::Write;
use std::path::Path;

use serde_json::Value;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tracing::info;

use crate::config::{HashArgs, InspectArgs, Settings, SnapshotArgs};
use crate::error::AppError;
use crate::query::{
    CacheConfig, DehydrateOptions, DehydratedState, HydrateOptions, QueryClient, QueryFn,
    QueryKey, QueryOptions, QuerySnapshot,
};

/// Prints the canonical hash of a JSON key.
pub fn run_hash(args: &HashArgs, out: &mut impl Write) -> Result<(), AppError> {
    let key = parse_key(&args.key, "KEY_JSON")?;
    writeln!(out, "{}", key.hash())?;
    Ok(())
}

/// Prefetches every `--key`/`--data` pair into a server-context cache and emits the snapshot.
pub async fn run_snapshot(
    settings: &Settings,
    args: &SnapshotArgs,
    out: &mut impl Write,
) -> Result<(), AppError> {
    if args.keys.len() != args.data.len() {
        return Err(AppError::validation(format!(
            "got {} --key values but {} --data values",
            args.keys.len(),
            args.data.len()
        )));
    }

    let client = QueryClient::new(CacheConfig {
        is_server: true,
        ..settings.cache.clone()
    });
    for (index, (key, data)) in args.keys.iter().zip(&args.data).enumerate() {
        let key = parse_key(key, "--key")?;
        let data: Value = serde_json::from_str(data)
            .map_err(|err| AppError::validation(format!("--data #{}: {err}", index + 1)))?;
        client
            .prefetch_query(key, QueryFn::constant(data), QueryOptions::new())
            .await?;
    }

    let state = client.dehydrate(&DehydrateOptions::new());
    let json = state.to_json_pretty()?;
    match args.output.as_ref() {
        Some(path) => {
            tokio::fs::write(path, format!("{json}\n")).await?;
            info!(
                target = "hydrocache::snapshot",
                path = %path.display(),
                queries = state.len(),
                "Snapshot written"
            );
        }
        None => writeln!(out, "{json}")?,
    }
    Ok(())
}

/// Hydrates a snapshot file into a client cache and prints one line per entry plus totals.
pub async fn run_inspect(
    settings: &Settings,
    args: &InspectArgs,
    out: &mut impl Write,
) -> Result<(), AppError> {
    let state = read_snapshot(&args.file).await?;

    let client = QueryClient::new(CacheConfig {
        is_server: false,
        ..settings.cache.clone()
    });
    let created = client.hydrate(&state, &HydrateOptions::new())?;
    info!(
        target = "hydrocache::inspect",
        path = %args.file.display(),
        created,
        "Snapshot hydrated"
    );

    let snapshots: Vec<QuerySnapshot> = client
        .cache()
        .get_all()
        .iter()
        .map(|query| query.snapshot())
        .collect();
    for snapshot in &snapshots {
        writeln!(out, "{}", describe_entry(snapshot))?;
    }

    let stats = client.cache().stats();
    writeln!(
        out,
        "total={} fresh={} stale={} fetching={}",
        stats.total, stats.fresh, stats.stale, stats.fetching
    )?;
    Ok(())
}

async fn read_snapshot(path: &Path) -> Result<DehydratedState, AppError> {
    let text = tokio::fs::read_to_string(path).await?;
    Ok(DehydratedState::from_json(&text)?)
}

fn parse_key(text: &str, source: &str) -> Result<QueryKey, AppError> {
    serde_json::from_str::<Value>(text)
        .map(QueryKey::from_value)
        .map_err(|err| AppError::validation(format!("{source} is not valid JSON: {err}")))
}

fn describe_entry(snapshot: &QuerySnapshot) -> String {
    let freshness = if snapshot.is_stale { "stale" } else { "fresh" };
    format!(
        "{}\t{}\t{}\tupdated={}",
        snapshot.hash,
        snapshot.state.status.as_str(),
        freshness,
        format_millis(snapshot.state.data_updated_at)
    )
}

fn format_millis(millis: i64) -> String {
    if millis <= 0 {
        return "-".to_string();
    }
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
        .ok()
        .and_then(|at| at.format(&Rfc3339).ok())
        .unwrap_or_else(|| millis.to_string())
}
