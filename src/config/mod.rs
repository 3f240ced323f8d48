//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{path::PathBuf, str::FromStr};

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::query::CacheConfig;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "hydrocache";
const ENV_PREFIX: &str = "HYDROCACHE";
const MAX_RETRIES: u32 = 32;

/// Command-line arguments for the hydrocache binary.
#[derive(Debug, Parser)]
#[command(
    name = "hydrocache",
    version,
    about = "Inspect and produce hydrocache snapshots"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "HYDROCACHE_CONFIG_FILE",
        value_name = "PATH",
        global = true
    )]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: Overrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Print the canonical hash of a JSON query key.
    Hash(HashArgs),
    /// Prefetch constant results in server context and write the snapshot as JSON.
    Snapshot(SnapshotArgs),
    /// Hydrate a snapshot file into a client cache and report its entries.
    Inspect(InspectArgs),
}

#[derive(Debug, Args, Clone)]
pub struct HashArgs {
    /// Query key as JSON, e.g. `["todos",{"page":1}]`.
    #[arg(value_name = "KEY_JSON")]
    pub key: String,
}

#[derive(Debug, Args, Clone)]
pub struct SnapshotArgs {
    /// Query key as JSON. Repeat once per entry, paired with `--data` by position.
    #[arg(long = "key", value_name = "KEY_JSON", required = true)]
    pub keys: Vec<String>,

    /// Result for the matching `--key`, as JSON.
    #[arg(long = "data", value_name = "JSON", required = true)]
    pub data: Vec<String>,

    /// Write the snapshot here instead of stdout.
    #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct InspectArgs {
    /// Snapshot produced by `hydrocache snapshot`.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub file: PathBuf,
}

#[derive(Debug, Args, Default, Clone)]
pub struct Overrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,

    /// Run caches in server context.
    #[arg(
        long = "is-server",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub is_server: Option<bool>,

    /// Override how long fetched data stays fresh.
    #[arg(long = "stale-time-ms", value_name = "MS", global = true)]
    pub stale_time_ms: Option<u64>,

    /// Override how long unobserved entries are kept.
    #[arg(long = "cache-time-ms", value_name = "MS", global = true)]
    pub cache_time_ms: Option<u64>,

    /// Override the number of retries after a failed fetch.
    #[arg(long = "retry", value_name = "COUNT", global = true)]
    pub retry: Option<u32>,
}

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(is_server) = overrides.is_server {
            self.cache.is_server = Some(is_server);
        }
        if let Some(ms) = overrides.stale_time_ms {
            self.cache.stale_time_ms = Some(ms);
        }
        if let Some(ms) = overrides.cache_time_ms {
            self.cache.cache_time_ms = Some(ms);
        }
        if let Some(retry) = overrides.retry {
            self.cache.retry = Some(retry);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings { logging, cache } = raw;

        let logging = build_logging_settings(logging)?;
        let cache = build_cache_settings(cache)?;

        Ok(Self { logging, cache })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheConfig, LoadError> {
    let defaults = CacheConfig::default();

    if let Some(retry) = cache.retry
        && retry > MAX_RETRIES
    {
        return Err(LoadError::invalid(
            "cache.retry",
            format!("must be at most {MAX_RETRIES}"),
        ));
    }

    let retry_base_delay_ms = cache
        .retry_base_delay_ms
        .unwrap_or(defaults.retry_base_delay_ms);
    let retry_max_delay_ms = cache
        .retry_max_delay_ms
        .unwrap_or(defaults.retry_max_delay_ms);
    if retry_max_delay_ms < retry_base_delay_ms {
        return Err(LoadError::invalid(
            "cache.retry_max_delay_ms",
            "must not be smaller than cache.retry_base_delay_ms",
        ));
    }

    Ok(CacheConfig {
        stale_time_ms: cache.stale_time_ms.unwrap_or(defaults.stale_time_ms),
        cache_time_ms: cache.cache_time_ms,
        retry: cache.retry,
        retry_base_delay_ms,
        retry_max_delay_ms,
        is_server: cache.is_server.unwrap_or(defaults.is_server),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    stale_time_ms: Option<u64>,
    cache_time_ms: Option<u64>,
    retry: Option<u32>,
    retry_base_delay_ms: Option<u64>,
    retry_max_delay_ms: Option<u64>,
    is_server: Option<bool>,
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[cfg(test)]
mod tests;
