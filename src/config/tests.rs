use std::io::Write;
use std::time::Duration;

use serial_test::serial;
use tempfile::NamedTempFile;

use super::*;

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.cache.stale_time_ms = Some(1_000);
    raw.logging.level = Some("info".to_string());

    let overrides = Overrides {
        stale_time_ms: Some(250),
        log_level: Some("debug".to_string()),
        ..Default::default()
    };

    raw.apply_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.cache.stale_time(), Duration::from_millis(250));
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
}

#[test]
fn defaults_match_client_context() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");
    assert_eq!(settings.cache, CacheConfig::default());
    assert!(!settings.cache.environment().is_server());
    assert_eq!(settings.cache.retry_policy().retries, 3);
    assert_eq!(settings.cache.cache_time(), Duration::from_secs(300));
}

#[test]
fn server_override_switches_context_defaults() {
    let mut raw = RawSettings::default();
    raw.apply_overrides(&Overrides {
        is_server: Some(true),
        ..Default::default()
    });
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(settings.cache.environment().is_server());
    assert_eq!(settings.cache.retry_policy().retries, 0);
    assert_eq!(settings.cache.cache_time(), Duration::MAX);
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = Overrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn invalid_values_name_their_key() {
    let mut raw = RawSettings::default();
    raw.logging.level = Some("loud".to_string());
    let err = Settings::from_raw(raw).expect_err("bad level");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "logging.level",
            ..
        }
    ));

    let mut raw = RawSettings::default();
    raw.cache.retry_base_delay_ms = Some(5_000);
    raw.cache.retry_max_delay_ms = Some(1_000);
    let err = Settings::from_raw(raw).expect_err("inverted delays");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "cache.retry_max_delay_ms",
            ..
        }
    ));

    let mut raw = RawSettings::default();
    raw.cache.retry = Some(MAX_RETRIES + 1);
    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn parse_snapshot_arguments() {
    let args = CliArgs::parse_from([
        "hydrocache",
        "snapshot",
        "--key",
        r#"["todos"]"#,
        "--data",
        "[1,2]",
        "--key",
        "\"user\"",
        "--data",
        "{\"id\":7}",
        "--output",
        "/tmp/state.json",
        "--retry",
        "1",
    ]);

    match args.command {
        Command::Snapshot(snapshot) => {
            assert_eq!(snapshot.keys, vec![r#"["todos"]"#, "\"user\""]);
            assert_eq!(snapshot.data, vec!["[1,2]", "{\"id\":7}"]);
            assert_eq!(
                snapshot.output.as_deref(),
                Some(std::path::Path::new("/tmp/state.json"))
            );
        }
        other => panic!("wrong command parsed: {other:?}"),
    }
    assert_eq!(args.overrides.retry, Some(1));
}

#[test]
fn parse_global_overrides_before_subcommand() {
    let args = CliArgs::parse_from([
        "hydrocache",
        "--is-server",
        "yes",
        "--log-level",
        "warn",
        "hash",
        "[\"a\"]",
    ]);

    assert_eq!(args.overrides.is_server, Some(true));
    assert_eq!(args.overrides.log_level.as_deref(), Some("warn"));
    assert!(matches!(args.command, Command::Hash(HashArgs { ref key }) if key == "[\"a\"]"));
}

#[test]
fn parse_inspect_arguments() {
    let args = CliArgs::parse_from(["hydrocache", "inspect", "/tmp/state.json"]);
    match args.command {
        Command::Inspect(inspect) => {
            assert_eq!(inspect.file, std::path::Path::new("/tmp/state.json"));
        }
        other => panic!("wrong command parsed: {other:?}"),
    }
}

#[test]
#[serial]
fn config_file_and_environment_are_layered() {
    let mut file = NamedTempFile::with_suffix(".toml").expect("tmp file");
    writeln!(
        file,
        "[logging]\nlevel = \"warn\"\n\n[cache]\nstale_time_ms = 1000\nretry = 2"
    )
    .expect("write config");

    let path = file.path().to_string_lossy().into_owned();
    let args = CliArgs::parse_from([
        "hydrocache",
        "--config-file",
        path.as_str(),
        "--retry",
        "5",
        "hash",
        "1",
    ]);

    // SAFETY: serialized with every other test touching the process environment.
    unsafe { std::env::set_var("HYDROCACHE__CACHE__STALE_TIME_MS", "2000") };
    let settings = load(&args);
    unsafe { std::env::remove_var("HYDROCACHE__CACHE__STALE_TIME_MS") };
    let settings = settings.expect("layered settings");

    assert_eq!(settings.logging.level, LevelFilter::WARN);
    assert_eq!(settings.cache.stale_time_ms, 2_000);
    assert_eq!(settings.cache.retry, Some(5));
}
