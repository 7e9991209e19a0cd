//! Configuration loading tests
//!
//! Environment variables are process-global, so every test here is serialized
//! and restores the variables it touches.

use mirrorwatch::config::Config;
use serial_test::serial;

fn clear_env() {
    for key in [
        "MIRRORWATCH_DATABASE_PATH",
        "MIRRORWATCH_INTERVAL_HOURS",
        "MIRRORWATCH_EXTRAS_INTERVAL_DAYS",
        "MIRRORWATCH_EXTRAS_ENABLED",
        "MIRRORWATCH_BATCH_SIZE",
        "MIRRORWATCH_STALENESS_DAYS",
        "MIRRORWATCH_FAILURE_LOOKBACK_HOURS",
        "MIRRORWATCH_MAX_CONCURRENT_PROBES",
        "MIRRORWATCH_PROBE_TIMEOUT_SECS",
        "MIRRORWATCH_PROBE_RATE_LIMIT",
        "MIRRORWATCH_RANK_WINDOW_DAYS",
        "MIRRORWATCH_RANK_WINDOW_LIMIT",
        "MIRRORWATCH_WEBHOOK_URL",
        "MIRRORWATCH_LOG_LEVEL",
        "MIRRORWATCH_LOG_FORMAT",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
#[serial]
fn test_from_env_defaults() {
    clear_env();

    let config = Config::from_env().unwrap();
    assert_eq!(config.probe.max_concurrent_probes, 10);
    assert_eq!(config.probe.rate_limit, 20);
    assert_eq!(config.probe.timeout_secs, 5);
    assert_eq!(config.selection.batch_size, 50);
    assert_eq!(config.selection.staleness_days, 7);
    assert_eq!(config.selection.failure_lookback_hours, 24);
    assert_eq!(config.ranking.window_days, 7);
    assert_eq!(config.ranking.window_limit, 1000);
    assert_eq!(config.scheduler.interval_hours, 6);
    assert_eq!(config.scheduler.extras_interval_days, 7);
    assert!(config.scheduler.extras_enabled);
    assert!(config.notifications.webhook_url.is_none());
    assert!(config.validate().is_ok());
}

#[test]
#[serial]
fn test_from_env_overrides() {
    clear_env();
    std::env::set_var("MIRRORWATCH_DATABASE_PATH", "/tmp/mw-test.db");
    std::env::set_var("MIRRORWATCH_INTERVAL_HOURS", "12");
    std::env::set_var("MIRRORWATCH_EXTRAS_ENABLED", "false");
    std::env::set_var("MIRRORWATCH_BATCH_SIZE", "25");
    std::env::set_var("MIRRORWATCH_MAX_CONCURRENT_PROBES", "3");
    std::env::set_var("MIRRORWATCH_WEBHOOK_URL", "https://hooks.example/report");

    let config = Config::from_env().unwrap();
    assert_eq!(
        config.database.sqlite_path,
        std::path::PathBuf::from("/tmp/mw-test.db")
    );
    assert_eq!(config.scheduler.interval_hours, 12);
    assert!(!config.scheduler.extras_enabled);
    assert_eq!(config.selection.batch_size, 25);
    assert_eq!(config.probe.max_concurrent_probes, 3);
    assert_eq!(
        config.notifications.webhook_url.as_deref(),
        Some("https://hooks.example/report")
    );
    assert!(config.validate().is_ok());

    clear_env();
}

#[test]
#[serial]
fn test_unparseable_env_falls_back_to_default() {
    clear_env();
    std::env::set_var("MIRRORWATCH_INTERVAL_HOURS", "soon");

    let config = Config::from_env().unwrap();
    assert_eq!(config.scheduler.interval_hours, 6);

    clear_env();
}

#[test]
#[serial]
fn test_webhook_url_validated_at_startup() {
    clear_env();
    std::env::set_var("MIRRORWATCH_WEBHOOK_URL", "definitely not a url");

    let config = Config::from_env().unwrap();
    assert!(config.validate().is_err());

    clear_env();
}
