//! Configuration management for mirrorwatch
//!
//! This module handles loading and validating configuration from environment
//! variables and TOML files. Validation failures are the only fatal condition
//! in the crate and abort the process before the scheduler loop starts.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ranker::RankingPolicy;

/// Main configuration structure
///
/// Every section falls back to its default, so a TOML file only needs to
/// spell out the values it overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Probe configuration
    pub probe: ProbeConfig,

    /// Working-set selection configuration
    pub selection: SelectionConfig,

    /// Ranking window configuration
    pub ranking: RankingConfig,

    /// Scheduler configuration
    pub scheduler: SchedulerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Notification configuration
    pub notifications: NotificationConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Probe-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Maximum number of simultaneous in-flight probes
    pub max_concurrent_probes: usize,

    /// Outbound rate limit (probes per second)
    pub rate_limit: u32,

    /// Per-probe deadline in seconds
    pub timeout_secs: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            max_concurrent_probes: 10,
            rate_limit: 20,
            timeout_secs: 5,
        }
    }
}

/// Working-set selection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    /// Per-content-type cap on items selected per cycle
    pub batch_size: usize,

    /// Full mode: items unchecked for this many days qualify
    pub staleness_days: i64,

    /// Delta mode: failing observations within this many hours qualify
    pub failure_lookback_hours: i64,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            staleness_days: 7,
            failure_lookback_hours: 24,
        }
    }
}

/// Ranking window configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    /// Trailing window in days
    pub window_days: i64,

    /// Maximum observations considered per source
    pub window_limit: usize,

    /// Tier threshold overrides; the built-in cascade applies when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<RankingPolicy>,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            window_days: 7,
            window_limit: 1000,
            policy: None,
        }
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Hours between cycles
    pub interval_hours: u64,

    /// Days between extras sub-cycles
    pub extras_interval_days: u64,

    /// Enable the extras sub-cycle
    pub extras_enabled: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_hours: 6,
            extras_interval_days: 7,
            extras_enabled: true,
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database path
    pub sqlite_path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("data/mirrorwatch.db"),
        }
    }
}

/// Notification configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Webhook endpoint for cycle reports; reports are dropped when unset
    pub webhook_url: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let extras_enabled = std::env::var("MIRRORWATCH_EXTRAS_ENABLED")
            .map(|v| !matches!(v.as_str(), "0" | "false" | "False"))
            .unwrap_or(true);

        let sqlite_path = std::env::var("MIRRORWATCH_DATABASE_PATH")
            .unwrap_or_else(|_| String::from("data/mirrorwatch.db"))
            .into();

        let webhook_url = std::env::var("MIRRORWATCH_WEBHOOK_URL").ok();

        let log_level =
            std::env::var("MIRRORWATCH_LOG_LEVEL").unwrap_or_else(|_| String::from("info"));
        let log_format =
            std::env::var("MIRRORWATCH_LOG_FORMAT").unwrap_or_else(|_| String::from("text"));

        Ok(Self {
            probe: ProbeConfig {
                max_concurrent_probes: env_parse("MIRRORWATCH_MAX_CONCURRENT_PROBES", 10),
                rate_limit: env_parse("MIRRORWATCH_PROBE_RATE_LIMIT", 20),
                timeout_secs: env_parse("MIRRORWATCH_PROBE_TIMEOUT_SECS", 5),
            },
            selection: SelectionConfig {
                batch_size: env_parse("MIRRORWATCH_BATCH_SIZE", 50),
                staleness_days: env_parse("MIRRORWATCH_STALENESS_DAYS", 7),
                failure_lookback_hours: env_parse("MIRRORWATCH_FAILURE_LOOKBACK_HOURS", 24),
            },
            ranking: RankingConfig {
                window_days: env_parse("MIRRORWATCH_RANK_WINDOW_DAYS", 7),
                window_limit: env_parse("MIRRORWATCH_RANK_WINDOW_LIMIT", 1000),
                // Tier overrides are structured data; they come from the TOML
                // file, not the environment.
                policy: None,
            },
            scheduler: SchedulerConfig {
                interval_hours: env_parse("MIRRORWATCH_INTERVAL_HOURS", 6),
                extras_interval_days: env_parse("MIRRORWATCH_EXTRAS_INTERVAL_DAYS", 7),
                extras_enabled,
            },
            database: DatabaseConfig { sqlite_path },
            notifications: NotificationConfig { webhook_url },
            logging: LoggingConfig {
                level: log_level,
                format: log_format,
            },
        })
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate configuration values
    ///
    /// These checks are the fatal startup gate; everything past this point is
    /// contained per probe or per cycle.
    pub fn validate(&self) -> Result<()> {
        if self.probe.max_concurrent_probes == 0 {
            anyhow::bail!("max_concurrent_probes must be greater than 0");
        }

        if self.probe.rate_limit == 0 {
            anyhow::bail!("rate_limit must be greater than 0");
        }

        if self.probe.timeout_secs == 0 {
            anyhow::bail!("probe timeout_secs must be greater than 0");
        }

        if self.selection.batch_size == 0 {
            anyhow::bail!("batch_size must be greater than 0");
        }

        if self.scheduler.interval_hours == 0 {
            anyhow::bail!("interval_hours must be greater than 0");
        }

        if self.ranking.window_limit == 0 {
            anyhow::bail!("ranking window_limit must be greater than 0");
        }

        if let Some(policy) = &self.ranking.policy {
            if policy.tiers.is_empty() {
                anyhow::bail!("ranking policy must define at least one tier");
            }
            if policy
                .tiers
                .iter()
                .any(|t| t.priority == 0 || t.priority > 5)
                || policy.fallback_priority == 0
                || policy.fallback_priority > 5
            {
                anyhow::bail!("ranking policy priorities must be between 1 and 5");
            }
        }

        if self.database.sqlite_path.as_os_str().is_empty() {
            anyhow::bail!("database path must not be empty");
        }

        if let Some(url) = &self.notifications.webhook_url {
            url::Url::parse(url).with_context(|| format!("invalid webhook URL: {url}"))?;
        }

        Ok(())
    }

    /// Per-probe deadline as Duration
    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe.timeout_secs)
    }

    /// Cycle interval as Duration
    #[must_use]
    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler.interval_hours * 3600)
    }

    /// Extras sub-cycle interval as Duration
    #[must_use]
    pub fn extras_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler.extras_interval_days * 86_400)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ranker::TierRule;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert!(config.ranking.policy.is_none());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let mut config = Config::default();
        config.probe.max_concurrent_probes = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let mut config = Config::default();
        config.selection.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_webhook_rejected() {
        let mut config = Config::default();
        config.notifications.webhook_url = Some("not a url".to_string());
        assert!(config.validate().is_err());

        config.notifications.webhook_url = Some("https://hooks.example/report".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_partial_sections_use_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mirrorwatch.toml");
        std::fs::write(
            &path,
            r#"
[scheduler]
interval_hours = 12

[database]
sqlite_path = "/var/lib/mirrorwatch/catalog.db"
"#,
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.scheduler.interval_hours, 12);
        assert_eq!(
            config.database.sqlite_path,
            PathBuf::from("/var/lib/mirrorwatch/catalog.db")
        );
        // Untouched sections keep their defaults
        assert_eq!(config.probe.max_concurrent_probes, 10);
        assert_eq!(config.selection.batch_size, 50);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_ranking_policy_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mirrorwatch.toml");
        std::fs::write(
            &path,
            r#"
[ranking]
window_days = 3

[ranking.policy]
fallback_priority = 3

[[ranking.policy.tiers]]
priority = 1
min_success_rate = 0.95
max_avg_response_ms = 500
"#,
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.ranking.window_days, 3);
        assert!(config.validate().is_ok());

        let policy = config.ranking.policy.unwrap();
        assert_eq!(policy.fallback_priority, 3);
        assert_eq!(
            policy.tiers,
            vec![TierRule {
                priority: 1,
                min_success_rate: 0.95,
                max_avg_response_ms: Some(500),
            }]
        );
        assert_eq!(policy.priority_for(1.0, 100), 1);
        assert_eq!(policy.priority_for(0.9, 100), 3);
    }

    #[test]
    fn test_out_of_range_policy_priorities_rejected() {
        let mut config = Config::default();
        config.ranking.policy = Some(RankingPolicy {
            tiers: vec![TierRule {
                priority: 9,
                min_success_rate: 0.5,
                max_avg_response_ms: None,
            }],
            fallback_priority: 5,
        });
        assert!(config.validate().is_err());

        config.ranking.policy = Some(RankingPolicy {
            tiers: vec![],
            fallback_priority: 5,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duration_helpers() {
        let config = Config::default();
        assert_eq!(config.probe_timeout(), Duration::from_secs(5));
        assert_eq!(config.cycle_interval(), Duration::from_secs(6 * 3600));
        assert_eq!(config.extras_interval(), Duration::from_secs(7 * 86_400));
    }
}
