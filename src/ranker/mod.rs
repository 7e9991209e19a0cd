//! Source ranking from the trailing observation window
//!
//! For every registered mirror source, the ranker aggregates recent
//! observations into a success rate and mean latency, then assigns an ordinal
//! priority tier through a configurable policy table. The rank is a
//! materialized view: recomputed from the log window on every pass, never
//! patched incrementally, so re-running with no new observations is a no-op.

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::RankingConfig;
use crate::error::Result;
use crate::models::{Observation, SourceRank};
use crate::storage::{SharedObservationLog, SharedSourceRegistry};

/// One priority tier rule
///
/// A source matches when its success rate exceeds `min_success_rate` and, if
/// `max_avg_response_ms` is set, its mean latency is below that bound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierRule {
    pub priority: u8,
    pub min_success_rate: f64,
    pub max_avg_response_ms: Option<u64>,
}

/// Ordered tier thresholds; first match wins
///
/// Kept as data rather than inline constants so operators can tune the
/// cutoffs without a rebuild. The default table:
///
/// | priority | condition |
/// |---|---|
/// | 1 | rate > 0.9 and avg < 1000ms |
/// | 2 | rate > 0.8 and avg < 2000ms |
/// | 3 | rate > 0.7 |
/// | 4 | rate > 0.5 |
/// | 5 | otherwise |
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingPolicy {
    pub tiers: Vec<TierRule>,
    pub fallback_priority: u8,
}

impl Default for RankingPolicy {
    fn default() -> Self {
        Self {
            tiers: vec![
                TierRule {
                    priority: 1,
                    min_success_rate: 0.9,
                    max_avg_response_ms: Some(1000),
                },
                TierRule {
                    priority: 2,
                    min_success_rate: 0.8,
                    max_avg_response_ms: Some(2000),
                },
                TierRule {
                    priority: 3,
                    min_success_rate: 0.7,
                    max_avg_response_ms: None,
                },
                TierRule {
                    priority: 4,
                    min_success_rate: 0.5,
                    max_avg_response_ms: None,
                },
            ],
            fallback_priority: 5,
        }
    }
}

impl RankingPolicy {
    /// Assign a priority tier; first matching rule wins
    pub fn priority_for(&self, success_rate: f64, avg_response_time_ms: u64) -> u8 {
        for tier in &self.tiers {
            if success_rate > tier.min_success_rate
                && tier
                    .max_avg_response_ms
                    .map(|max| avg_response_time_ms < max)
                    .unwrap_or(true)
            {
                return tier.priority;
            }
        }
        self.fallback_priority
    }
}

/// Aggregates computed over one source's observation window
#[derive(Debug, Clone, PartialEq)]
pub struct WindowStats {
    pub total: usize,
    pub success_count: usize,
    pub success_rate: f64,
    /// Mean over successful observations only; 0 when none succeeded
    pub avg_response_time_ms: u64,
}

impl WindowStats {
    /// Aggregate a window of observations
    ///
    /// Returns `None` for an empty window: no data means the source's prior
    /// rank must be left untouched, not zeroed.
    pub fn from_window(window: &[Observation]) -> Option<Self> {
        if window.is_empty() {
            return None;
        }

        let total = window.len();
        let successes: Vec<&Observation> = window.iter().filter(|o| o.is_success()).collect();
        let success_count = successes.len();
        let avg_response_time_ms = if success_count == 0 {
            0
        } else {
            successes.iter().map(|o| o.response_time_ms).sum::<u64>() / success_count as u64
        };

        Some(Self {
            total,
            success_count,
            success_rate: success_count as f64 / total as f64,
            avg_response_time_ms,
        })
    }
}

/// Recomputes and persists the rank of every registered source
pub struct SourceRanker {
    observations: SharedObservationLog,
    registry: SharedSourceRegistry,
    policy: RankingPolicy,
    config: RankingConfig,
}

impl SourceRanker {
    pub fn new(
        observations: SharedObservationLog,
        registry: SharedSourceRegistry,
        policy: RankingPolicy,
        config: RankingConfig,
    ) -> Self {
        Self {
            observations,
            registry,
            policy,
            config,
        }
    }

    /// Rank every registered source; returns the number of ranks recomputed
    ///
    /// Sources with no observations in the window are skipped and keep their
    /// previous rank entry unchanged.
    pub fn rank_all(&self) -> Result<usize> {
        let names = self.registry.source_names()?;
        let since = Utc::now() - Duration::days(self.config.window_days);
        let mut ranked = 0;

        for name in names {
            let window = self
                .observations
                .for_source_since(&name, since, self.config.window_limit)?;

            let Some(stats) = WindowStats::from_window(&window) else {
                tracing::debug!(source = %name, "no observations in window, rank unchanged");
                continue;
            };

            let priority = self
                .policy
                .priority_for(stats.success_rate, stats.avg_response_time_ms);

            tracing::info!(
                source = %name,
                success_rate = format!("{:.2}", stats.success_rate),
                avg_ms = stats.avg_response_time_ms,
                total = stats.total,
                priority = priority,
                "source ranked"
            );

            self.registry.upsert_rank(&SourceRank {
                name,
                priority,
                avg_response_time_ms: stats.avg_response_time_ms,
                last_checked: Utc::now(),
            })?;
            ranked += 1;
        }

        Ok(ranked)
    }
}
