//! Concurrent health verification and mirror pruning
//!
//! For every (content item, mirror) pair in the working set, the recorder
//! launches one probe; all probes are gated by a semaphore so a large batch
//! cannot exhaust outbound connections. Each outcome is handled independently
//! as it completes:
//!
//! 1. an [`Observation`] is appended unconditionally (the permanent audit
//!    trail driving ranking),
//! 2. a reachable mirror just refreshes the item's `last_checked`,
//! 3. anything else prunes that source from the item's live mirror set.
//!
//! A persistence failure on one pair is logged and skipped; the batch
//! continues.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio::sync::Semaphore;

use crate::error::Result;
use crate::models::{ContentItem, ContentType, Observation};
use crate::probe::Probe;
use crate::storage::{SharedCatalog, SharedObservationLog};

/// Per-batch statistics returned by [`HealthRecorder::verify_batch`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchStats {
    /// Probes issued
    pub checked: usize,
    /// Mirrors that answered with a success status
    pub healthy: usize,
    /// Mirrors removed from live sets
    pub pruned: usize,
    /// (content, mirror) pairs skipped due to persistence failures
    pub persist_errors: usize,
}

/// One unit of work: a single (content item, mirror) pair
#[derive(Debug, Clone)]
struct ProbeTask {
    content_id: i64,
    content_type: ContentType,
    source_name: String,
    url: String,
}

/// Fans out probes for a working set and records every outcome
pub struct HealthRecorder {
    prober: Arc<dyn Probe>,
    catalog: SharedCatalog,
    observations: SharedObservationLog,
    max_concurrent: usize,
}

impl HealthRecorder {
    pub fn new(
        prober: Arc<dyn Probe>,
        catalog: SharedCatalog,
        observations: SharedObservationLog,
        max_concurrent: usize,
    ) -> Self {
        Self {
            prober,
            catalog,
            observations,
            // A zero bound would deadlock the semaphore
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Probe every mirror of every item in the working set
    ///
    /// All probes are launched together and awaited as a group; completions
    /// are processed in arrival order, which is fine because each pair is
    /// independent and ranking aggregates over a window.
    pub async fn verify_batch(&self, working_set: &[ContentItem]) -> Result<BatchStats> {
        let tasks: Vec<ProbeTask> = working_set
            .iter()
            .flat_map(|item| {
                item.embed_links.iter().map(|(source, url)| ProbeTask {
                    content_id: item.id,
                    content_type: item.content_type,
                    source_name: source.clone(),
                    url: url.clone(),
                })
            })
            .collect();

        if tasks.is_empty() {
            return Ok(BatchStats::default());
        }

        tracing::info!(
            items = working_set.len(),
            mirrors = tasks.len(),
            max_concurrent = self.max_concurrent,
            "starting verification batch"
        );

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));

        let outcomes = stream::iter(tasks)
            .map(|task| {
                let sem = semaphore.clone();
                let prober = self.prober.clone();

                async move {
                    let outcome = match sem.acquire().await {
                        Ok(_permit) => prober.probe(&task.url).await,
                        // Closed semaphore means the batch is being torn down
                        Err(_) => crate::probe::ProbeOutcome::failure("probe dispatch aborted"),
                    };
                    (task, outcome)
                }
            })
            .buffer_unordered(self.max_concurrent)
            .collect::<Vec<_>>()
            .await;

        let mut stats = BatchStats::default();
        for (task, outcome) in outcomes {
            stats.checked += 1;

            let observation = Observation {
                content_id: task.content_id,
                content_type: task.content_type,
                source_name: task.source_name.clone(),
                url: task.url.clone(),
                status_code: outcome.status_code,
                response_time_ms: outcome.response_time_ms,
                checked_at: outcome.checked_at,
                error: outcome.error.clone(),
            };

            if let Err(e) = self.record_outcome(&observation) {
                stats.persist_errors += 1;
                tracing::warn!(
                    content_id = task.content_id,
                    source = %task.source_name,
                    error = %e,
                    "failed to persist probe outcome, skipping pair"
                );
                continue;
            }

            if observation.is_success() {
                stats.healthy += 1;
            } else {
                stats.pruned += 1;
            }
        }

        tracing::info!(
            checked = stats.checked,
            healthy = stats.healthy,
            pruned = stats.pruned,
            persist_errors = stats.persist_errors,
            "verification batch completed"
        );

        Ok(stats)
    }

    /// Append the observation, then update the catalog for one pair
    fn record_outcome(&self, observation: &Observation) -> Result<()> {
        // The audit log entry comes first; the catalog update must never
        // outrun it, or a pruned mirror could lack its failing observation.
        self.observations.append(observation)?;

        if observation.is_success() {
            self.catalog.touch_last_checked(
                observation.content_type,
                observation.content_id,
                observation.checked_at,
            )?;
        } else {
            let removed = self.catalog.prune_mirror(
                observation.content_type,
                observation.content_id,
                &observation.source_name,
                observation.checked_at,
            )?;
            if removed {
                tracing::warn!(
                    content_id = observation.content_id,
                    source = %observation.source_name,
                    status = observation.status_code,
                    url = %observation.url,
                    "broken mirror pruned"
                );
            }
        }

        Ok(())
    }
}
