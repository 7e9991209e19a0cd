//! Long-running cycle scheduler
//!
//! Drives the verification pipeline on a fixed interval: ingestion and
//! link-building collaborators first, then selection + health recording, then
//! source ranking, with a before/after catalog snapshot handed to the
//! notification sink. Any failure inside a cycle is caught at the cycle
//! boundary, reported, and the next cycle is still scheduled; a single failed
//! cycle never terminates the process.
//!
//! Cycles never overlap: the loop awaits cycle completion before waiting for
//! the next trigger. Shutdown is a watch channel checked by `tokio::select!`,
//! so a signal aborts the current cycle's in-flight probes and exits cleanly.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{watch, RwLock};
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::error::{Error, Result};
use crate::models::{CatalogCounts, ContentType, CycleOutcome, CycleReport};
use crate::notifications::NotificationSink;
use crate::ranker::SourceRanker;
use crate::recorder::HealthRecorder;
use crate::selector::{CycleSelector, SelectionMode};
use crate::storage::SharedCatalog;

// ============================================================================
// Collaborator Interfaces
// ============================================================================

/// External provider of new/updated content metadata
#[async_trait]
pub trait ContentIngestor: Send + Sync {
    /// Pull a batch of new or updated content into the catalog
    async fn ingest(&self) -> Result<()>;
}

/// External builder of embed-link URLs for catalog items
#[async_trait]
pub trait EmbedLinkBuilder: Send + Sync {
    /// Fill in embed links for items that are missing them
    async fn build_links(&self) -> Result<()>;
}

/// Slow-moving auxiliary sync run on its own low-frequency cadence
#[async_trait]
pub trait ExtrasSync: Send + Sync {
    async fn sync(&self) -> Result<()>;
}

/// Ingestor that does nothing (standalone deployments verify only)
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopIngestor;

#[async_trait]
impl ContentIngestor for NoopIngestor {
    async fn ingest(&self) -> Result<()> {
        Ok(())
    }
}

/// Link builder that does nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLinkBuilder;

#[async_trait]
impl EmbedLinkBuilder for NoopLinkBuilder {
    async fn build_links(&self) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// Cycle Scheduler
// ============================================================================

/// Scheduler lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    Running,
    Success,
    Failed,
}

/// The long-running control loop
pub struct CycleScheduler {
    catalog: SharedCatalog,
    selector: CycleSelector,
    recorder: HealthRecorder,
    ranker: SourceRanker,
    ingestor: Arc<dyn ContentIngestor>,
    link_builder: Arc<dyn EmbedLinkBuilder>,
    extras: Option<Arc<dyn ExtrasSync>>,
    sink: Arc<dyn NotificationSink>,
    config: SchedulerConfig,
    state: Arc<RwLock<CycleState>>,
    shutdown: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl CycleScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        catalog: SharedCatalog,
        selector: CycleSelector,
        recorder: HealthRecorder,
        ranker: SourceRanker,
        ingestor: Arc<dyn ContentIngestor>,
        link_builder: Arc<dyn EmbedLinkBuilder>,
        extras: Option<Arc<dyn ExtrasSync>>,
        sink: Arc<dyn NotificationSink>,
        config: SchedulerConfig,
    ) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        Self {
            catalog,
            selector,
            recorder,
            ranker,
            ingestor,
            link_builder,
            extras,
            sink,
            config,
            state: Arc::new(RwLock::new(CycleState::Idle)),
            shutdown,
            shutdown_rx,
        }
    }

    /// Current lifecycle state
    pub async fn state(&self) -> CycleState {
        *self.state.read().await
    }

    /// Request shutdown; the loop exits after aborting any in-flight cycle
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }

    fn snapshot_counts(&self) -> Result<CatalogCounts> {
        Ok(CatalogCounts {
            movies: self.catalog.count(ContentType::Movie)?,
            series: self.catalog.count(ContentType::Series)?,
        })
    }

    /// The fallible cycle body; any step error surfaces here
    async fn cycle_steps(&self, mode: SelectionMode) -> Result<(usize, usize, usize)> {
        self.ingestor
            .ingest()
            .await
            .map_err(|e| Error::cycle_step("ingestion", e))?;

        self.link_builder
            .build_links()
            .await
            .map_err(|e| Error::cycle_step("link building", e))?;

        let working_set = self
            .selector
            .select(mode)
            .map_err(|e| Error::cycle_step("selection", e))?;

        let stats = self
            .recorder
            .verify_batch(&working_set)
            .await
            .map_err(|e| Error::cycle_step("verification", e))?;

        let ranked = self
            .ranker
            .rank_all()
            .map_err(|e| Error::cycle_step("ranking", e))?;

        Ok((stats.checked, stats.pruned, ranked))
    }

    /// Run exactly one cycle with failure containment
    ///
    /// Errors are caught at this boundary: the cycle is marked failed,
    /// reported through the sink, and the report is returned. Only sink
    /// delivery problems are reduced to log lines.
    pub async fn run_once(&self, mode: SelectionMode) -> CycleReport {
        let cycle_id = Uuid::new_v4();
        let started_at = Utc::now();

        *self.state.write().await = CycleState::Running;
        tracing::info!(cycle_id = %cycle_id, mode = %mode, "cycle started");

        let counts_before = self.snapshot_counts().unwrap_or_default();
        let outcome = self.cycle_steps(mode).await;
        let counts_after = self.snapshot_counts().unwrap_or(counts_before);
        let finished_at = Utc::now();

        let report = match outcome {
            Ok((links_checked, links_pruned, sources_ranked)) => {
                *self.state.write().await = CycleState::Success;
                tracing::info!(
                    cycle_id = %cycle_id,
                    links_checked,
                    links_pruned,
                    sources_ranked,
                    "cycle completed"
                );
                CycleReport {
                    cycle_id,
                    outcome: CycleOutcome::Success,
                    started_at,
                    finished_at,
                    counts_before,
                    counts_after,
                    links_checked,
                    links_pruned,
                    sources_ranked,
                    error: None,
                }
            }
            Err(e) => {
                *self.state.write().await = CycleState::Failed;
                let chain = e.chain();
                tracing::error!(cycle_id = %cycle_id, error = %chain, "cycle failed");

                if let Err(send_err) = self
                    .sink
                    .send_error("mirrorwatch cycle failed", &chain)
                    .await
                {
                    tracing::warn!(error = %send_err, "failed to deliver error report");
                }

                CycleReport {
                    cycle_id,
                    outcome: CycleOutcome::Failed,
                    started_at,
                    finished_at,
                    counts_before,
                    counts_after,
                    links_checked: 0,
                    links_pruned: 0,
                    sources_ranked: 0,
                    error: Some(chain),
                }
            }
        };

        if report.outcome == CycleOutcome::Success {
            if let Err(send_err) = self
                .sink
                .send_report("mirrorwatch cycle completed", &report)
                .await
            {
                tracing::warn!(error = %send_err, "failed to deliver cycle report");
            }
        }

        *self.state.write().await = CycleState::Idle;
        report
    }

    /// Run the extras sub-cycle with the same containment as a main cycle
    async fn run_extras(&self) {
        let Some(extras) = &self.extras else {
            return;
        };

        tracing::info!("extras sync started");
        match extras.sync().await {
            Ok(()) => tracing::info!("extras sync completed"),
            Err(e) => {
                let chain = e.chain();
                tracing::error!(error = %chain, "extras sync failed");
                if let Err(send_err) = self
                    .sink
                    .send_error("mirrorwatch extras sync failed", &chain)
                    .await
                {
                    tracing::warn!(error = %send_err, "failed to deliver extras error report");
                }
            }
        }
    }

    /// Run cycles forever on the configured interval until shutdown
    ///
    /// An initial cycle runs immediately; the extras sub-cycle (when enabled)
    /// runs immediately and then on its own slower cadence.
    pub async fn run_loop(&self, mode: SelectionMode) -> Result<()> {
        let mut shutdown_rx = self.shutdown_rx.clone();

        tracing::info!(
            interval_hours = self.config.interval_hours,
            extras_enabled = self.config.extras_enabled,
            mode = %mode,
            "scheduler loop starting"
        );

        if self.config.extras_enabled {
            self.run_extras().await;
        }

        let cycle_period = std::time::Duration::from_secs(self.config.interval_hours * 3600);
        let extras_period =
            std::time::Duration::from_secs(self.config.extras_interval_days * 86_400);

        let mut cycle_timer = tokio::time::interval(cycle_period);
        cycle_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let mut extras_timer = tokio::time::interval(extras_period);
        extras_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick of a fresh interval completes immediately; extras
        // already ran above, so consume it.
        extras_timer.tick().await;

        loop {
            tokio::select! {
                _ = cycle_timer.tick() => {
                    tokio::select! {
                        report = self.run_once(mode) => {
                            tracing::info!(
                                outcome = ?report.outcome,
                                next_run_in_secs = cycle_period.as_secs(),
                                "waiting for next cycle trigger"
                            );
                        }
                        _ = shutdown_rx.changed() => {
                            tracing::info!("shutdown requested, aborting in-flight cycle");
                            break;
                        }
                    }
                }
                _ = extras_timer.tick() => {
                    if self.config.extras_enabled {
                        self.run_extras().await;
                    }
                }
                _ = shutdown_rx.changed() => {
                    tracing::info!("shutdown requested");
                    break;
                }
            }
        }

        *self.state.write().await = CycleState::Idle;
        tracing::info!("scheduler loop stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RankingConfig, SelectionConfig};
    use crate::models::ContentItem;
    use crate::notifications::RecordingSink;
    use crate::probe::{Probe, ProbeOutcome};
    use crate::ranker::RankingPolicy;
    use crate::storage::{CatalogRepository, MemoryStore, SourceRegistry};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct AlwaysUp;

    #[async_trait]
    impl Probe for AlwaysUp {
        async fn probe(&self, _url: &str) -> ProbeOutcome {
            ProbeOutcome {
                status_code: 200,
                response_time_ms: 50,
                checked_at: Utc::now(),
                error: None,
            }
        }
    }

    struct FailingIngestor;

    #[async_trait]
    impl ContentIngestor for FailingIngestor {
        async fn ingest(&self) -> Result<()> {
            Err(Error::other("upstream catalog unavailable"))
        }
    }

    struct CountingIngestor(AtomicUsize);

    #[async_trait]
    impl ContentIngestor for CountingIngestor {
        async fn ingest(&self) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn scheduler_with(
        store: Arc<MemoryStore>,
        ingestor: Arc<dyn ContentIngestor>,
        sink: Arc<dyn NotificationSink>,
    ) -> CycleScheduler {
        let selector = CycleSelector::new(
            store.clone(),
            store.clone(),
            SelectionConfig {
                batch_size: 50,
                staleness_days: 7,
                failure_lookback_hours: 24,
            },
        );
        let recorder = HealthRecorder::new(Arc::new(AlwaysUp), store.clone(), store.clone(), 4);
        let ranker = SourceRanker::new(
            store.clone(),
            store.clone(),
            RankingPolicy::default(),
            RankingConfig {
                window_days: 7,
                window_limit: 1000,
                policy: None,
            },
        );

        CycleScheduler::new(
            store,
            selector,
            recorder,
            ranker,
            ingestor,
            Arc::new(NoopLinkBuilder),
            None,
            sink,
            SchedulerConfig {
                interval_hours: 6,
                extras_interval_days: 7,
                extras_enabled: false,
            },
        )
    }

    #[tokio::test]
    async fn test_successful_cycle_reports_and_returns_to_idle() {
        let store = Arc::new(MemoryStore::new());
        store.register_source("vidsrc").unwrap();
        store
            .upsert(&ContentItem::new(
                1,
                ContentType::Movie,
                HashMap::from([("vidsrc".to_string(), "u1".to_string())]),
            ))
            .unwrap();

        let sink = Arc::new(RecordingSink::new());
        let scheduler = scheduler_with(store, Arc::new(NoopIngestor), sink.clone());

        let report = scheduler.run_once(SelectionMode::Delta).await;
        assert_eq!(report.outcome, CycleOutcome::Success);
        assert_eq!(report.links_checked, 1);
        assert_eq!(report.sources_ranked, 1);
        assert_eq!(scheduler.state().await, CycleState::Idle);

        let reports = sink.reports();
        assert_eq!(reports.len(), 1);
        assert!(sink.errors().is_empty());
    }

    #[tokio::test]
    async fn test_failed_cycle_is_contained_and_reported() {
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(RecordingSink::new());
        let scheduler = scheduler_with(store, Arc::new(FailingIngestor), sink.clone());

        let report = scheduler.run_once(SelectionMode::Delta).await;
        assert_eq!(report.outcome, CycleOutcome::Failed);
        let chain = report.error.unwrap();
        assert!(chain.contains("ingestion"));
        assert!(chain.contains("upstream catalog unavailable"));

        // Scheduler survives the failure and can run again
        assert_eq!(scheduler.state().await, CycleState::Idle);
        let errors = sink.errors();
        assert_eq!(errors.len(), 1);
        assert!(sink.reports().is_empty());
    }

    #[tokio::test]
    async fn test_loop_stops_on_shutdown() {
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(RecordingSink::new());
        let ingestor = Arc::new(CountingIngestor(AtomicUsize::new(0)));
        let scheduler = Arc::new(scheduler_with(store, ingestor.clone(), sink));

        let runner = scheduler.clone();
        let handle = tokio::spawn(async move { runner.run_loop(SelectionMode::Delta).await });

        // Let the immediate first cycle run, then stop
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        scheduler.stop();

        tokio::time::timeout(std::time::Duration::from_secs(2), handle)
            .await
            .expect("loop did not stop after shutdown")
            .unwrap()
            .unwrap();

        assert!(ingestor.0.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_report_counts_snapshot_delta() {
        struct SeedingIngestor(Arc<MemoryStore>);

        #[async_trait]
        impl ContentIngestor for SeedingIngestor {
            async fn ingest(&self) -> Result<()> {
                self.0.upsert(&ContentItem::new(
                    500,
                    ContentType::Movie,
                    HashMap::new(),
                ))?;
                Ok(())
            }
        }

        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(RecordingSink::new());
        let scheduler = scheduler_with(
            store.clone(),
            Arc::new(SeedingIngestor(store.clone())),
            sink,
        );

        let report = scheduler.run_once(SelectionMode::Delta).await;
        assert_eq!(report.new_items().movies, 1);
    }
}
