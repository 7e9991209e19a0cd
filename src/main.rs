use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mirrorwatch::config::{Config, LoggingConfig};
use mirrorwatch::notifications::{NoopSink, NotificationSink, WebhookSink};
use mirrorwatch::probe::HttpProber;
use mirrorwatch::ranker::SourceRanker;
use mirrorwatch::recorder::HealthRecorder;
use mirrorwatch::scheduler::{CycleScheduler, NoopIngestor, NoopLinkBuilder};
use mirrorwatch::selector::{CycleSelector, SelectionMode};
use mirrorwatch::storage::SqliteStore;

#[derive(Parser)]
#[command(
    name = "mirrorwatch",
    version,
    about = "Embed mirror health verification and ranking engine",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML config file; environment variables are used when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json); overrides MIRRORWATCH_LOG_FORMAT
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run verification cycles
    Run {
        /// Run a single cycle and exit instead of looping
        #[arg(long, default_value = "false")]
        once: bool,

        /// Use exhaustive (full) selection instead of delta
        #[arg(long, default_value = "false")]
        full: bool,
    },

    /// Run one verification pass without ranking
    Check {
        /// Selection mode (delta, full)
        #[arg(short, long, default_value = "delta")]
        mode: String,
    },

    /// Recompute source ranks from the observation log
    Rank,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Configuration failures are the only fatal error class; everything past
    // this point is contained per probe or per cycle.
    let config = match &cli.config {
        Some(path) => Config::from_file(path).context("failed to load configuration file")?,
        None => Config::from_env().context("failed to load configuration")?,
    };
    config.validate().context("invalid configuration")?;

    setup_tracing(&config.logging, cli.log_format.as_deref(), cli.verbose)?;

    tracing::info!("mirrorwatch starting");

    match cli.command {
        Commands::Run { once, full } => {
            let mode = if full {
                SelectionMode::Full
            } else {
                SelectionMode::Delta
            };
            run(&config, mode, once).await?;
        }

        Commands::Check { mode } => {
            let mode = parse_mode(&mode)?;
            check(&config, mode).await?;
        }

        Commands::Rank => {
            rank(&config)?;
        }
    }

    tracing::info!("mirrorwatch completed");
    Ok(())
}

fn setup_tracing(logging: &LoggingConfig, format_override: Option<&str>, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("mirrorwatch=debug,info")
    } else {
        tracing_subscriber::EnvFilter::new(format!("mirrorwatch={},warn", logging.level))
    };

    match format_override.unwrap_or(&logging.format) {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}

fn parse_mode(mode: &str) -> Result<SelectionMode> {
    match mode {
        "delta" => Ok(SelectionMode::Delta),
        "full" => Ok(SelectionMode::Full),
        other => anyhow::bail!("unknown selection mode: {other} (expected delta or full)"),
    }
}

struct Pipeline {
    store: Arc<SqliteStore>,
    selector: CycleSelector,
    recorder: HealthRecorder,
    ranker: SourceRanker,
    sink: Arc<dyn NotificationSink>,
}

/// Wire the pipeline from configuration
///
/// Clients and repositories are constructed once here and injected into each
/// component; nothing holds module-level state.
fn build_pipeline(config: &Config) -> Result<Pipeline> {
    let store = Arc::new(SqliteStore::new(&config.database.sqlite_path)?);

    let prober = Arc::new(HttpProber::with_timeout(
        config.probe.rate_limit,
        config.probe_timeout(),
    )?);

    let selector = CycleSelector::new(store.clone(), store.clone(), config.selection.clone());
    let recorder = HealthRecorder::new(
        prober,
        store.clone(),
        store.clone(),
        config.probe.max_concurrent_probes,
    );
    let policy = config.ranking.policy.clone().unwrap_or_default();
    let ranker = SourceRanker::new(store.clone(), store.clone(), policy, config.ranking.clone());

    let sink: Arc<dyn NotificationSink> = match &config.notifications.webhook_url {
        Some(url) => Arc::new(WebhookSink::new(url.clone())?),
        None => Arc::new(NoopSink),
    };

    Ok(Pipeline {
        store,
        selector,
        recorder,
        ranker,
        sink,
    })
}

async fn run(config: &Config, mode: SelectionMode, once: bool) -> Result<()> {
    let pipeline = build_pipeline(config)?;

    let scheduler = Arc::new(CycleScheduler::new(
        pipeline.store.clone(),
        pipeline.selector,
        pipeline.recorder,
        pipeline.ranker,
        Arc::new(NoopIngestor),
        Arc::new(NoopLinkBuilder),
        None,
        pipeline.sink,
        config.scheduler.clone(),
    ));

    if once {
        let report = scheduler.run_once(mode).await;
        tracing::info!(outcome = ?report.outcome, "one-shot cycle finished");
        return Ok(());
    }

    // SIGINT/SIGTERM abort the in-flight cycle and stop the loop
    let stopper = scheduler.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("shutdown signal received, stopping scheduler");
        stopper.stop();
    });

    scheduler
        .run_loop(mode)
        .await
        .context("scheduler loop failed")?;
    Ok(())
}

/// Resolves when SIGINT or SIGTERM arrives
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable, listening for SIGINT only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

async fn check(config: &Config, mode: SelectionMode) -> Result<()> {
    let pipeline = build_pipeline(config)?;

    let working_set = pipeline.selector.select(mode)?;
    let stats = pipeline.recorder.verify_batch(&working_set).await?;

    println!(
        "checked {} mirrors across {} items: {} healthy, {} pruned, {} persistence errors",
        stats.checked,
        working_set.len(),
        stats.healthy,
        stats.pruned,
        stats.persist_errors
    );
    Ok(())
}

fn rank(config: &Config) -> Result<()> {
    let pipeline = build_pipeline(config)?;

    let ranked = pipeline.ranker.rank_all()?;
    println!("recomputed ranks for {ranked} sources");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shutdown_signal_resolves_on_sigterm() {
        let waiter = tokio::spawn(shutdown_signal());
        // Give the spawned task time to install the handler
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        std::process::Command::new("kill")
            .args(["-TERM", &std::process::id().to_string()])
            .status()
            .unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(2), waiter)
            .await
            .expect("SIGTERM did not resolve the shutdown future")
            .unwrap();
    }
}
