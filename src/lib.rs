//! mirrorwatch - Embed Mirror Health Verification and Ranking Engine
//!
//! A streaming catalog serves each title through several interchangeable
//! third-party embed mirrors. Mirrors go offline, get rate-limited, or
//! degrade unpredictably, so this crate continuously verifies which mirrors
//! are reachable, prunes dead ones from the live sets served to users, and
//! ranks every known source by recent reliability and latency.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`models`] - Core data structures and types
//! - [`probe`] - Single-URL reachability checks with strict deadlines
//! - [`selector`] - Delta/full working-set selection per cycle
//! - [`recorder`] - Bounded concurrent probing, observation log, mirror pruning
//! - [`ranker`] - Windowed success-rate/latency scoring and priority tiers
//! - [`scheduler`] - Long-running control loop with per-cycle error containment
//! - [`storage`] - Repository traits and SQLite/in-memory implementations
//! - [`notifications`] - Cycle report delivery to operators
//!
//! # Example
//!
//! ```no_run
//! use mirrorwatch::config::Config;
//! use mirrorwatch::storage::SqliteStore;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     config.validate()?;
//!     let store = SqliteStore::new(&config.database.sqlite_path)?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod models;
pub mod notifications;
pub mod probe;
pub mod ranker;
pub mod recorder;
pub mod scheduler;
pub mod selector;
pub mod storage;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, ErrorCategory, Result};
    pub use crate::models::{ContentItem, ContentType, CycleReport, Observation, SourceRank};
    pub use crate::probe::{HttpProber, Probe, ProbeOutcome};
    pub use crate::ranker::{RankingPolicy, SourceRanker};
    pub use crate::recorder::HealthRecorder;
    pub use crate::scheduler::CycleScheduler;
    pub use crate::selector::{CycleSelector, SelectionMode};
    pub use crate::storage::{MemoryStore, SqliteStore};
}

// Direct re-exports for convenience
pub use models::{ContentItem, ContentType, CycleReport, Observation, SourceRank};
