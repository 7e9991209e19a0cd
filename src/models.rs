//! Core data structures for mirror health tracking
//!
//! This module defines the domain types shared across the crate:
//!
//! - [`ContentItem`] - a catalog entry (movie or series) and its live mirror set
//! - [`Observation`] - one immutable probe outcome, append-only
//! - [`SourceRank`] - materialized priority tier per mirror source
//! - [`CycleReport`] - before/after summary handed to the notification sink

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// HTTP statuses treated as a reachable mirror.
///
/// Redirects count as healthy: embed hosts routinely bounce players between
/// regional frontends.
pub const SUCCESS_STATUSES: &[u16] = &[200, 301, 302];

/// Content categories tracked in the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    /// Feature film
    Movie,
    /// TV series episode
    #[serde(rename = "tv")]
    Series,
}

impl ContentType {
    /// All content types, in selection order
    pub const ALL: &'static [ContentType] = &[ContentType::Movie, ContentType::Series];

    /// Storage column value for this type
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Movie => "movie",
            ContentType::Series => "tv",
        }
    }
}

impl std::str::FromStr for ContentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "movie" => Ok(ContentType::Movie),
            "tv" | "series" => Ok(ContentType::Series),
            other => Err(format!("unknown content type: {other}")),
        }
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A catalog entry and the set of mirrors currently served for it
///
/// `embed_links` maps source name to embed URL and is owned by the catalog;
/// the health recorder is the only writer of the map and of `last_checked`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentItem {
    /// Catalog identifier
    pub id: i64,

    /// Movie or series
    pub content_type: ContentType,

    /// Live mirror set: source name -> embed URL
    pub embed_links: HashMap<String, String>,

    /// When any mirror of this item was last probed; `None` until first check
    pub last_checked: Option<DateTime<Utc>>,
}

impl ContentItem {
    /// Create an item that has never been checked
    pub fn new(id: i64, content_type: ContentType, embed_links: HashMap<String, String>) -> Self {
        Self {
            id,
            content_type,
            embed_links,
            last_checked: None,
        }
    }

    /// Number of mirrors currently served for this item
    pub fn mirror_count(&self) -> usize {
        self.embed_links.len()
    }
}

/// One immutable probe outcome
///
/// Observations are append-only: written once per probe completion and never
/// updated or deleted, so source ranks can always be recomputed
/// deterministically from the log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub content_id: i64,
    pub content_type: ContentType,
    pub source_name: String,
    pub url: String,
    /// HTTP status, or 0 for timeout/connection/DNS failure
    pub status_code: u16,
    pub response_time_ms: u64,
    pub checked_at: DateTime<Utc>,
    /// Failure description when `status_code` is 0
    pub error: Option<String>,
}

impl Observation {
    /// Whether this outcome counts as a reachable mirror
    pub fn is_success(&self) -> bool {
        SUCCESS_STATUSES.contains(&self.status_code)
    }
}

/// Materialized rank of one mirror source
///
/// Derived entirely from the observation log and overwritten on every
/// ranking pass; never patched incrementally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRank {
    /// Source name (registry primary key)
    pub name: String,

    /// Priority tier, 1 (best) to 5 (worst)
    pub priority: u8,

    /// Mean response time over successful observations in the window
    pub avg_response_time_ms: u64,

    /// When this rank was last recomputed
    pub last_checked: DateTime<Utc>,
}

/// Catalog counts per content type, snapshotted around a cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogCounts {
    pub movies: usize,
    pub series: usize,
}

impl CatalogCounts {
    /// Per-type growth between two snapshots, clamped at zero
    pub fn delta_from(&self, before: &CatalogCounts) -> CatalogCounts {
        CatalogCounts {
            movies: self.movies.saturating_sub(before.movies),
            series: self.series.saturating_sub(before.series),
        }
    }
}

/// Outcome of one scheduler cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleOutcome {
    Success,
    Failed,
}

/// Before/after summary of one cycle, handed to the notification sink
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleReport {
    /// Unique id of this cycle run
    pub cycle_id: Uuid,
    pub outcome: CycleOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub counts_before: CatalogCounts,
    pub counts_after: CatalogCounts,
    /// Mirrors probed this cycle
    pub links_checked: usize,
    /// Mirrors removed from live sets this cycle
    pub links_pruned: usize,
    /// Sources whose rank was recomputed
    pub sources_ranked: usize,
    /// Error chain when `outcome` is `Failed`
    pub error: Option<String>,
}

impl CycleReport {
    /// New-content summary for operator reports
    pub fn new_items(&self) -> CatalogCounts {
        self.counts_after.delta_from(&self.counts_before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_roundtrip() {
        assert_eq!(ContentType::Movie.as_str(), "movie");
        assert_eq!(ContentType::Series.as_str(), "tv");
        assert_eq!("movie".parse::<ContentType>().unwrap(), ContentType::Movie);
        assert_eq!("tv".parse::<ContentType>().unwrap(), ContentType::Series);
        assert!("podcast".parse::<ContentType>().is_err());
    }

    #[test]
    fn test_observation_success_classification() {
        let mut obs = Observation {
            content_id: 1,
            content_type: ContentType::Movie,
            source_name: "vidsrc".to_string(),
            url: "https://vidsrc.example/embed/1".to_string(),
            status_code: 200,
            response_time_ms: 120,
            checked_at: Utc::now(),
            error: None,
        };
        assert!(obs.is_success());

        obs.status_code = 301;
        assert!(obs.is_success());
        obs.status_code = 302;
        assert!(obs.is_success());

        obs.status_code = 404;
        assert!(!obs.is_success());
        obs.status_code = 0;
        assert!(!obs.is_success());
    }

    #[test]
    fn test_catalog_counts_delta_clamps() {
        let before = CatalogCounts {
            movies: 100,
            series: 50,
        };
        let after = CatalogCounts {
            movies: 105,
            series: 48,
        };
        let delta = after.delta_from(&before);
        assert_eq!(delta.movies, 5);
        assert_eq!(delta.series, 0);
    }

    #[test]
    fn test_content_item_mirror_count() {
        let mut links = HashMap::new();
        links.insert("vidsrc".to_string(), "u1".to_string());
        links.insert("autoembed".to_string(), "u2".to_string());

        let item = ContentItem::new(42, ContentType::Movie, links);
        assert_eq!(item.mirror_count(), 2);
        assert!(item.last_checked.is_none());
    }
}
