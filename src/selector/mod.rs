//! Working-set selection for verification cycles
//!
//! Decides which content items need (re-)checking this cycle. Two policies:
//!
//! - **Delta**: items never checked, plus items that produced a failing
//!   observation within the recent lookback window. Cheap, runs every cycle.
//! - **Full**: every item whose `last_checked` is older than the staleness
//!   horizon (or null). Exhaustive, runs on a slower cadence.
//!
//! Both are capped at a fixed batch size per content type to bound cycle
//! cost, and neither modifies any state.

use chrono::{Duration, Utc};

use crate::config::SelectionConfig;
use crate::error::Result;
use crate::models::{ContentItem, ContentType};
use crate::storage::{SharedCatalog, SharedObservationLog};

/// Selection policy for one cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionMode {
    /// New + recently-broken items
    Delta,
    /// Everything stale beyond the horizon
    Full,
}

impl std::fmt::Display for SelectionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SelectionMode::Delta => f.write_str("delta"),
            SelectionMode::Full => f.write_str("full"),
        }
    }
}

/// Pure read producing the working set for a cycle
pub struct CycleSelector {
    catalog: SharedCatalog,
    observations: SharedObservationLog,
    config: SelectionConfig,
}

impl CycleSelector {
    pub fn new(
        catalog: SharedCatalog,
        observations: SharedObservationLog,
        config: SelectionConfig,
    ) -> Self {
        Self {
            catalog,
            observations,
            config,
        }
    }

    /// Select the working set for all content types under one policy
    pub fn select(&self, mode: SelectionMode) -> Result<Vec<ContentItem>> {
        let mut working_set = Vec::new();
        for content_type in ContentType::ALL {
            let selected = self.select_type(mode, *content_type)?;
            tracing::info!(
                mode = %mode,
                content_type = %content_type,
                selected = selected.len(),
                "working set selected"
            );
            working_set.extend(selected);
        }
        Ok(working_set)
    }

    /// Select the working set for one content type under one policy
    pub fn select_type(
        &self,
        mode: SelectionMode,
        content_type: ContentType,
    ) -> Result<Vec<ContentItem>> {
        match mode {
            SelectionMode::Delta => self.select_delta(content_type),
            SelectionMode::Full => self.select_full(content_type),
        }
    }

    /// Never-checked items first, then recently-failing ones, capped
    fn select_delta(&self, content_type: ContentType) -> Result<Vec<ContentItem>> {
        let cap = self.config.batch_size;
        let mut items = self.catalog.never_checked(content_type, cap)?;

        if items.len() < cap {
            let since = Utc::now() - Duration::hours(self.config.failure_lookback_hours);
            let broken_ids = self
                .observations
                .failing_content_ids_since(content_type, since)?;

            // Union without duplicates; never-checked items keep priority.
            let seen: std::collections::HashSet<i64> = items.iter().map(|i| i.id).collect();
            let missing: Vec<i64> = broken_ids
                .into_iter()
                .filter(|id| !seen.contains(id))
                .collect();

            let remaining = cap - items.len();
            items.extend(self.catalog.by_ids(content_type, &missing, remaining)?);
        }

        items.truncate(cap);
        Ok(items)
    }

    /// Everything last checked before the staleness horizon, capped
    fn select_full(&self, content_type: ContentType) -> Result<Vec<ContentItem>> {
        let cutoff = Utc::now() - Duration::days(self.config.staleness_days);
        self.catalog
            .stale_before(content_type, cutoff, self.config.batch_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Observation;
    use crate::storage::{CatalogRepository, MemoryStore, ObservationLog};
    use chrono::DateTime;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn selector_over(store: Arc<MemoryStore>, batch_size: usize) -> CycleSelector {
        CycleSelector::new(
            store.clone(),
            store,
            SelectionConfig {
                batch_size,
                staleness_days: 7,
                failure_lookback_hours: 24,
            },
        )
    }

    fn seed_item(store: &MemoryStore, id: i64, last_checked: Option<DateTime<Utc>>) {
        let mut item = ContentItem::new(
            id,
            ContentType::Movie,
            HashMap::from([("vidsrc".to_string(), format!("https://v.example/{id}"))]),
        );
        item.last_checked = last_checked;
        store.upsert(&item).unwrap();
    }

    fn seed_failure(store: &MemoryStore, content_id: i64, hours_ago: i64) {
        store
            .append(&Observation {
                content_id,
                content_type: ContentType::Movie,
                source_name: "vidsrc".to_string(),
                url: format!("https://v.example/{content_id}"),
                status_code: 404,
                response_time_ms: 0,
                checked_at: Utc::now() - Duration::hours(hours_ago),
                error: None,
            })
            .unwrap();
    }

    #[test]
    fn test_delta_selects_never_checked() {
        let store = Arc::new(MemoryStore::new());
        seed_item(&store, 1, None);
        seed_item(&store, 2, Some(Utc::now()));

        let selector = selector_over(store, 50);
        let selected = selector.select_type(SelectionMode::Delta, ContentType::Movie).unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].id, 1);
    }

    #[test]
    fn test_delta_unions_recently_broken() {
        let store = Arc::new(MemoryStore::new());
        seed_item(&store, 1, None);
        seed_item(&store, 2, Some(Utc::now()));
        seed_item(&store, 3, Some(Utc::now()));
        seed_failure(&store, 2, 1);
        // Failure outside the 24h lookback is ignored
        seed_failure(&store, 3, 48);

        let selector = selector_over(store, 50);
        let selected = selector.select_type(SelectionMode::Delta, ContentType::Movie).unwrap();
        let ids: Vec<i64> = selected.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_delta_does_not_duplicate_broken_unchecked_items() {
        let store = Arc::new(MemoryStore::new());
        seed_item(&store, 1, None);
        seed_failure(&store, 1, 2);

        let selector = selector_over(store, 50);
        let selected = selector.select_type(SelectionMode::Delta, ContentType::Movie).unwrap();
        assert_eq!(selected.len(), 1);
    }

    #[test]
    fn test_cap_enforced_with_excess_eligible() {
        // 120 eligible items, cap 50: exactly 50 selected
        let store = Arc::new(MemoryStore::new());
        for id in 0..120 {
            seed_item(&store, id, None);
        }

        let selector = selector_over(store, 50);
        let selected = selector.select_type(SelectionMode::Delta, ContentType::Movie).unwrap();
        assert_eq!(selected.len(), 50);
    }

    #[test]
    fn test_cap_applies_across_union() {
        let store = Arc::new(MemoryStore::new());
        for id in 0..4 {
            seed_item(&store, id, None);
        }
        for id in 4..10 {
            seed_item(&store, id, Some(Utc::now()));
            seed_failure(&store, id, 1);
        }

        let selector = selector_over(store, 6);
        let selected = selector.select_type(SelectionMode::Delta, ContentType::Movie).unwrap();
        assert_eq!(selected.len(), 6);
        // Never-checked items keep priority over recently-broken ones
        let ids: Vec<i64> = selected.iter().map(|i| i.id).collect();
        assert!(ids.contains(&0) && ids.contains(&3));
    }

    #[test]
    fn test_full_selects_stale_and_null() {
        let store = Arc::new(MemoryStore::new());
        seed_item(&store, 1, Some(Utc::now()));
        seed_item(&store, 2, Some(Utc::now() - Duration::days(30)));
        seed_item(&store, 3, None);

        let selector = selector_over(store, 50);
        let selected = selector.select_type(SelectionMode::Full, ContentType::Movie).unwrap();
        let ids: Vec<i64> = selected.iter().map(|i| i.id).collect();
        assert!(ids.contains(&2));
        assert!(ids.contains(&3));
        assert!(!ids.contains(&1));
    }

    #[test]
    fn test_selection_is_pure_read() {
        let store = Arc::new(MemoryStore::new());
        seed_item(&store, 1, None);

        let selector = selector_over(store.clone(), 50);
        selector.select(SelectionMode::Delta).unwrap();
        selector.select(SelectionMode::Full).unwrap();

        let item = store.get(ContentType::Movie, 1).unwrap().unwrap();
        assert!(item.last_checked.is_none());
        assert_eq!(store.observation_count(), 0);
    }
}
