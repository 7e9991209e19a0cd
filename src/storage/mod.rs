//! Repository layer for the content catalog, observation log, and source registry
//!
//! Trait-based abstractions decouple the verification pipeline from storage,
//! enabling mock-backed tests and swappable backends. The SQLite
//! implementation keeps all three tables in one database file; the in-memory
//! implementation backs unit and integration tests.
//!
//! Persisted layout:
//! - `content`: catalog items with their live embed-link map and `last_checked`
//! - `link_checks`: append-only observation log, one row per probe outcome
//! - `embed_sources`: source registry with the materialized priority tier

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Error, Result};
use crate::models::{ContentItem, ContentType, Observation, SourceRank, SUCCESS_STATUSES};

// ============================================================================
// Repository Traits
// ============================================================================

/// Repository for catalog content and its live mirror sets
///
/// The health recorder is the only component that mutates `embed_links` and
/// `last_checked`; selection methods are pure reads.
pub trait CatalogRepository: Send + Sync {
    /// Items of one type that have never been checked, capped at `limit`
    fn never_checked(&self, content_type: ContentType, limit: usize) -> Result<Vec<ContentItem>>;

    /// Items of one type last checked before `cutoff` (or never), capped at `limit`
    fn stale_before(
        &self,
        content_type: ContentType,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ContentItem>>;

    /// Items of one type matching the given ids, capped at `limit`
    fn by_ids(
        &self,
        content_type: ContentType,
        ids: &[i64],
        limit: usize,
    ) -> Result<Vec<ContentItem>>;

    /// Fetch a single item
    fn get(&self, content_type: ContentType, id: i64) -> Result<Option<ContentItem>>;

    /// Insert or replace a catalog item (used by ingestion collaborators)
    fn upsert(&self, item: &ContentItem) -> Result<()>;

    /// Set `last_checked` without touching the mirror set
    fn touch_last_checked(
        &self,
        content_type: ContentType,
        id: i64,
        at: DateTime<Utc>,
    ) -> Result<()>;

    /// Remove one source from an item's live mirror set and set `last_checked`
    ///
    /// Idempotent: removing an absent source is a no-op and returns `false`.
    fn prune_mirror(
        &self,
        content_type: ContentType,
        id: i64,
        source_name: &str,
        at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Count items of one type
    fn count(&self, content_type: ContentType) -> Result<usize>;
}

/// Append-only observation log
pub trait ObservationLog: Send + Sync {
    /// Append one probe outcome; observations are never updated or deleted
    fn append(&self, observation: &Observation) -> Result<()>;

    /// Distinct content ids of one type with a failing observation since `since`
    fn failing_content_ids_since(
        &self,
        content_type: ContentType,
        since: DateTime<Utc>,
    ) -> Result<Vec<i64>>;

    /// Observations for one source since `since`, newest first, capped at `limit`
    fn for_source_since(
        &self,
        source_name: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Observation>>;
}

/// Registry of known mirror sources and their materialized ranks
pub trait SourceRegistry: Send + Sync {
    /// All registered source names
    fn source_names(&self) -> Result<Vec<String>>;

    /// Register a source if not already present
    fn register_source(&self, name: &str) -> Result<()>;

    /// Current rank for a source, if one has been computed
    fn get_rank(&self, name: &str) -> Result<Option<SourceRank>>;

    /// Overwrite the rank for a source
    fn upsert_rank(&self, rank: &SourceRank) -> Result<()>;
}

/// Thread-safe shared handles
pub type SharedCatalog = Arc<dyn CatalogRepository>;
pub type SharedObservationLog = Arc<dyn ObservationLog>;
pub type SharedSourceRegistry = Arc<dyn SourceRegistry>;

fn failing_placeholder() -> String {
    SUCCESS_STATUSES
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

// ============================================================================
// SQLite Implementation
// ============================================================================

/// SQLite-backed store implementing all three repository traits
///
/// Uses a `Mutex<Connection>` with WAL mode, matching the write pattern of
/// the pipeline: per-(content, mirror) writes are independent and idempotent,
/// so no cross-item locking beyond the connection mutex is needed.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a store at the given path
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_schema()?;

        tracing::info!(path = %path.display(), "SQLite store initialized");
        Ok(store)
    }

    /// Create in-memory store (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_schema()?;
        Ok(store)
    }

    fn create_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
                CREATE TABLE IF NOT EXISTS content (
                    id INTEGER NOT NULL,
                    content_type TEXT NOT NULL,
                    embed_links TEXT NOT NULL DEFAULT '{}',
                    last_checked TEXT,
                    PRIMARY KEY (id, content_type)
                );

                CREATE INDEX IF NOT EXISTS idx_content_last_checked
                    ON content(content_type, last_checked);

                CREATE TABLE IF NOT EXISTS link_checks (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    content_id INTEGER NOT NULL,
                    content_type TEXT NOT NULL,
                    source_name TEXT NOT NULL,
                    url TEXT NOT NULL,
                    status_code INTEGER NOT NULL,
                    response_time_ms INTEGER NOT NULL,
                    checked_at TEXT NOT NULL,
                    error TEXT
                );

                CREATE INDEX IF NOT EXISTS idx_link_checks_source
                    ON link_checks(source_name, checked_at);

                CREATE INDEX IF NOT EXISTS idx_link_checks_content
                    ON link_checks(content_type, checked_at);

                CREATE TABLE IF NOT EXISTS embed_sources (
                    name TEXT PRIMARY KEY,
                    priority INTEGER NOT NULL DEFAULT 5,
                    response_time_ms INTEGER NOT NULL DEFAULT 0,
                    last_checked TEXT
                );
                "#,
        )?;

        Ok(())
    }

    fn row_to_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<(i64, String, String, Option<String>)> {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
    }

    fn build_item(
        id: i64,
        type_str: &str,
        links_json: &str,
        last_checked: Option<String>,
    ) -> Result<ContentItem> {
        let content_type: ContentType = type_str
            .parse()
            .map_err(|e: String| Error::other(format!("corrupt content row {id}: {e}")))?;
        let embed_links: HashMap<String, String> = serde_json::from_str(links_json)?;
        let last_checked = last_checked
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        Ok(ContentItem {
            id,
            content_type,
            embed_links,
            last_checked,
        })
    }

    fn query_items(
        &self,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<ContentItem>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, Self::row_to_item)?;

        let mut items = Vec::new();
        for row in rows {
            let (id, type_str, links_json, last_checked) = row?;
            items.push(Self::build_item(id, &type_str, &links_json, last_checked)?);
        }
        Ok(items)
    }
}

impl CatalogRepository for SqliteStore {
    fn never_checked(&self, content_type: ContentType, limit: usize) -> Result<Vec<ContentItem>> {
        self.query_items(
            "SELECT id, content_type, embed_links, last_checked FROM content
             WHERE content_type = ?1 AND last_checked IS NULL
             ORDER BY id LIMIT ?2",
            &[&content_type.as_str(), &(limit as i64)],
        )
    }

    fn stale_before(
        &self,
        content_type: ContentType,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ContentItem>> {
        self.query_items(
            "SELECT id, content_type, embed_links, last_checked FROM content
             WHERE content_type = ?1 AND (last_checked IS NULL OR last_checked < ?2)
             ORDER BY last_checked IS NOT NULL, last_checked, id LIMIT ?3",
            &[&content_type.as_str(), &cutoff.to_rfc3339(), &(limit as i64)],
        )
    }

    fn by_ids(
        &self,
        content_type: ContentType,
        ids: &[i64],
        limit: usize,
    ) -> Result<Vec<ContentItem>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders: String = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "SELECT id, content_type, embed_links, last_checked FROM content
             WHERE content_type = ? AND id IN ({placeholders})
             ORDER BY id LIMIT ?"
        );

        let type_str = content_type.as_str();
        let limit = limit as i64;
        let mut params: Vec<&dyn rusqlite::ToSql> = vec![&type_str];
        for id in ids {
            params.push(id);
        }
        params.push(&limit);

        self.query_items(&sql, &params)
    }

    fn get(&self, content_type: ContentType, id: i64) -> Result<Option<ContentItem>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT id, content_type, embed_links, last_checked FROM content
                 WHERE content_type = ?1 AND id = ?2",
                params![content_type.as_str(), id],
                Self::row_to_item,
            )
            .optional()?;

        match row {
            Some((id, type_str, links_json, last_checked)) => Ok(Some(Self::build_item(
                id,
                &type_str,
                &links_json,
                last_checked,
            )?)),
            None => Ok(None),
        }
    }

    fn upsert(&self, item: &ContentItem) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let links_json = serde_json::to_string(&item.embed_links)?;
        conn.execute(
            "INSERT OR REPLACE INTO content (id, content_type, embed_links, last_checked)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                item.id,
                item.content_type.as_str(),
                links_json,
                item.last_checked.map(|dt| dt.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    fn touch_last_checked(
        &self,
        content_type: ContentType,
        id: i64,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE content SET last_checked = ?1 WHERE content_type = ?2 AND id = ?3",
            params![at.to_rfc3339(), content_type.as_str(), id],
        )?;
        Ok(())
    }

    fn prune_mirror(
        &self,
        content_type: ContentType,
        id: i64,
        source_name: &str,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        // Read-modify-write under the connection mutex keeps the removal
        // atomic with respect to other prunes of the same row.
        let conn = self.conn.lock().unwrap();
        let links_json: Option<String> = conn
            .query_row(
                "SELECT embed_links FROM content WHERE content_type = ?1 AND id = ?2",
                params![content_type.as_str(), id],
                |row| row.get(0),
            )
            .optional()?;

        let Some(links_json) = links_json else {
            return Ok(false);
        };

        let mut links: HashMap<String, String> = serde_json::from_str(&links_json)?;
        let removed = links.remove(source_name).is_some();

        conn.execute(
            "UPDATE content SET embed_links = ?1, last_checked = ?2
             WHERE content_type = ?3 AND id = ?4",
            params![
                serde_json::to_string(&links)?,
                at.to_rfc3339(),
                content_type.as_str(),
                id
            ],
        )?;

        Ok(removed)
    }

    fn count(&self, content_type: ContentType) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM content WHERE content_type = ?1",
            params![content_type.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

impl ObservationLog for SqliteStore {
    fn append(&self, observation: &Observation) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO link_checks
                (content_id, content_type, source_name, url, status_code,
                 response_time_ms, checked_at, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                observation.content_id,
                observation.content_type.as_str(),
                observation.source_name,
                observation.url,
                observation.status_code,
                observation.response_time_ms as i64,
                observation.checked_at.to_rfc3339(),
                observation.error,
            ],
        )?;
        Ok(())
    }

    fn failing_content_ids_since(
        &self,
        content_type: ContentType,
        since: DateTime<Utc>,
    ) -> Result<Vec<i64>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT DISTINCT content_id FROM link_checks
             WHERE content_type = ?1 AND checked_at >= ?2
               AND status_code NOT IN ({})
             ORDER BY content_id",
            failing_placeholder()
        );
        let mut stmt = conn.prepare(&sql)?;
        let ids = stmt
            .query_map(params![content_type.as_str(), since.to_rfc3339()], |row| {
                row.get::<_, i64>(0)
            })?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(ids)
    }

    fn for_source_since(
        &self,
        source_name: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Observation>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT content_id, content_type, source_name, url, status_code,
                    response_time_ms, checked_at, error
             FROM link_checks
             WHERE source_name = ?1 AND checked_at >= ?2
             ORDER BY checked_at DESC LIMIT ?3",
        )?;

        let rows = stmt.query_map(
            params![source_name, since.to_rfc3339(), limit as i64],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, u16>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, Option<String>>(7)?,
                ))
            },
        )?;

        let mut observations = Vec::new();
        for row in rows {
            let (content_id, type_str, source_name, url, status_code, rt_ms, checked_at, error) =
                row?;
            let content_type: ContentType = type_str
                .parse()
                .map_err(|e: String| Error::other(format!("corrupt observation row: {e}")))?;
            let checked_at = DateTime::parse_from_rfc3339(&checked_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now());

            observations.push(Observation {
                content_id,
                content_type,
                source_name,
                url,
                status_code,
                response_time_ms: rt_ms.max(0) as u64,
                checked_at,
                error,
            });
        }
        Ok(observations)
    }
}

impl SourceRegistry for SqliteStore {
    fn source_names(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT name FROM embed_sources ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }

    fn register_source(&self, name: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO embed_sources (name) VALUES (?1)",
            params![name],
        )?;
        Ok(())
    }

    fn get_rank(&self, name: &str) -> Result<Option<SourceRank>> {
        let conn = self.conn.lock().unwrap();
        let rank = conn
            .query_row(
                "SELECT name, priority, response_time_ms, last_checked
                 FROM embed_sources WHERE name = ?1 AND last_checked IS NOT NULL",
                params![name],
                |row| {
                    Ok(SourceRank {
                        name: row.get(0)?,
                        priority: row.get::<_, i64>(1)? as u8,
                        avg_response_time_ms: row.get::<_, i64>(2)?.max(0) as u64,
                        last_checked: DateTime::parse_from_rfc3339(&row.get::<_, String>(3)?)
                            .map(|dt| dt.with_timezone(&Utc))
                            .unwrap_or_else(|_| Utc::now()),
                    })
                },
            )
            .optional()?;
        Ok(rank)
    }

    fn upsert_rank(&self, rank: &SourceRank) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO embed_sources (name, priority, response_time_ms, last_checked)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(name) DO UPDATE SET
                 priority = excluded.priority,
                 response_time_ms = excluded.response_time_ms,
                 last_checked = excluded.last_checked",
            params![
                rank.name,
                rank.priority as i64,
                rank.avg_response_time_ms as i64,
                rank.last_checked.to_rfc3339(),
            ],
        )?;
        Ok(())
    }
}

// ============================================================================
// In-Memory Implementation (for testing)
// ============================================================================

/// In-memory store implementing all three repository traits
///
/// Useful for testing the pipeline without a database file.
#[derive(Default)]
pub struct MemoryStore {
    items: RwLock<HashMap<(ContentType, i64), ContentItem>>,
    observations: RwLock<Vec<Observation>>,
    sources: RwLock<HashMap<String, Option<SourceRank>>>,
}

impl MemoryStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of recorded observations
    pub fn observation_count(&self) -> usize {
        self.observations.read().unwrap().len()
    }

    /// Snapshot of all observations, in append order
    pub fn observations(&self) -> Vec<Observation> {
        self.observations.read().unwrap().clone()
    }
}

impl CatalogRepository for MemoryStore {
    fn never_checked(&self, content_type: ContentType, limit: usize) -> Result<Vec<ContentItem>> {
        let items = self.items.read().unwrap();
        let mut selected: Vec<ContentItem> = items
            .values()
            .filter(|i| i.content_type == content_type && i.last_checked.is_none())
            .cloned()
            .collect();
        selected.sort_by_key(|i| i.id);
        selected.truncate(limit);
        Ok(selected)
    }

    fn stale_before(
        &self,
        content_type: ContentType,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ContentItem>> {
        let items = self.items.read().unwrap();
        let mut selected: Vec<ContentItem> = items
            .values()
            .filter(|i| {
                i.content_type == content_type
                    && i.last_checked.map(|at| at < cutoff).unwrap_or(true)
            })
            .cloned()
            .collect();
        selected.sort_by_key(|i| (i.last_checked, i.id));
        selected.truncate(limit);
        Ok(selected)
    }

    fn by_ids(
        &self,
        content_type: ContentType,
        ids: &[i64],
        limit: usize,
    ) -> Result<Vec<ContentItem>> {
        let items = self.items.read().unwrap();
        let mut selected: Vec<ContentItem> = ids
            .iter()
            .filter_map(|id| items.get(&(content_type, *id)).cloned())
            .collect();
        selected.sort_by_key(|i| i.id);
        selected.truncate(limit);
        Ok(selected)
    }

    fn get(&self, content_type: ContentType, id: i64) -> Result<Option<ContentItem>> {
        Ok(self.items.read().unwrap().get(&(content_type, id)).cloned())
    }

    fn upsert(&self, item: &ContentItem) -> Result<()> {
        self.items
            .write()
            .unwrap()
            .insert((item.content_type, item.id), item.clone());
        Ok(())
    }

    fn touch_last_checked(
        &self,
        content_type: ContentType,
        id: i64,
        at: DateTime<Utc>,
    ) -> Result<()> {
        if let Some(item) = self.items.write().unwrap().get_mut(&(content_type, id)) {
            item.last_checked = Some(at);
        }
        Ok(())
    }

    fn prune_mirror(
        &self,
        content_type: ContentType,
        id: i64,
        source_name: &str,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut items = self.items.write().unwrap();
        match items.get_mut(&(content_type, id)) {
            Some(item) => {
                let removed = item.embed_links.remove(source_name).is_some();
                item.last_checked = Some(at);
                Ok(removed)
            }
            None => Ok(false),
        }
    }

    fn count(&self, content_type: ContentType) -> Result<usize> {
        Ok(self
            .items
            .read()
            .unwrap()
            .values()
            .filter(|i| i.content_type == content_type)
            .count())
    }
}

impl ObservationLog for MemoryStore {
    fn append(&self, observation: &Observation) -> Result<()> {
        self.observations.write().unwrap().push(observation.clone());
        Ok(())
    }

    fn failing_content_ids_since(
        &self,
        content_type: ContentType,
        since: DateTime<Utc>,
    ) -> Result<Vec<i64>> {
        let observations = self.observations.read().unwrap();
        let mut ids: Vec<i64> = observations
            .iter()
            .filter(|o| {
                o.content_type == content_type && o.checked_at >= since && !o.is_success()
            })
            .map(|o| o.content_id)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }

    fn for_source_since(
        &self,
        source_name: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Observation>> {
        let observations = self.observations.read().unwrap();
        let mut selected: Vec<Observation> = observations
            .iter()
            .filter(|o| o.source_name == source_name && o.checked_at >= since)
            .cloned()
            .collect();
        selected.sort_by(|a, b| b.checked_at.cmp(&a.checked_at));
        selected.truncate(limit);
        Ok(selected)
    }
}

impl SourceRegistry for MemoryStore {
    fn source_names(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.sources.read().unwrap().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn register_source(&self, name: &str) -> Result<()> {
        self.sources
            .write()
            .unwrap()
            .entry(name.to_string())
            .or_insert(None);
        Ok(())
    }

    fn get_rank(&self, name: &str) -> Result<Option<SourceRank>> {
        Ok(self
            .sources
            .read()
            .unwrap()
            .get(name)
            .and_then(|r| r.clone()))
    }

    fn upsert_rank(&self, rank: &SourceRank) -> Result<()> {
        self.sources
            .write()
            .unwrap()
            .insert(rank.name.clone(), Some(rank.clone()));
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
