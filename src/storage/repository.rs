//! Candidate store
//!
//! Trait-based repository so the recruitment engine can run against SQLite
//! in production and an in-memory map in tests.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Recruitment engine                        │
//! │        (ingestion, replenishment, send loop, stream)        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   NationRepository                          │
//! └─────────────────────────────────────────────────────────────┘
//!                 ┌────────────┴────────────┐
//!                 ▼                         ▼
//!        ┌─────────────────┐       ┌─────────────────┐
//!        │     SQLite      │       │     Memory      │
//!        └─────────────────┘       └─────────────────┘
//! ```
//!
//! Status changes of existing rows go through [`NationRepository::transition`],
//! which only applies when the stored status equals the expected one. Two
//! loops racing for the same `pending` row cannot both win.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use crate::models::{Nation, NationStatus};
use crate::utils::to_id;

// ============================================================================
// Core Types
// ============================================================================

/// Row counts per status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub pending: usize,
    pub reserved_api: usize,
    pub reserved_manual: usize,
    pub send: usize,
    pub skipped: usize,
    pub failed: usize,
    pub member: usize,
}

impl StoreStats {
    pub fn total(&self) -> usize {
        self.pending
            + self.reserved_api
            + self.reserved_manual
            + self.send
            + self.skipped
            + self.failed
            + self.member
    }

    pub fn get(&self, status: NationStatus) -> usize {
        match status {
            NationStatus::Pending => self.pending,
            NationStatus::ReservedApi => self.reserved_api,
            NationStatus::ReservedManual => self.reserved_manual,
            NationStatus::Send => self.send,
            NationStatus::Skipped => self.skipped,
            NationStatus::Failed => self.failed,
            NationStatus::Member => self.member,
        }
    }

    fn add(&mut self, status: NationStatus, count: usize) {
        let slot = match status {
            NationStatus::Pending => &mut self.pending,
            NationStatus::ReservedApi => &mut self.reserved_api,
            NationStatus::ReservedManual => &mut self.reserved_manual,
            NationStatus::Send => &mut self.send,
            NationStatus::Skipped => &mut self.skipped,
            NationStatus::Failed => &mut self.failed,
            NationStatus::Member => &mut self.member,
        };
        *slot += count;
    }
}

/// Result of syncing a region's member list
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemberSync {
    pub joined: usize,
    pub left: usize,
}

/// Timestamps are stored with a fixed width so string order is time order
fn format_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Invalid status_time in store: {value}"))
}

// ============================================================================
// Repository Trait
// ============================================================================

/// Persistent candidate table
pub trait NationRepository: Send + Sync {
    /// Move `name` to `new_status` if it is currently `expected`
    ///
    /// Returns `false` (and changes nothing) when the row is missing or
    /// holds another status. The status time is reset to now and the
    /// qualifier replaced.
    fn transition(
        &self,
        name: &str,
        new_status: NationStatus,
        expected: NationStatus,
        qualifier: Option<&str>,
    ) -> Result<bool>;

    /// Rows with `status`, most recently updated first, ties by name
    fn list_by_status(&self, status: NationStatus, qualifier: Option<&str>)
        -> Result<Vec<Nation>>;

    fn count_by_status(&self, status: NationStatus) -> Result<usize>;

    /// Insert each name not yet known under any status as `pending`
    ///
    /// Known names are left untouched, so terminal candidates are never
    /// re-queued. Returns the number of inserted rows.
    fn add_unknown_as_pending(&self, names: &[String]) -> Result<usize>;

    fn get(&self, name: &str) -> Result<Option<Nation>>;

    /// Insert `nation` unless the name exists; returns whether it was inserted
    fn insert(&self, nation: &Nation) -> Result<bool>;

    /// Newest `pending` row
    fn next_pending(&self) -> Result<Option<Nation>> {
        Ok(self
            .list_by_status(NationStatus::Pending, None)?
            .into_iter()
            .next())
    }

    /// Move `reserved_api` rows set before `older_than` back to `pending`
    fn requeue_stale_reserved(&self, older_than: DateTime<Utc>) -> Result<usize>;

    /// Move `skipped` rows back to `pending`; all of them when `names` is empty
    fn requeue_skipped(&self, names: &[String]) -> Result<usize>;

    /// Make the `member` rows qualified with `region` match `members`
    ///
    /// Unknown members are inserted, `member` rows no longer listed are
    /// removed. Rows in any other status are not touched.
    fn sync_region_members(&self, region: &str, members: &[String]) -> Result<MemberSync>;

    /// Newest status time among rows with `status`
    fn last_status_time(&self, status: NationStatus) -> Result<Option<DateTime<Utc>>>;

    fn stats(&self) -> Result<StoreStats>;
}

// ============================================================================
// SQLite Implementation
// ============================================================================

/// SQLite implementation of NationRepository
///
/// Uses `Mutex` to ensure thread-safety for the SQLite connection.
pub struct SqliteNationRepository {
    conn: Mutex<Connection>,
}

impl SqliteNationRepository {
    /// Open (or create) the database at `path`
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let repo = Self {
            conn: Mutex::new(conn),
        };
        repo.create_schema()?;

        tracing::info!(path = %path.display(), "SQLite candidate store initialized");
        Ok(repo)
    }

    /// Create in-memory repository (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to create in-memory SQLite")?;
        let repo = Self {
            conn: Mutex::new(conn),
        };
        repo.create_schema()?;
        Ok(repo)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("SQLite connection mutex poisoned"))
    }

    fn create_schema(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
                CREATE TABLE IF NOT EXISTS nations (
                    name TEXT PRIMARY KEY,
                    status TEXT NOT NULL,
                    status_time TEXT NOT NULL,
                    status_qualifier TEXT
                );

                CREATE INDEX IF NOT EXISTS idx_nations_status_time
                    ON nations(status, status_time);
                "#,
        )
        .context("Failed to create SQLite schema")?;

        Ok(())
    }

    fn row_to_nation(row: &Row<'_>) -> rusqlite::Result<(String, String, String, Option<String>)> {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
    }

    fn into_nation(raw: (String, String, String, Option<String>)) -> Result<Nation> {
        let (name, status, status_time, qualifier) = raw;
        Ok(Nation {
            name,
            status: status.parse()?,
            status_time: parse_time(&status_time)?,
            qualifier,
        })
    }
}

impl NationRepository for SqliteNationRepository {
    fn transition(
        &self,
        name: &str,
        new_status: NationStatus,
        expected: NationStatus,
        qualifier: Option<&str>,
    ) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE nations SET status = ?1, status_time = ?2, status_qualifier = ?3
                 WHERE name = ?4 AND status = ?5",
                params![
                    new_status.as_str(),
                    format_time(Utc::now()),
                    qualifier,
                    to_id(name),
                    expected.as_str()
                ],
            )
            .context("Failed to transition nation status")?;

        Ok(changed == 1)
    }

    fn list_by_status(
        &self,
        status: NationStatus,
        qualifier: Option<&str>,
    ) -> Result<Vec<Nation>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT name, status, status_time, status_qualifier FROM nations
                 WHERE status = ?1 AND (?2 IS NULL OR status_qualifier = ?2)
                 ORDER BY status_time DESC, name ASC",
            )
            .context("Failed to prepare status query")?;

        let rows = stmt
            .query_map(params![status.as_str(), qualifier], Self::row_to_nation)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter().map(Self::into_nation).collect()
    }

    fn count_by_status(&self, status: NationStatus) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM nations WHERE status = ?1",
                params![status.as_str()],
                |row| row.get(0),
            )
            .context("Failed to count nations")?;

        Ok(count as usize)
    }

    fn add_unknown_as_pending(&self, names: &[String]) -> Result<usize> {
        if names.is_empty() {
            return Ok(0);
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let now = format_time(Utc::now());
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO nations (name, status, status_time, status_qualifier)
                 VALUES (?1, ?2, ?3, NULL)",
            )?;
            for name in names {
                let id = to_id(name);
                if id.is_empty() {
                    continue;
                }
                inserted += stmt.execute(params![id, NationStatus::Pending.as_str(), now])?;
            }
        }
        tx.commit().context("Failed to insert pending nations")?;

        Ok(inserted)
    }

    fn get(&self, name: &str) -> Result<Option<Nation>> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                "SELECT name, status, status_time, status_qualifier FROM nations WHERE name = ?1",
                params![to_id(name)],
                Self::row_to_nation,
            )
            .optional()
            .context("Failed to get nation")?;

        raw.map(Self::into_nation).transpose()
    }

    fn insert(&self, nation: &Nation) -> Result<bool> {
        let conn = self.lock()?;
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO nations (name, status, status_time, status_qualifier)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    to_id(&nation.name),
                    nation.status.as_str(),
                    format_time(nation.status_time),
                    nation.qualifier
                ],
            )
            .context("Failed to insert nation")?;

        Ok(inserted == 1)
    }

    fn requeue_stale_reserved(&self, older_than: DateTime<Utc>) -> Result<usize> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE nations SET status = ?1, status_time = ?2, status_qualifier = NULL
                 WHERE status = ?3 AND status_time < ?4",
                params![
                    NationStatus::Pending.as_str(),
                    format_time(Utc::now()),
                    NationStatus::ReservedApi.as_str(),
                    format_time(older_than)
                ],
            )
            .context("Failed to requeue stale reservations")?;

        Ok(changed)
    }

    fn requeue_skipped(&self, names: &[String]) -> Result<usize> {
        let mut conn = self.lock()?;
        let now = format_time(Utc::now());

        if names.is_empty() {
            let changed = conn.execute(
                "UPDATE nations SET status = ?1, status_time = ?2 WHERE status = ?3",
                params![
                    NationStatus::Pending.as_str(),
                    now,
                    NationStatus::Skipped.as_str()
                ],
            )?;
            return Ok(changed);
        }

        let tx = conn.transaction()?;
        let mut changed = 0;
        {
            let mut stmt = tx.prepare(
                "UPDATE nations SET status = ?1, status_time = ?2 WHERE name = ?3 AND status = ?4",
            )?;
            for name in names {
                changed += stmt.execute(params![
                    NationStatus::Pending.as_str(),
                    now,
                    to_id(name),
                    NationStatus::Skipped.as_str()
                ])?;
            }
        }
        tx.commit().context("Failed to requeue skipped nations")?;

        Ok(changed)
    }

    fn sync_region_members(&self, region: &str, members: &[String]) -> Result<MemberSync> {
        let region = to_id(region);
        let listed: HashSet<String> = members.iter().map(|m| to_id(m)).collect();

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let now = format_time(Utc::now());

        let current: Vec<String> = {
            let mut stmt = tx.prepare(
                "SELECT name FROM nations WHERE status = ?1 AND status_qualifier = ?2",
            )?;
            let rows = stmt.query_map(
                params![NationStatus::Member.as_str(), region],
                |row| row.get(0),
            )?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        let mut sync = MemberSync::default();
        {
            let mut delete = tx.prepare("DELETE FROM nations WHERE name = ?1 AND status = ?2")?;
            for name in current.iter().filter(|n| !listed.contains(*n)) {
                sync.left += delete.execute(params![name, NationStatus::Member.as_str()])?;
            }

            let mut insert = tx.prepare(
                "INSERT OR IGNORE INTO nations (name, status, status_time, status_qualifier)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for name in &listed {
                sync.joined +=
                    insert.execute(params![name, NationStatus::Member.as_str(), now, region])?;
            }
        }
        tx.commit().context("Failed to sync region members")?;

        Ok(sync)
    }

    fn last_status_time(&self, status: NationStatus) -> Result<Option<DateTime<Utc>>> {
        let conn = self.lock()?;
        let value: Option<String> = conn
            .query_row(
                "SELECT MAX(status_time) FROM nations WHERE status = ?1",
                params![status.as_str()],
                |row| row.get(0),
            )
            .context("Failed to read last status time")?;

        value.as_deref().map(parse_time).transpose()
    }

    fn stats(&self) -> Result<StoreStats> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM nations GROUP BY status")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut stats = StoreStats::default();
        for (status, count) in rows {
            match status.parse::<NationStatus>() {
                Ok(status) => stats.add(status, count as usize),
                Err(e) => tracing::warn!(error = %e, "Ignoring unknown status in store"),
            }
        }

        Ok(stats)
    }
}

// ============================================================================
// Memory Implementation (for testing)
// ============================================================================

/// In-memory implementation of NationRepository
///
/// Useful for testing without database dependencies.
pub struct MemoryNationRepository {
    nations: RwLock<HashMap<String, Nation>>,
}

impl MemoryNationRepository {
    pub fn new() -> Self {
        Self {
            nations: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, Nation>>> {
        self.nations
            .read()
            .map_err(|_| anyhow!("memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, Nation>>> {
        self.nations
            .write()
            .map_err(|_| anyhow!("memory store lock poisoned"))
    }

    pub fn len(&self) -> usize {
        self.read().map(|n| n.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryNationRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl NationRepository for MemoryNationRepository {
    fn transition(
        &self,
        name: &str,
        new_status: NationStatus,
        expected: NationStatus,
        qualifier: Option<&str>,
    ) -> Result<bool> {
        let mut nations = self.write()?;
        match nations.get_mut(&to_id(name)) {
            Some(nation) if nation.status == expected => {
                nation.status = new_status;
                nation.status_time = Utc::now();
                nation.qualifier = qualifier.map(String::from);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn list_by_status(
        &self,
        status: NationStatus,
        qualifier: Option<&str>,
    ) -> Result<Vec<Nation>> {
        let nations = self.read()?;
        let mut matching: Vec<Nation> = nations
            .values()
            .filter(|n| n.status == status)
            .filter(|n| qualifier.map_or(true, |q| n.qualifier.as_deref() == Some(q)))
            .cloned()
            .collect();

        matching.sort_by(|a, b| {
            b.status_time
                .cmp(&a.status_time)
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(matching)
    }

    fn count_by_status(&self, status: NationStatus) -> Result<usize> {
        Ok(self.read()?.values().filter(|n| n.status == status).count())
    }

    fn add_unknown_as_pending(&self, names: &[String]) -> Result<usize> {
        let mut nations = self.write()?;
        let mut inserted = 0;
        for name in names {
            let id = to_id(name);
            if id.is_empty() || nations.contains_key(&id) {
                continue;
            }
            nations.insert(id.clone(), Nation::new(&id, NationStatus::Pending));
            inserted += 1;
        }
        Ok(inserted)
    }

    fn get(&self, name: &str) -> Result<Option<Nation>> {
        Ok(self.read()?.get(&to_id(name)).cloned())
    }

    fn insert(&self, nation: &Nation) -> Result<bool> {
        let mut nations = self.write()?;
        let id = to_id(&nation.name);
        if nations.contains_key(&id) {
            return Ok(false);
        }
        let mut row = nation.clone();
        row.name = id.clone();
        nations.insert(id, row);
        Ok(true)
    }

    fn requeue_stale_reserved(&self, older_than: DateTime<Utc>) -> Result<usize> {
        let mut nations = self.write()?;
        let now = Utc::now();
        let mut changed = 0;
        for nation in nations.values_mut() {
            if nation.status == NationStatus::ReservedApi && nation.status_time < older_than {
                nation.status = NationStatus::Pending;
                nation.status_time = now;
                nation.qualifier = None;
                changed += 1;
            }
        }
        Ok(changed)
    }

    fn requeue_skipped(&self, names: &[String]) -> Result<usize> {
        let wanted: HashSet<String> = names.iter().map(|n| to_id(n)).collect();
        let mut nations = self.write()?;
        let now = Utc::now();
        let mut changed = 0;
        for nation in nations.values_mut() {
            if nation.status == NationStatus::Skipped
                && (wanted.is_empty() || wanted.contains(&nation.name))
            {
                nation.status = NationStatus::Pending;
                nation.status_time = now;
                changed += 1;
            }
        }
        Ok(changed)
    }

    fn sync_region_members(&self, region: &str, members: &[String]) -> Result<MemberSync> {
        let region = to_id(region);
        let listed: HashSet<String> = members.iter().map(|m| to_id(m)).collect();
        let mut nations = self.write()?;
        let mut sync = MemberSync::default();

        nations.retain(|name, nation| {
            let leaving = nation.status == NationStatus::Member
                && nation.qualifier.as_deref() == Some(region.as_str())
                && !listed.contains(name);
            if leaving {
                sync.left += 1;
            }
            !leaving
        });

        for name in listed {
            if !nations.contains_key(&name) {
                let member = Nation::new(&name, NationStatus::Member).with_qualifier(region.clone());
                nations.insert(name, member);
                sync.joined += 1;
            }
        }

        Ok(sync)
    }

    fn last_status_time(&self, status: NationStatus) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .read()?
            .values()
            .filter(|n| n.status == status)
            .map(|n| n.status_time)
            .max())
    }

    fn stats(&self) -> Result<StoreStats> {
        let mut stats = StoreStats::default();
        for nation in self.read()?.values() {
            stats.add(nation.status, 1);
        }
        Ok(stats)
    }
}

// ============================================================================
// Shared Repository Types
// ============================================================================

/// Thread-safe shared repository wrapper
pub type SharedNationRepository = Arc<dyn NationRepository>;

/// Create a shared SQLite repository
pub fn create_sqlite_repository(path: impl AsRef<Path>) -> Result<SharedNationRepository> {
    Ok(Arc::new(SqliteNationRepository::new(path)?))
}

/// Create a shared in-memory repository
pub fn create_memory_repository() -> SharedNationRepository {
    Arc::new(MemoryNationRepository::new())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn create_test_repos() -> Vec<Box<dyn NationRepository>> {
        vec![
            Box::new(SqliteNationRepository::in_memory().unwrap()),
            Box::new(MemoryNationRepository::new()),
        ]
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_transition_requires_expected_status() {
        for repo in create_test_repos() {
            repo.add_unknown_as_pending(&names(&["testlandia"])).unwrap();

            // Wrong expectation is a no-op
            assert!(!repo
                .transition("testlandia", NationStatus::Send, NationStatus::ReservedApi, None)
                .unwrap());
            assert_eq!(repo.get("testlandia").unwrap().unwrap().status, NationStatus::Pending);

            assert!(repo
                .transition("testlandia", NationStatus::ReservedApi, NationStatus::Pending, None)
                .unwrap());
            // Second claim of the same row loses
            assert!(!repo
                .transition("testlandia", NationStatus::ReservedApi, NationStatus::Pending, None)
                .unwrap());
            assert_eq!(
                repo.get("testlandia").unwrap().unwrap().status,
                NationStatus::ReservedApi
            );
        }
    }

    #[test]
    fn test_transition_missing_row() {
        for repo in create_test_repos() {
            assert!(!repo
                .transition("ghost", NationStatus::Send, NationStatus::Pending, None)
                .unwrap());
            assert!(repo.get("ghost").unwrap().is_none());
        }
    }

    #[test]
    fn test_add_unknown_is_idempotent() {
        for repo in create_test_repos() {
            assert_eq!(repo.add_unknown_as_pending(&names(&["a_land", "b_land"])).unwrap(), 2);
            assert_eq!(repo.add_unknown_as_pending(&names(&["a_land", "b_land"])).unwrap(), 0);
            // Surface spelling differences collapse to one row
            assert_eq!(repo.add_unknown_as_pending(&names(&["A Land"])).unwrap(), 0);
            assert_eq!(repo.count_by_status(NationStatus::Pending).unwrap(), 2);
        }
    }

    #[test]
    fn test_add_unknown_never_requeues_known() {
        for repo in create_test_repos() {
            let existing = [
                ("sent_land", NationStatus::Send),
                ("skipped_land", NationStatus::Skipped),
                ("failed_land", NationStatus::Failed),
                ("manual_land", NationStatus::ReservedManual),
                ("api_land", NationStatus::ReservedApi),
            ];
            for (name, status) in existing {
                assert!(repo.insert(&Nation::new(name, status)).unwrap());
            }

            let all: Vec<String> = existing.iter().map(|(n, _)| n.to_string()).collect();
            assert_eq!(repo.add_unknown_as_pending(&all).unwrap(), 0);

            for (name, status) in existing {
                assert_eq!(repo.get(name).unwrap().unwrap().status, status);
            }
            assert_eq!(repo.count_by_status(NationStatus::Pending).unwrap(), 0);
        }
    }

    #[test]
    fn test_list_by_status_newest_first() {
        for repo in create_test_repos() {
            let now = Utc::now();
            let rows = [
                ("old", now - Duration::minutes(10)),
                ("newest", now),
                ("middle_b", now - Duration::minutes(5)),
                ("middle_a", now - Duration::minutes(5)),
            ];
            for (name, at) in rows {
                repo.insert(&Nation::new(name, NationStatus::Pending).with_status_time(at))
                    .unwrap();
            }

            let listed: Vec<String> = repo
                .list_by_status(NationStatus::Pending, None)
                .unwrap()
                .into_iter()
                .map(|n| n.name)
                .collect();
            assert_eq!(listed, vec!["newest", "middle_a", "middle_b", "old"]);
            assert_eq!(repo.next_pending().unwrap().unwrap().name, "newest");
        }
    }

    #[test]
    fn test_list_by_qualifier() {
        for repo in create_test_repos() {
            repo.insert(&Nation::new("a", NationStatus::Member).with_qualifier("north"))
                .unwrap();
            repo.insert(&Nation::new("b", NationStatus::Member).with_qualifier("south"))
                .unwrap();

            let north = repo.list_by_status(NationStatus::Member, Some("north")).unwrap();
            assert_eq!(north.len(), 1);
            assert_eq!(north[0].name, "a");
            assert_eq!(repo.list_by_status(NationStatus::Member, None).unwrap().len(), 2);
        }
    }

    #[test]
    fn test_requeue_stale_reserved() {
        for repo in create_test_repos() {
            let now = Utc::now();
            repo.insert(
                &Nation::new("stale", NationStatus::ReservedApi)
                    .with_status_time(now - Duration::hours(3)),
            )
            .unwrap();
            repo.insert(&Nation::new("fresh", NationStatus::ReservedApi)).unwrap();
            repo.insert(
                &Nation::new("manual", NationStatus::ReservedManual)
                    .with_status_time(now - Duration::hours(3)),
            )
            .unwrap();

            assert_eq!(repo.requeue_stale_reserved(now - Duration::hours(1)).unwrap(), 1);
            assert_eq!(repo.get("stale").unwrap().unwrap().status, NationStatus::Pending);
            assert_eq!(repo.get("fresh").unwrap().unwrap().status, NationStatus::ReservedApi);
            assert_eq!(
                repo.get("manual").unwrap().unwrap().status,
                NationStatus::ReservedManual
            );
        }
    }

    #[test]
    fn test_requeue_skipped() {
        for repo in create_test_repos() {
            for name in ["s1", "s2", "s3"] {
                repo.insert(&Nation::new(name, NationStatus::Skipped)).unwrap();
            }
            repo.insert(&Nation::new("f1", NationStatus::Failed)).unwrap();

            assert_eq!(repo.requeue_skipped(&names(&["s1", "f1"])).unwrap(), 1);
            assert_eq!(repo.get("f1").unwrap().unwrap().status, NationStatus::Failed);
            assert_eq!(repo.requeue_skipped(&[]).unwrap(), 2);
            assert_eq!(repo.count_by_status(NationStatus::Pending).unwrap(), 3);
        }
    }

    #[test]
    fn test_sync_region_members() {
        for repo in create_test_repos() {
            let first = repo
                .sync_region_members("Home", &names(&["a", "b", "c"]))
                .unwrap();
            assert_eq!(first, MemberSync { joined: 3, left: 0 });

            // A sent nation that joined keeps its send row
            repo.insert(&Nation::new("recruit", NationStatus::Send)).unwrap();

            let second = repo
                .sync_region_members("Home", &names(&["b", "c", "d", "recruit"]))
                .unwrap();
            assert_eq!(second, MemberSync { joined: 1, left: 1 });
            assert!(repo.get("a").unwrap().is_none());
            assert_eq!(repo.get("recruit").unwrap().unwrap().status, NationStatus::Send);
            assert_eq!(
                repo.list_by_status(NationStatus::Member, Some("home")).unwrap().len(),
                3
            );
        }
    }

    #[test]
    fn test_last_status_time_and_stats() {
        for repo in create_test_repos() {
            assert!(repo.last_status_time(NationStatus::Send).unwrap().is_none());

            let at = Utc::now() - Duration::minutes(2);
            repo.insert(&Nation::new("x", NationStatus::Send).with_status_time(at))
                .unwrap();
            repo.insert(
                &Nation::new("y", NationStatus::Send).with_status_time(at - Duration::hours(1)),
            )
            .unwrap();
            repo.add_unknown_as_pending(&names(&["p1", "p2"])).unwrap();

            let last = repo.last_status_time(NationStatus::Send).unwrap().unwrap();
            assert!((last - at).num_milliseconds().abs() < 1);

            let stats = repo.stats().unwrap();
            assert_eq!(stats.send, 2);
            assert_eq!(stats.pending, 2);
            assert_eq!(stats.total(), 4);
            assert_eq!(stats.get(NationStatus::Send), 2);
        }
    }

    #[test]
    fn test_sqlite_file_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store").join("nations.db");

        {
            let repo = SqliteNationRepository::new(&path).unwrap();
            repo.add_unknown_as_pending(&names(&["persisted"])).unwrap();
        }

        let reopened = SqliteNationRepository::new(&path).unwrap();
        assert_eq!(
            reopened.get("persisted").unwrap().unwrap().status,
            NationStatus::Pending
        );
    }

    #[test]
    fn test_shared_repository_creation() {
        let repo = create_memory_repository();
        repo.add_unknown_as_pending(&names(&["shared"])).unwrap();
        assert_eq!(repo.count_by_status(NationStatus::Pending).unwrap(), 1);
    }
}
