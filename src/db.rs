use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::model::{Category, CrawlAttempt, Frequency, MonitoredTarget, Snapshot};
use crate::store::{SnapshotStore, TargetSource};

/// SQLite-backed target list, crawl log and snapshot history.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating {}", dir.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("opening database {}", path.display()))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| anyhow!("database lock poisoned"))
    }

    // ── Targets (operator surface) ──

    /// Insert a target, or update URL and frequency of an existing domain.
    pub fn add_target(
        &self,
        domain: &str,
        canonical_url: Option<&str>,
        frequency: Frequency,
    ) -> Result<i64> {
        let domain = normalize_domain(domain);
        if domain.is_empty() {
            return Err(anyhow!("empty domain"));
        }
        let conn = self.conn()?;
        let id = conn.query_row(
            "INSERT INTO targets (domain, canonical_url, frequency) VALUES (?1, ?2, ?3)
             ON CONFLICT(domain) DO UPDATE
                SET canonical_url = excluded.canonical_url, frequency = excluded.frequency
             RETURNING id",
            rusqlite::params![domain, canonical_url, frequency.as_str()],
            |r| r.get(0),
        )?;
        Ok(id)
    }

    /// All targets; `last_crawled_at` is the newest crawl across categories.
    pub fn list_targets(&self) -> Result<Vec<MonitoredTarget>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT t.id, t.domain, t.canonical_url, t.frequency, t.active,
                    (SELECT MAX(s.last_crawled_at) FROM crawl_state s WHERE s.target_id = t.id)
             FROM targets t ORDER BY t.id",
        )?;
        let rows = stmt
            .query_map([], target_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Returns false when no target has this id.
    pub fn set_active(&self, id: i64, active: bool) -> Result<bool> {
        let changed = self.conn()?.execute(
            "UPDATE targets SET active = ?1 WHERE id = ?2",
            rusqlite::params![active, id],
        )?;
        Ok(changed > 0)
    }

    pub fn recent_attempts(
        &self,
        target_id: i64,
        limit: usize,
    ) -> Result<Vec<(i64, CrawlAttempt)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT target_id, category, detail, attempted_at FROM crawl_attempts
             WHERE target_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(rusqlite::params![target_id, limit as i64], |r| {
                Ok((
                    r.get(0)?,
                    CrawlAttempt {
                        category: parse_col(r, 1)?,
                        outcome: json_col(r, 2)?,
                        at: r.get(3)?,
                    },
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn get_stats(&self) -> Result<Stats> {
        let conn = self.conn()?;
        let count = |sql: &str| -> Result<usize> { Ok(conn.query_row(sql, [], |r| r.get(0))?) };
        Ok(Stats {
            targets: count("SELECT COUNT(*) FROM targets")?,
            active_targets: count("SELECT COUNT(*) FROM targets WHERE active = 1")?,
            snapshots: count("SELECT COUNT(*) FROM snapshots")?,
            changed_snapshots: count("SELECT COUNT(*) FROM snapshots WHERE changes != '[]'")?,
            attempts: count("SELECT COUNT(*) FROM crawl_attempts")?,
            failed_attempts: count("SELECT COUNT(*) FROM crawl_attempts WHERE outcome = 'failed'")?,
        })
    }
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS targets (
            id            INTEGER PRIMARY KEY,
            domain        TEXT UNIQUE NOT NULL,
            canonical_url TEXT,
            frequency     TEXT NOT NULL
                          CHECK(frequency IN ('daily','weekly','biweekly','monthly')),
            active        BOOLEAN NOT NULL DEFAULT 1,
            created_at    TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS crawl_state (
            target_id       INTEGER NOT NULL REFERENCES targets(id) ON DELETE CASCADE,
            category        TEXT NOT NULL,
            last_crawled_at TEXT NOT NULL,
            PRIMARY KEY (target_id, category)
        );

        CREATE TABLE IF NOT EXISTS crawl_attempts (
            id           INTEGER PRIMARY KEY,
            target_id    INTEGER NOT NULL REFERENCES targets(id) ON DELETE CASCADE,
            category     TEXT NOT NULL,
            outcome      TEXT NOT NULL,
            detail       TEXT NOT NULL,
            attempted_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_attempts_target ON crawl_attempts(target_id, id);

        -- Append-only; rows are never updated
        CREATE TABLE IF NOT EXISTS snapshots (
            id           INTEGER PRIMARY KEY,
            target_id    INTEGER NOT NULL REFERENCES targets(id) ON DELETE CASCADE,
            category     TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            facts        TEXT NOT NULL,
            metrics      TEXT NOT NULL,
            changes      TEXT NOT NULL,
            significance TEXT CHECK(significance IN ('LOW','MEDIUM','HIGH','CRITICAL')),
            source_url   TEXT NOT NULL,
            previous_id  INTEGER,
            created_at   TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_snapshots_pair ON snapshots(target_id, category, id);

        CREATE TABLE IF NOT EXISTS latest_snapshots (
            target_id   INTEGER NOT NULL,
            category    TEXT NOT NULL,
            snapshot_id INTEGER NOT NULL REFERENCES snapshots(id) ON DELETE CASCADE,
            PRIMARY KEY (target_id, category)
        );
        ",
    )?;
    Ok(())
}

const SNAPSHOT_COLUMNS: &str = "s.id, s.target_id, s.category, s.content_hash, s.facts, s.metrics,
     s.changes, s.significance, s.source_url, s.previous_id, s.created_at";

impl SnapshotStore for SqliteStore {
    fn find_latest(&self, target_id: i64, category: Category) -> Result<Option<Snapshot>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM latest_snapshots l JOIN snapshots s ON s.id = l.snapshot_id
             WHERE l.target_id = ?1 AND l.category = ?2",
            SNAPSHOT_COLUMNS
        );
        let snapshot = conn
            .query_row(&sql, rusqlite::params![target_id, category.as_str()], snapshot_from_row)
            .optional()?;
        Ok(snapshot)
    }

    fn save(&self, snapshot: Snapshot) -> Result<Snapshot> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO snapshots
             (target_id, category, content_hash, facts, metrics, changes, significance,
              source_url, previous_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            rusqlite::params![
                snapshot.target_id,
                snapshot.category.as_str(),
                snapshot.content_hash,
                to_json(&snapshot.facts)?,
                to_json(&snapshot.metrics)?,
                to_json(&snapshot.changes)?,
                snapshot.significance.map(|s| s.as_str()),
                snapshot.source_url,
                snapshot.previous_id,
                snapshot.created_at,
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.execute(
            "INSERT INTO latest_snapshots (target_id, category, snapshot_id) VALUES (?1, ?2, ?3)
             ON CONFLICT(target_id, category) DO UPDATE SET snapshot_id = excluded.snapshot_id",
            rusqlite::params![snapshot.target_id, snapshot.category.as_str(), id],
        )?;
        tx.commit()?;
        Ok(Snapshot {
            id: Some(id),
            ..snapshot
        })
    }

    fn delete_older_than(&self, target_id: i64, category: Category, keep: usize) -> Result<usize> {
        let deleted = self.conn()?.execute(
            "DELETE FROM snapshots
             WHERE id IN (
                SELECT id FROM snapshots
                WHERE target_id = ?1 AND category = ?2
                ORDER BY id DESC LIMIT -1 OFFSET ?3
             )
             AND id NOT IN (SELECT snapshot_id FROM latest_snapshots)",
            rusqlite::params![target_id, category.as_str(), keep.max(1) as i64],
        )?;
        Ok(deleted)
    }

    fn history(&self, target_id: i64, category: Category, limit: usize) -> Result<Vec<Snapshot>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM snapshots s WHERE s.target_id = ?1 AND s.category = ?2
             ORDER BY s.id DESC LIMIT ?3",
            SNAPSHOT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                rusqlite::params![target_id, category.as_str(), limit as i64],
                snapshot_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

impl TargetSource for SqliteStore {
    fn targets(&self, category: Category) -> Result<Vec<MonitoredTarget>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT t.id, t.domain, t.canonical_url, t.frequency, t.active, s.last_crawled_at
             FROM targets t
             LEFT JOIN crawl_state s ON s.target_id = t.id AND s.category = ?1
             ORDER BY t.id",
        )?;
        let rows = stmt
            .query_map([category.as_str()], target_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn record_crawl_attempt(&self, target_id: i64, attempt: &CrawlAttempt) -> Result<()> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO crawl_attempts (target_id, category, outcome, detail, attempted_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                target_id,
                attempt.category.as_str(),
                attempt.outcome.label(),
                to_json(&attempt.outcome)?,
                attempt.at,
            ],
        )?;
        if attempt.outcome.is_success() {
            tx.execute(
                "INSERT INTO crawl_state (target_id, category, last_crawled_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(target_id, category) DO UPDATE
                    SET last_crawled_at = excluded.last_crawled_at",
                rusqlite::params![target_id, attempt.category.as_str(), attempt.at],
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}

pub struct Stats {
    pub targets: usize,
    pub active_targets: usize,
    pub snapshots: usize,
    pub changed_snapshots: usize,
    pub attempts: usize,
    pub failed_attempts: usize,
}

// ── Row mapping ──

fn target_from_row(r: &Row<'_>) -> rusqlite::Result<MonitoredTarget> {
    Ok(MonitoredTarget {
        id: r.get(0)?,
        domain: r.get(1)?,
        canonical_url: r.get(2)?,
        frequency: parse_col(r, 3)?,
        active: r.get(4)?,
        last_crawled_at: r.get::<_, Option<DateTime<Utc>>>(5)?,
    })
}

fn snapshot_from_row(r: &Row<'_>) -> rusqlite::Result<Snapshot> {
    let significance: Option<String> = r.get(7)?;
    Ok(Snapshot {
        id: r.get(0)?,
        target_id: r.get(1)?,
        category: parse_col(r, 2)?,
        content_hash: r.get(3)?,
        facts: json_col(r, 4)?,
        metrics: json_col(r, 5)?,
        changes: json_col(r, 6)?,
        significance: significance
            .map(|s| s.parse().map_err(|e: String| conversion_error(7, e.into())))
            .transpose()?,
        source_url: r.get(8)?,
        previous_id: r.get(9)?,
        created_at: r.get(10)?,
    })
}

fn conversion_error(
    idx: usize,
    e: Box<dyn std::error::Error + Send + Sync + 'static>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e)
}

fn parse_col<T>(r: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    let raw: String = r.get(idx)?;
    raw.parse().map_err(|e: String| conversion_error(idx, e.into()))
}

fn json_col<T: DeserializeOwned>(r: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = r.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(idx, Box::new(e)))
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

fn normalize_domain(raw: &str) -> String {
    let lower = raw.trim().to_ascii_lowercase();
    let bare = lower
        .strip_prefix("https://")
        .or_else(|| lower.strip_prefix("http://"))
        .unwrap_or(&lower);
    bare.trim_end_matches('/').to_string()
}
