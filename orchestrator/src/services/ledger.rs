//! SQLite progress ledger
//!
//! One row per observed combination index. Rows are created lazily on first
//! claim, so a space of millions of combinations never needs pre-population.
//! Claims run inside an IMMEDIATE transaction, which keeps the lowest-index
//! scan and the status flip atomic even if another process opens the same file.
//!
//! `ledger_meta` holds the layout signature and the frontier: the lowest index
//! that has no row yet. Every index below the frontier is observed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::Path;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::traits::ProgressStore;
use shared::{component_debug, component_info, Component, ProgressRecord, ProgressStatus, SharedError, StatusCounts};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS progress (
        combination_index INTEGER PRIMARY KEY,
        status TEXT NOT NULL,
        attempts INTEGER NOT NULL DEFAULT 0,
        artifact_ref TEXT,
        storage_ref TEXT,
        last_error TEXT,
        updated_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_progress_status ON progress (status, combination_index);
    CREATE TABLE IF NOT EXISTS ledger_meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
";

const SELECT_RECORD: &str = "
    SELECT combination_index, status, attempts, artifact_ref, storage_ref, last_error, updated_at
    FROM progress
    WHERE combination_index = ?1
";

/// Reason left on records returned to PENDING by [`ProgressStore::recover_interrupted`]
pub const INTERRUPTED_REASON: &str = "interrupted";

const FRONTIER_KEY: &str = "frontier";

/// What the ledger must know about the space it tracks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerLayout {
    /// Changes whenever category lists change and indices would change meaning
    pub signature: String,
    pub space_size: u64,
}

/// Progress ledger backed by a single SQLite file
pub struct SqliteProgressStore {
    conn: Mutex<Connection>,
    layout: LedgerLayout,
    max_attempts: u32,
}

impl SqliteProgressStore {
    /// Open (or create) the ledger file
    pub fn open(path: impl AsRef<Path>, layout: LedgerLayout, max_attempts: u32) -> OrchestratorResult<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(ledger_err("open"))?;
        let store = Self::bootstrap(conn, layout, max_attempts)?;
        component_debug!(Component::Ledger, "📒 Opened ledger at {}", path.display());
        Ok(store)
    }

    /// In-memory ledger, mostly for tests
    pub fn in_memory(layout: LedgerLayout, max_attempts: u32) -> OrchestratorResult<Self> {
        let conn = Connection::open_in_memory().map_err(ledger_err("open"))?;
        Self::bootstrap(conn, layout, max_attempts)
    }

    fn bootstrap(conn: Connection, layout: LedgerLayout, max_attempts: u32) -> OrchestratorResult<Self> {
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(ledger_err("configure"))?;
        let _mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .map_err(ledger_err("configure"))?;
        conn.execute_batch(SCHEMA).map_err(ledger_err("create schema"))?;

        let stored: Option<String> = conn
            .query_row("SELECT value FROM ledger_meta WHERE key = 'layout'", [], |row| row.get(0))
            .optional()
            .map_err(ledger_err("read layout"))?;

        match stored {
            None => {
                conn.execute(
                    "INSERT INTO ledger_meta (key, value) VALUES ('layout', ?1)",
                    params![layout.signature],
                )
                .map_err(ledger_err("write layout"))?;
            }
            Some(stored) if stored == layout.signature => {}
            Some(stored) => {
                return Err(OrchestratorError::LayoutMismatch {
                    stored,
                    current: layout.signature,
                });
            }
        }

        ensure_frontier(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            layout,
            max_attempts,
        })
    }
}

#[async_trait]
impl ProgressStore for SqliteProgressStore {
    async fn claim_next(&self, after_index: Option<u64>) -> OrchestratorResult<Option<ProgressRecord>> {
        let start = match after_index {
            Some(index) => match index.checked_add(1) {
                Some(next) => next,
                None => return Ok(None),
            },
            None => 0,
        };
        if start >= self.layout.space_size {
            return Ok(None);
        }

        let mut conn = self.conn.lock().await;
        let claimed = claim_in(&mut conn, start, self.layout.space_size, self.max_attempts)?;
        if let Some(record) = &claimed {
            component_debug!(
                Component::Ledger,
                "🔒 Claimed index {} (attempt {}/{})",
                record.index,
                record.attempts,
                self.max_attempts
            );
        }
        Ok(claimed)
    }

    async fn mark_completed(
        &self,
        index: u64,
        artifact_ref: &str,
        storage_ref: Option<String>,
    ) -> OrchestratorResult<ProgressRecord> {
        let mut conn = self.conn.lock().await;
        complete_in(&mut conn, index, artifact_ref, storage_ref.as_deref())
    }

    async fn mark_failed(&self, index: u64, reason: &str) -> OrchestratorResult<ProgressRecord> {
        let mut conn = self.conn.lock().await;
        fail_in(&mut conn, index, reason)
    }

    async fn recover_interrupted(&self) -> OrchestratorResult<u64> {
        let conn = self.conn.lock().await;
        let now = Utc::now().to_rfc3339();
        // The interrupted claim never produced a verdict, so its attempt is handed back
        let recovered = conn
            .execute(
                "
                UPDATE progress
                SET status = 'pending', attempts = MAX(attempts - 1, 0), last_error = ?1, updated_at = ?2
                WHERE status = 'in_progress'
                ",
                params![INTERRUPTED_REASON, now],
            )
            .map_err(ledger_err("recover interrupted"))?;

        if recovered > 0 {
            component_info!(
                Component::Ledger,
                "♻️  Returned {} interrupted generation(s) to pending",
                recovered
            );
        }
        Ok(recovered as u64)
    }

    async fn get(&self, index: u64) -> OrchestratorResult<Option<ProgressRecord>> {
        let conn = self.conn.lock().await;
        load_record(&conn, index)
    }

    async fn count_by_status(&self) -> OrchestratorResult<StatusCounts> {
        let conn = self.conn.lock().await;
        count_in(&conn, self.layout.space_size, self.max_attempts)
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

fn claim_in(conn: &mut Connection, start: u64, space_size: u64, max_attempts: u32) -> OrchestratorResult<Option<ProgressRecord>> {
    let start_sql = to_sql_index(start)?;
    let size_sql = to_sql_index(space_size)?;

    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(ledger_err("begin claim"))?;

    let retryable: Option<i64> = tx
        .query_row(
            "
            SELECT MIN(combination_index) FROM progress
            WHERE combination_index >= ?1 AND combination_index < ?2
              AND (status = 'pending' OR (status = 'failed' AND attempts < ?3))
            ",
            params![start_sql, size_sql, max_attempts],
            |row| row.get(0),
        )
        .map_err(ledger_err("scan claimable"))?;

    let frontier = read_frontier(&tx)?;
    let unobserved = if start_sql <= frontier {
        (frontier < size_sql).then_some(frontier)
    } else {
        first_unobserved(&tx, start_sql, size_sql)?
    };

    let chosen = match (retryable, unobserved) {
        (Some(a), Some(b)) => a.min(b),
        (Some(a), None) => a,
        (None, Some(b)) => b,
        (None, None) => return Ok(None),
    };

    let now = Utc::now().to_rfc3339();
    if unobserved == Some(chosen) {
        tx.execute(
            "INSERT INTO progress (combination_index, status, attempts, updated_at) VALUES (?1, 'pending', 0, ?2)",
            params![chosen, now],
        )
        .map_err(ledger_err("create record"))?;

        if chosen == frontier {
            let next = first_unobserved(&tx, chosen, i64::MAX)?.unwrap_or(i64::MAX);
            write_frontier(&tx, next)?;
        }
    }

    tx.execute(
        "UPDATE progress SET status = 'in_progress', attempts = attempts + 1, updated_at = ?2 WHERE combination_index = ?1",
        params![chosen, now],
    )
    .map_err(ledger_err("claim record"))?;

    let record = load_record(&tx, from_sql_index(chosen)?)?
        .ok_or_else(|| OrchestratorError::persistence("claim record", format!("index {chosen} vanished mid-claim")))?;

    tx.commit().map_err(ledger_err("commit claim"))?;
    Ok(Some(record))
}

/// Lowest index in `[start, end)` without a row
fn first_unobserved(conn: &Connection, start: i64, end: i64) -> OrchestratorResult<Option<i64>> {
    let start_observed: bool = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM progress WHERE combination_index = ?1)",
            params![start],
            |row| row.get(0),
        )
        .map_err(ledger_err("scan unobserved"))?;
    if !start_observed {
        return Ok((start < end).then_some(start));
    }

    conn.query_row(
        "
        SELECT MIN(p.combination_index + 1) FROM progress p
        WHERE p.combination_index >= ?1 AND p.combination_index < ?2 - 1
          AND NOT EXISTS (
              SELECT 1 FROM progress q WHERE q.combination_index = p.combination_index + 1
          )
        ",
        params![start, end],
        |row| row.get(0),
    )
    .map_err(ledger_err("scan unobserved"))
}

fn read_frontier(conn: &Connection) -> OrchestratorResult<i64> {
    let value: String = conn
        .query_row("SELECT value FROM ledger_meta WHERE key = ?1", params![FRONTIER_KEY], |row| row.get(0))
        .map_err(ledger_err("read frontier"))?;
    value.parse().map_err(|_| {
        SharedError::OutOfRange {
            field: FRONTIER_KEY.to_string(),
            value,
        }
        .into()
    })
}

fn write_frontier(conn: &Connection, frontier: i64) -> OrchestratorResult<()> {
    conn.execute(
        "INSERT OR REPLACE INTO ledger_meta (key, value) VALUES (?1, ?2)",
        params![FRONTIER_KEY, frontier.to_string()],
    )
    .map_err(ledger_err("write frontier"))?;
    Ok(())
}

/// Ledgers written before the frontier was tracked get it computed once
fn ensure_frontier(conn: &Connection) -> OrchestratorResult<()> {
    let stored: Option<String> = conn
        .query_row("SELECT value FROM ledger_meta WHERE key = ?1", params![FRONTIER_KEY], |row| row.get(0))
        .optional()
        .map_err(ledger_err("read frontier"))?;
    if stored.is_none() {
        let frontier = first_unobserved(conn, 0, i64::MAX)?.unwrap_or(i64::MAX);
        write_frontier(conn, frontier)?;
    }
    Ok(())
}

fn complete_in(
    conn: &mut Connection,
    index: u64,
    artifact_ref: &str,
    storage_ref: Option<&str>,
) -> OrchestratorResult<ProgressRecord> {
    let tx = conn.transaction().map_err(ledger_err("begin complete"))?;
    let current = require_record(&tx, index)?;

    match current.status {
        ProgressStatus::InProgress => {}
        ProgressStatus::Completed
            if current.artifact_ref.as_deref() == Some(artifact_ref) && current.storage_ref.as_deref() == storage_ref =>
        {
            return Ok(current);
        }
        from => {
            return Err(OrchestratorError::InvalidTransition {
                index,
                from,
                to: ProgressStatus::Completed,
            });
        }
    }

    tx.execute(
        "
        UPDATE progress
        SET status = 'completed', artifact_ref = ?2, storage_ref = ?3, updated_at = ?4
        WHERE combination_index = ?1
        ",
        params![to_sql_index(index)?, artifact_ref, storage_ref, Utc::now().to_rfc3339()],
    )
    .map_err(ledger_err("mark completed"))?;

    let record = require_record(&tx, index)?;
    tx.commit().map_err(ledger_err("commit complete"))?;
    Ok(record)
}

fn fail_in(conn: &mut Connection, index: u64, reason: &str) -> OrchestratorResult<ProgressRecord> {
    let tx = conn.transaction().map_err(ledger_err("begin fail"))?;
    let current = require_record(&tx, index)?;

    if current.status != ProgressStatus::InProgress {
        return Err(OrchestratorError::InvalidTransition {
            index,
            from: current.status,
            to: ProgressStatus::Failed,
        });
    }

    tx.execute(
        "UPDATE progress SET status = 'failed', last_error = ?2, updated_at = ?3 WHERE combination_index = ?1",
        params![to_sql_index(index)?, reason, Utc::now().to_rfc3339()],
    )
    .map_err(ledger_err("mark failed"))?;

    let record = require_record(&tx, index)?;
    tx.commit().map_err(ledger_err("commit fail"))?;
    Ok(record)
}

fn count_in(conn: &Connection, space_size: u64, max_attempts: u32) -> OrchestratorResult<StatusCounts> {
    let mut counts = StatusCounts {
        space_size,
        ..StatusCounts::default()
    };

    let mut stmt = conn
        .prepare("SELECT status, COUNT(*) FROM progress GROUP BY status")
        .map_err(ledger_err("count statuses"))?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
        .map_err(ledger_err("count statuses"))?;

    let mut observed = 0u64;
    for row in rows {
        let (status, count) = row.map_err(ledger_err("count statuses"))?;
        let count = from_sql_index(count)?;
        observed += count;
        match status.parse::<ProgressStatus>()? {
            ProgressStatus::Pending => counts.pending += count,
            ProgressStatus::InProgress => counts.in_progress += count,
            ProgressStatus::Completed => counts.completed += count,
            ProgressStatus::Failed => counts.failed += count,
        }
    }
    counts.pending += space_size.saturating_sub(observed);

    let exhausted: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM progress WHERE status = 'failed' AND attempts >= ?1",
            params![max_attempts],
            |row| row.get(0),
        )
        .map_err(ledger_err("count exhausted"))?;
    counts.retries_exhausted = from_sql_index(exhausted)?;

    Ok(counts)
}

fn load_record(conn: &Connection, index: u64) -> OrchestratorResult<Option<ProgressRecord>> {
    let raw = conn
        .query_row(SELECT_RECORD, params![to_sql_index(index)?], RawRecord::from_row)
        .optional()
        .map_err(ledger_err("load record"))?;
    raw.map(RawRecord::into_record).transpose()
}

fn require_record(conn: &Connection, index: u64) -> OrchestratorResult<ProgressRecord> {
    load_record(conn, index)?
        .ok_or_else(|| OrchestratorError::persistence("load record", format!("no record for index {index}")))
}

/// Row as stored, before validation
struct RawRecord {
    index: i64,
    status: String,
    attempts: i64,
    artifact_ref: Option<String>,
    storage_ref: Option<String>,
    last_error: Option<String>,
    updated_at: String,
}

impl RawRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            index: row.get(0)?,
            status: row.get(1)?,
            attempts: row.get(2)?,
            artifact_ref: row.get(3)?,
            storage_ref: row.get(4)?,
            last_error: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }

    fn into_record(self) -> OrchestratorResult<ProgressRecord> {
        let updated_at = DateTime::parse_from_rfc3339(&self.updated_at)
            .map_err(|_| SharedError::InvalidTimestamp {
                input: self.updated_at.clone(),
            })?
            .with_timezone(&Utc);
        let attempts = u32::try_from(self.attempts).map_err(|_| SharedError::OutOfRange {
            field: "attempts".to_string(),
            value: self.attempts.to_string(),
        })?;

        Ok(ProgressRecord {
            index: from_sql_index(self.index)?,
            status: self.status.parse()?,
            attempts,
            artifact_ref: self.artifact_ref,
            storage_ref: self.storage_ref,
            last_error: self.last_error,
            updated_at,
        })
    }
}

fn to_sql_index(index: u64) -> OrchestratorResult<i64> {
    i64::try_from(index).map_err(|_| {
        SharedError::OutOfRange {
            field: "combination_index".to_string(),
            value: index.to_string(),
        }
        .into()
    })
}

fn from_sql_index(value: i64) -> OrchestratorResult<u64> {
    u64::try_from(value).map_err(|_| {
        SharedError::OutOfRange {
            field: "combination_index".to_string(),
            value: value.to_string(),
        }
        .into()
    })
}

fn ledger_err(operation: &'static str) -> impl Fn(rusqlite::Error) -> OrchestratorError {
    move |err| OrchestratorError::persistence(operation, err)
}
