//! Idempotency ledger backed by SQLite.
//!
//! One row per external event id, written first as a `pending` claim and then
//! finalized with a terminal outcome. A terminal row is never rewritten, which
//! is what keeps every event at most once through generation and dispatch.
//! The activity table is append-only and only read by operator commands.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::domain::{
    ActivityLogEntry, Event, EventKind, LedgerRecord, LedgerStats, Outcome, RecordStatus,
};

/// Errors from ledger storage
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to create ledger directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt ledger row: {0}")]
    Corrupt(String),

    #[error("ledger connection lock poisoned")]
    Poisoned,

    #[error("ledger task failed: {0}")]
    Task(String),
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS processed_events (
    id           TEXT PRIMARY KEY,
    kind         TEXT NOT NULL,
    thread_id    TEXT NOT NULL,
    text         TEXT,
    sender_name  TEXT,
    sender_id    TEXT,
    reply_text   TEXT,
    replied      INTEGER NOT NULL DEFAULT 0,
    error_reason TEXT,
    status       TEXT NOT NULL,
    recorded_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_processed_events_recorded_at
    ON processed_events (recorded_at);
CREATE TABLE IF NOT EXISTS bot_activity (
    id         TEXT PRIMARY KEY,
    kind       TEXT NOT NULL,
    detail     TEXT NOT NULL,
    created_at TEXT NOT NULL
);
";

const RECORD_COLUMNS: &str = "id, kind, thread_id, text, sender_name, sender_id, reply_text, \
                              replied, error_reason, status, recorded_at";

/// Durable at-most-once outcome store
pub struct Ledger {
    conn: Mutex<Connection>,

    /// Database file, `None` for in-memory ledgers
    path: Option<PathBuf>,
}

impl Ledger {
    /// Open (or create) the ledger database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| LedgerError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;

        debug!(path = %path.display(), "Opened ledger");
        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    /// Ledger that lives only as long as this value
    pub fn open_in_memory() -> Result<Self, LedgerError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, LedgerError> {
        self.conn.lock().map_err(|_| LedgerError::Poisoned)
    }

    /// True iff any row (pending or terminal) exists for `id`
    pub fn exists(&self, id: &str) -> Result<bool, LedgerError> {
        let conn = self.conn()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM processed_events WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Atomically reserve `id` for this caller
    ///
    /// Returns `false` when any row for the id already exists, in which case
    /// the caller must not generate or dispatch.
    pub fn claim(&self, event: &Event) -> Result<bool, LedgerError> {
        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT INTO processed_events
                 (id, kind, thread_id, text, sender_name, sender_id, replied, status, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?8)
             ON CONFLICT(id) DO NOTHING",
            params![
                event.id(),
                event.kind().as_str(),
                event.thread_id(),
                event.text(),
                event.sender_name(),
                event.sender_id(),
                RecordStatus::Pending.as_str(),
                now(),
            ],
        )?;
        Ok(inserted == 1)
    }

    /// Write the terminal outcome for `event`
    ///
    /// Finalizes a pending claim or inserts a fresh row. A row that already
    /// holds a terminal outcome is only touched when the new outcome has the
    /// same status; otherwise the write is ignored and `false` is returned.
    pub fn record(&self, event: &Event, outcome: &Outcome) -> Result<bool, LedgerError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "INSERT INTO processed_events
                 (id, kind, thread_id, text, sender_name, sender_id,
                  reply_text, replied, error_reason, status, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(id) DO UPDATE SET
                 reply_text   = excluded.reply_text,
                 replied      = excluded.replied,
                 error_reason = excluded.error_reason,
                 status       = excluded.status,
                 recorded_at  = excluded.recorded_at
             WHERE processed_events.status = 'pending'
                OR processed_events.status = excluded.status",
            params![
                event.id(),
                event.kind().as_str(),
                event.thread_id(),
                event.text(),
                event.sender_name(),
                event.sender_id(),
                outcome.reply_text(),
                outcome.replied(),
                outcome.error_reason(),
                outcome.status().as_str(),
                now(),
            ],
        )?;
        Ok(changed == 1)
    }

    /// Fetch the row for `id`
    pub fn get(&self, id: &str) -> Result<Option<LedgerRecord>, LedgerError> {
        let conn = self.conn()?;
        let sql = format!("SELECT {RECORD_COLUMNS} FROM processed_events WHERE id = ?1");
        let raw = conn.query_row(&sql, params![id], RawRecord::from_row).optional()?;
        raw.map(RawRecord::into_record).transpose()
    }

    /// Most recently written rows, newest first
    pub fn recent(&self, limit: usize) -> Result<Vec<LedgerRecord>, LedgerError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM processed_events
             ORDER BY recorded_at DESC, rowid DESC LIMIT ?1"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![limit as i64], RawRecord::from_row)?;

        let mut records = Vec::new();
        for raw in rows {
            records.push(raw?.into_record()?);
        }
        Ok(records)
    }

    /// Per-kind totals over terminal rows
    pub fn stats(&self) -> Result<LedgerStats, LedgerError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT kind, COUNT(*), COALESCE(SUM(replied), 0)
             FROM processed_events
             WHERE status != 'pending'
             GROUP BY kind",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;

        let mut stats = LedgerStats::default();
        for row in rows {
            let (kind, total, replied) = row?;
            match EventKind::parse(&kind) {
                Some(EventKind::Comment) => {
                    stats.total_comments = total as u64;
                    stats.replied_comments = replied as u64;
                }
                Some(EventKind::Message) => {
                    stats.total_messages = total as u64;
                    stats.replied_messages = replied as u64;
                }
                None => return Err(LedgerError::Corrupt(format!("unknown kind '{kind}'"))),
            }
        }
        Ok(stats)
    }

    /// Append one activity entry
    pub fn log_activity(&self, kind: &str, detail: &str) -> Result<(), LedgerError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO bot_activity (id, kind, detail, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                Uuid::new_v4().to_string(),
                kind,
                detail,
                now()
            ],
        )?;
        Ok(())
    }

    /// Latest activity entries, newest first
    pub fn recent_activity(&self, limit: usize) -> Result<Vec<ActivityLogEntry>, LedgerError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT kind, detail, created_at FROM bot_activity
             ORDER BY created_at DESC, rowid DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (kind, detail, created_at) = row?;
            entries.push(ActivityLogEntry {
                kind,
                detail,
                timestamp: parse_timestamp(&created_at)?,
            });
        }
        Ok(entries)
    }
}

/// Row as stored, before enum and timestamp parsing
struct RawRecord {
    id: String,
    kind: String,
    thread_id: String,
    text: Option<String>,
    sender_name: Option<String>,
    sender_id: Option<String>,
    reply_text: Option<String>,
    replied: bool,
    error_reason: Option<String>,
    status: String,
    recorded_at: String,
}

impl RawRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            kind: row.get(1)?,
            thread_id: row.get(2)?,
            text: row.get(3)?,
            sender_name: row.get(4)?,
            sender_id: row.get(5)?,
            reply_text: row.get(6)?,
            replied: row.get(7)?,
            error_reason: row.get(8)?,
            status: row.get(9)?,
            recorded_at: row.get(10)?,
        })
    }

    fn into_record(self) -> Result<LedgerRecord, LedgerError> {
        let kind = EventKind::parse(&self.kind).ok_or_else(|| {
            LedgerError::Corrupt(format!("{}: unknown kind '{}'", self.id, self.kind))
        })?;
        let status = RecordStatus::parse(&self.status).ok_or_else(|| {
            LedgerError::Corrupt(format!("{}: unknown status '{}'", self.id, self.status))
        })?;

        Ok(LedgerRecord {
            recorded_at: parse_timestamp(&self.recorded_at)?,
            id: self.id,
            kind,
            thread_id: self.thread_id,
            text: self.text,
            sender_name: self.sender_name,
            sender_id: self.sender_id,
            reply_text: self.reply_text,
            replied: self.replied,
            error_reason: self.error_reason,
            status,
        })
    }
}

/// Fixed-width timestamps so text ordering matches time ordering
fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, LedgerError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| LedgerError::Corrupt(format!("bad timestamp '{raw}': {e}")))
}
