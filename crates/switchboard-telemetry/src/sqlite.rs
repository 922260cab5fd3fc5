//! SQLite persistence for call records, queryable by call, model and event.

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::Connection;

use crate::TelemetryError;
use crate::calls::{CallEvent, CallRecord, CallSink};

/// Query parameters for persisted call records.
#[derive(Clone, Debug, Default)]
pub struct CallQuery {
    /// Only records of this call.
    pub seq: Option<u64>,
    /// Only records for this model.
    pub model: Option<String>,
    /// Only records of this lifecycle event.
    pub event: Option<CallEvent>,
    /// Row cap (default 100).
    pub limit: Option<u32>,
}

/// SQLite sink that persists every call record.
pub struct SqliteCallSink {
    conn: Mutex<Connection>,
}

impl SqliteCallSink {
    /// Open (or create) the database at `db_path`, creating missing parent
    /// directories.
    pub fn new(db_path: &Path) -> Result<Self, TelemetryError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self::with_connection(Connection::open(db_path)?)?)
    }

    /// Throwaway in-memory store.
    pub fn in_memory() -> Result<Self, rusqlite::Error> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, rusqlite::Error> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             CREATE TABLE IF NOT EXISTS llm_calls (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 seq INTEGER NOT NULL,
                 attempt INTEGER NOT NULL,
                 provider TEXT NOT NULL,
                 model TEXT NOT NULL,
                 side_call INTEGER NOT NULL,
                 event TEXT NOT NULL,
                 record TEXT NOT NULL,
                 timestamp TEXT NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_llm_calls_seq ON llm_calls(seq);
             CREATE INDEX IF NOT EXISTS idx_llm_calls_model ON llm_calls(model);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Matching records, oldest first.
    pub fn query(&self, q: &CallQuery) -> Result<Vec<CallRecord>, rusqlite::Error> {
        let conn = self.conn.lock();
        let mut sql = String::from("SELECT record FROM llm_calls WHERE 1=1");
        let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(seq) = q.seq {
            sql.push_str(&format!(" AND seq = ?{}", params.len() + 1));
            params.push(Box::new(i64::try_from(seq).unwrap_or(i64::MAX)));
        }
        if let Some(model) = &q.model {
            sql.push_str(&format!(" AND model = ?{}", params.len() + 1));
            params.push(Box::new(model.clone()));
        }
        if let Some(event) = q.event {
            sql.push_str(&format!(" AND event = ?{}", params.len() + 1));
            params.push(Box::new(event.as_str()));
        }

        let limit = q.limit.unwrap_or(100);
        sql.push_str(&format!(" ORDER BY id ASC LIMIT {limit}"));

        let param_refs: Vec<&dyn rusqlite::types::ToSql> = params.iter().map(AsRef::as_ref).collect();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(param_refs.as_slice(), |row| row.get::<_, String>(0))?;

        let mut out = Vec::new();
        for raw in rows {
            let raw = raw?;
            match serde_json::from_str(&raw) {
                Ok(record) => out.push(record),
                Err(e) => tracing::warn!(error = %e, "skipping unreadable call record"),
            }
        }
        Ok(out)
    }

    /// Total stored records.
    pub fn count(&self) -> Result<i64, rusqlite::Error> {
        let conn = self.conn.lock();
        conn.query_row("SELECT COUNT(*) FROM llm_calls", [], |row| row.get(0))
    }
}

impl CallSink for SqliteCallSink {
    fn record(&self, record: &CallRecord) {
        let Ok(json) = serde_json::to_string(record) else {
            return;
        };
        let conn = self.conn.lock();
        if let Err(e) = conn.execute(
            "INSERT INTO llm_calls (seq, attempt, provider, model, side_call, event, record, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                i64::try_from(record.seq).unwrap_or(i64::MAX),
                record.attempt,
                record.provider,
                record.model,
                record.side_call,
                record.event.as_str(),
                json,
                record.timestamp,
            ],
        ) {
            tracing::warn!(error = %e, seq = record.seq, "failed to persist call record");
        }
    }
}
