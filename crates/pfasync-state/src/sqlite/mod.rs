//! `SQLite`-backed implementation of [`StateBackend`](crate::StateBackend).
//!
//! Uses a single `Mutex<Connection>` for thread safety. Multi-statement
//! writes run in `IMMEDIATE` transactions so a second process sharing the
//! file observes them atomically.

mod bronze;
mod mapping;
mod runs;
mod silver;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension};

use pfasync_types::batch::{Batch, RawRecord, SyncType};
use pfasync_types::ids::{BatchId, EndpointId};
use pfasync_types::mapping::{MappingRule, MappingVersionSnapshot, SnapshotReason};
use pfasync_types::record::{NaturalKey, NormalizedRecord};
use pfasync_types::run::{RunCounters, RunPhase, RunStatus, SyncRun};

use crate::error::{self, StateError};
use crate::schema::{CREATE_TABLES, PRAGMAS};

/// `SQLite`-backed record store.
///
/// Create with [`SqliteStateBackend::open`] for file-backed persistence
/// or [`SqliteStateBackend::in_memory`] for tests.
pub struct SqliteStateBackend {
    conn: Mutex<Connection>,
}

impl SqliteStateBackend {
    /// Open or create a `SQLite` database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] if the directory can't be created,
    /// or a backend error if the database can't be opened.
    pub fn open(path: &Path) -> error::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).map_err(|e| StateError::backend_context("open", e))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| StateError::backend_context("open: journal_mode", e))?;
        Self::init(conn)
    }

    /// Create an in-memory `SQLite` backend (for testing).
    ///
    /// # Errors
    ///
    /// Returns a backend error if the in-memory database can't be initialized.
    pub fn in_memory() -> error::Result<Self> {
        let conn = Connection::open_in_memory().map_err(StateError::backend)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> error::Result<Self> {
        conn.execute_batch(PRAGMAS)
            .map_err(|e| StateError::backend_context("init: pragmas", e))?;
        conn.execute_batch(CREATE_TABLES)
            .map_err(|e| StateError::backend_context("init: create tables", e))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the connection lock.
    fn lock_conn(&self) -> error::Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StateError::LockPoisoned)
    }
}

// ---------------------------------------------------------------------------
// Column codecs
// ---------------------------------------------------------------------------

/// Fixed-width RFC 3339 so stored timestamps sort lexicographically.
pub(crate) fn fmt_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn now_ts() -> String {
    fmt_ts(&Utc::now())
}

pub(crate) fn parse_ts(raw: &str) -> error::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| StateError::Corrupt(format!("timestamp '{raw}'")))
}

fn parse_opt_ts(raw: Option<String>) -> error::Result<Option<DateTime<Utc>>> {
    raw.as_deref().map(parse_ts).transpose()
}

fn parse_enum<T>(what: &str, raw: &str, parse: impl Fn(&str) -> Option<T>) -> error::Result<T> {
    parse(raw).ok_or_else(|| StateError::Corrupt(format!("{what} '{raw}'")))
}

#[allow(clippy::cast_sign_loss)]
fn to_u64(value: i64) -> u64 {
    value.max(0) as u64
}

#[allow(clippy::cast_possible_wrap)]
pub(crate) fn to_i64(value: u64) -> i64 {
    value.min(i64::MAX as u64) as i64
}

// ---------------------------------------------------------------------------
// Row models
// ---------------------------------------------------------------------------

pub(crate) const BATCH_COLUMNS: &str = "id, endpoint_id, scope, sync_type, ingested_at, \
     completed_at, record_count, schema_fingerprint, warnings_json, errors_json";

pub(crate) struct BatchRow {
    id: String,
    endpoint_id: String,
    scope: String,
    sync_type: String,
    ingested_at: String,
    completed_at: Option<String>,
    record_count: i64,
    schema_fingerprint: Option<String>,
    warnings_json: String,
    errors_json: String,
}

impl BatchRow {
    pub(crate) fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            endpoint_id: row.get(1)?,
            scope: row.get(2)?,
            sync_type: row.get(3)?,
            ingested_at: row.get(4)?,
            completed_at: row.get(5)?,
            record_count: row.get(6)?,
            schema_fingerprint: row.get(7)?,
            warnings_json: row.get(8)?,
            errors_json: row.get(9)?,
        })
    }

    pub(crate) fn into_model(self) -> error::Result<Batch> {
        Ok(Batch {
            id: BatchId::new(self.id),
            endpoint_id: EndpointId::new(self.endpoint_id),
            scope: self.scope,
            sync_type: parse_enum("sync_type", &self.sync_type, SyncType::parse)?,
            ingested_at: parse_ts(&self.ingested_at)?,
            completed_at: parse_opt_ts(self.completed_at)?,
            record_count: to_u64(self.record_count),
            schema_fingerprint: self.schema_fingerprint,
            warnings: serde_json::from_str(&self.warnings_json)?,
            errors: serde_json::from_str(&self.errors_json)?,
        })
    }
}

pub(crate) fn load_batch(conn: &Connection, batch_id: &str) -> error::Result<Option<Batch>> {
    conn.query_row(
        &format!("SELECT {BATCH_COLUMNS} FROM batches WHERE id = ?1"),
        [batch_id],
        BatchRow::from_row,
    )
    .optional()
    .map_err(StateError::backend)?
    .map(BatchRow::into_model)
    .transpose()
}

pub(crate) const RAW_COLUMNS: &str =
    "id, batch_id, external_id, payload_json, ingested_at, schema_version, entity_type";

pub(crate) struct RawRow {
    id: i64,
    batch_id: String,
    external_id: String,
    payload_json: String,
    ingested_at: String,
    schema_version: String,
    entity_type: String,
}

impl RawRow {
    pub(crate) fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            batch_id: row.get(1)?,
            external_id: row.get(2)?,
            payload_json: row.get(3)?,
            ingested_at: row.get(4)?,
            schema_version: row.get(5)?,
            entity_type: row.get(6)?,
        })
    }

    pub(crate) fn into_model(self) -> error::Result<RawRecord> {
        Ok(RawRecord {
            id: self.id,
            batch_id: BatchId::new(self.batch_id),
            external_id: self.external_id,
            payload: serde_json::from_str(&self.payload_json)?,
            ingested_at: parse_ts(&self.ingested_at)?,
            schema_version: self.schema_version,
            entity_type: self.entity_type,
        })
    }
}

pub(crate) const RUN_COLUMNS: &str = "id, endpoint_id, batch_id, sync_type, status, phase, \
     records_processed, records_inserted, records_updated, records_unchanged, records_deleted, \
     duration_ms, error_message, retry_of, cancel_requested, owner, heartbeat_at, started_at, \
     finished_at";

pub(crate) struct RunRow {
    id: i64,
    endpoint_id: String,
    batch_id: String,
    sync_type: String,
    status: String,
    phase: String,
    counters: [i64; 5],
    duration_ms: Option<i64>,
    error_message: Option<String>,
    retry_of: Option<i64>,
    cancel_requested: bool,
    owner: String,
    heartbeat_at: String,
    started_at: String,
    finished_at: Option<String>,
}

impl RunRow {
    pub(crate) fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            endpoint_id: row.get(1)?,
            batch_id: row.get(2)?,
            sync_type: row.get(3)?,
            status: row.get(4)?,
            phase: row.get(5)?,
            counters: [row.get(6)?, row.get(7)?, row.get(8)?, row.get(9)?, row.get(10)?],
            duration_ms: row.get(11)?,
            error_message: row.get(12)?,
            retry_of: row.get(13)?,
            cancel_requested: row.get(14)?,
            owner: row.get(15)?,
            heartbeat_at: row.get(16)?,
            started_at: row.get(17)?,
            finished_at: row.get(18)?,
        })
    }

    pub(crate) fn into_model(self) -> error::Result<SyncRun> {
        let [processed, inserted, updated, unchanged, deleted] = self.counters;
        Ok(SyncRun {
            id: self.id,
            endpoint_id: EndpointId::new(self.endpoint_id),
            batch_id: BatchId::new(self.batch_id),
            sync_type: parse_enum("sync_type", &self.sync_type, SyncType::parse)?,
            status: parse_enum("status", &self.status, RunStatus::parse)?,
            phase: parse_enum("phase", &self.phase, RunPhase::parse)?,
            counters: RunCounters {
                records_processed: to_u64(processed),
                records_inserted: to_u64(inserted),
                records_updated: to_u64(updated),
                records_unchanged: to_u64(unchanged),
                records_deleted: to_u64(deleted),
            },
            duration_ms: self.duration_ms.map(to_u64),
            error_message: self.error_message,
            retry_of: self.retry_of,
            cancel_requested: self.cancel_requested,
            owner: self.owner,
            heartbeat_at: parse_ts(&self.heartbeat_at)?,
            started_at: parse_ts(&self.started_at)?,
            finished_at: parse_opt_ts(self.finished_at)?,
        })
    }
}

pub(crate) fn load_run(conn: &Connection, run_id: i64) -> error::Result<Option<SyncRun>> {
    conn.query_row(
        &format!("SELECT {RUN_COLUMNS} FROM sync_runs WHERE id = ?1"),
        [run_id],
        RunRow::from_row,
    )
    .optional()
    .map_err(StateError::backend)?
    .map(RunRow::into_model)
    .transpose()
}

pub(crate) const SNAPSHOT_COLUMNS: &str =
    "id, endpoint_id, captured_at, reason, rules_hash, rules_json";

pub(crate) struct SnapshotRow {
    id: i64,
    endpoint_id: String,
    captured_at: String,
    reason: String,
    rules_hash: String,
    rules_json: String,
}

impl SnapshotRow {
    pub(crate) fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            endpoint_id: row.get(1)?,
            captured_at: row.get(2)?,
            reason: row.get(3)?,
            rules_hash: row.get(4)?,
            rules_json: row.get(5)?,
        })
    }

    pub(crate) fn into_model(self) -> error::Result<MappingVersionSnapshot> {
        let rules: Vec<MappingRule> = serde_json::from_str(&self.rules_json)?;
        Ok(MappingVersionSnapshot {
            id: self.id,
            endpoint_id: EndpointId::new(self.endpoint_id),
            captured_at: parse_ts(&self.captured_at)?,
            reason: parse_enum("reason", &self.reason, SnapshotReason::parse)?,
            rules_hash: self.rules_hash,
            rules,
        })
    }
}

pub(crate) const NORMALIZED_COLUMNS: &str = "id, endpoint_id, scope, external_id, fields_json, \
     last_seen_at, last_seen_batch_id, is_discontinued, updated_at";

pub(crate) struct NormalizedRow {
    id: i64,
    endpoint_id: String,
    scope: String,
    external_id: String,
    fields_json: String,
    last_seen_at: String,
    last_seen_batch_id: String,
    is_discontinued: bool,
    updated_at: String,
}

impl NormalizedRow {
    pub(crate) fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            endpoint_id: row.get(1)?,
            scope: row.get(2)?,
            external_id: row.get(3)?,
            fields_json: row.get(4)?,
            last_seen_at: row.get(5)?,
            last_seen_batch_id: row.get(6)?,
            is_discontinued: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    pub(crate) fn into_model(self) -> error::Result<NormalizedRecord> {
        Ok(NormalizedRecord {
            id: self.id,
            endpoint_id: EndpointId::new(self.endpoint_id),
            natural_key: NaturalKey::new(self.scope, self.external_id),
            fields: serde_json::from_str(&self.fields_json)?,
            last_seen_at: parse_ts(&self.last_seen_at)?,
            last_seen_batch_id: BatchId::new(self.last_seen_batch_id),
            is_discontinued: self.is_discontinued,
            updated_at: parse_ts(&self.updated_at)?,
        })
    }
}

/// Collect mapped rows, converting each through `into_model`.
pub(crate) fn collect_rows<R, T>(
    rows: impl Iterator<Item = rusqlite::Result<R>>,
    into_model: impl Fn(R) -> error::Result<T>,
) -> error::Result<Vec<T>> {
    rows.map(|row| row.map_err(StateError::backend).and_then(&into_model))
        .collect()
}
