use rusqlite::{params, OptionalExtension, Transaction, TransactionBehavior};

use pfasync_types::batch::{Batch, HistoryFilter, RawRecord};
use pfasync_types::dead_letter::{DeadLetter, DeadLetterKind};
use pfasync_types::ids::{BatchId, EndpointId, Page};
use pfasync_types::run::RunStatus;

use super::{
    collect_rows, fmt_ts, load_batch, now_ts, parse_enum, parse_ts, to_i64, BatchRow, RawRow,
    SqliteStateBackend, BATCH_COLUMNS, RAW_COLUMNS,
};
use crate::backend::{BronzeStore, PageWrite};
use crate::error::{self, StateError};

/// Fails unless the batch exists and is still open.
fn ensure_open(conn: &rusqlite::Connection, batch_id: &BatchId) -> error::Result<()> {
    let completed: Option<Option<String>> = conn
        .query_row(
            "SELECT completed_at FROM batches WHERE id = ?1",
            [batch_id.as_str()],
            |row| row.get(0),
        )
        .optional()
        .map_err(StateError::backend)?;
    match completed {
        None => Err(StateError::NotFound(format!("batch {batch_id}"))),
        Some(Some(_)) => Err(StateError::Conflict(format!("batch {batch_id} is sealed"))),
        Some(None) => Ok(()),
    }
}

/// Fails unless the run is still `in_progress`; a run failed by recovery
/// must not grow its batch.
fn ensure_running(conn: &rusqlite::Connection, run_id: i64) -> error::Result<()> {
    let status: Option<String> = conn
        .query_row("SELECT status FROM sync_runs WHERE id = ?1", [run_id], |row| {
            row.get(0)
        })
        .optional()
        .map_err(StateError::backend)?;
    match status.as_deref().map(|raw| parse_enum("status", raw, RunStatus::parse)) {
        None => Err(StateError::NotFound(format!("run {run_id}"))),
        Some(Ok(RunStatus::InProgress)) => Ok(()),
        Some(Ok(other)) => Err(StateError::Conflict(format!("run {run_id} is {other}"))),
        Some(Err(err)) => Err(err),
    }
}

pub(super) fn write_dead_letters(
    tx: &Transaction<'_>,
    records: &[DeadLetter],
) -> error::Result<u64> {
    let mut stmt = tx
        .prepare(
            "INSERT INTO dead_letters \
             (batch_id, run_id, raw_record_id, record_json, error_message, kind, failed_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .map_err(|e| StateError::backend_context("write_dead_letters: prepare", e))?;
    let mut count = 0u64;
    for record in records {
        stmt.execute(params![
            record.batch_id.as_str(),
            record.run_id,
            record.raw_record_id,
            record.record_json,
            record.error_message,
            record.kind.as_str(),
            fmt_ts(&record.failed_at),
        ])
        .map_err(|e| StateError::backend_context("write_dead_letters: execute", e))?;
        count += 1;
    }
    Ok(count)
}

/// Append to one of the batch's JSON message lists.
pub(super) fn push_messages(
    tx: &Transaction<'_>,
    batch_id: &BatchId,
    column: &str,
    messages: &[String],
) -> error::Result<()> {
    if messages.is_empty() {
        return Ok(());
    }
    let raw: String = tx
        .query_row(
            &format!("SELECT {column} FROM batches WHERE id = ?1"),
            [batch_id.as_str()],
            |row| row.get(0),
        )
        .map_err(StateError::backend)?;
    let mut existing: Vec<String> = serde_json::from_str(&raw)?;
    existing.extend(messages.iter().cloned());
    tx.execute(
        &format!("UPDATE batches SET {column} = ?1 WHERE id = ?2"),
        params![serde_json::to_string(&existing)?, batch_id.as_str()],
    )
    .map_err(StateError::backend)?;
    Ok(())
}

impl BronzeStore for SqliteStateBackend {
    fn append_page(&self, page: &PageWrite<'_>) -> error::Result<u64> {
        let conn = self.lock_conn()?;
        let tx = Transaction::new_unchecked(&conn, TransactionBehavior::Immediate)
            .map_err(|e| StateError::backend_context("append_page: begin tx", e))?;
        ensure_open(&tx, page.batch_id)?;
        ensure_running(&tx, page.run_id)?;

        let now = now_ts();
        let mut count = 0u64;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO raw_records \
                     (batch_id, external_id, payload_json, ingested_at, schema_version, entity_type) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )
                .map_err(|e| StateError::backend_context("append_page: prepare", e))?;
            for record in page.records {
                stmt.execute(params![
                    page.batch_id.as_str(),
                    record.external_id,
                    serde_json::to_string(&record.payload)?,
                    now,
                    record.schema_version,
                    page.entity_type,
                ])
                .map_err(|e| StateError::backend_context("append_page: insert raw", e))?;
                count += 1;
            }
        }
        write_dead_letters(&tx, page.rejects)?;
        push_messages(&tx, page.batch_id, "warnings_json", page.warnings)?;

        tx.execute(
            "UPDATE batches SET record_count = record_count + ?1 WHERE id = ?2",
            params![to_i64(count), page.batch_id.as_str()],
        )
        .map_err(|e| StateError::backend_context("append_page: batch count", e))?;
        tx.execute(
            "UPDATE sync_runs SET records_processed = records_processed + ?1 WHERE id = ?2",
            params![to_i64(count), page.run_id],
        )
        .map_err(|e| StateError::backend_context("append_page: run progress", e))?;

        tx.commit()
            .map_err(|e| StateError::backend_context("append_page: commit", e))?;
        Ok(count)
    }

    fn seal_batch(&self, batch_id: &BatchId, fingerprint: &str) -> error::Result<Batch> {
        let conn = self.lock_conn()?;
        let changed = conn
            .execute(
                "UPDATE batches SET completed_at = ?1, schema_fingerprint = ?2 \
                 WHERE id = ?3 AND completed_at IS NULL",
                params![now_ts(), fingerprint, batch_id.as_str()],
            )
            .map_err(|e| StateError::backend_context("seal_batch", e))?;
        if changed == 0 {
            ensure_open(&conn, batch_id)?;
        }
        load_batch(&conn, batch_id.as_str())?
            .ok_or_else(|| StateError::NotFound(format!("batch {batch_id}")))
    }

    fn add_batch_error(&self, batch_id: &BatchId, message: &str) -> error::Result<()> {
        let conn = self.lock_conn()?;
        let tx = Transaction::new_unchecked(&conn, TransactionBehavior::Immediate)
            .map_err(|e| StateError::backend_context("add_batch_error: begin tx", e))?;
        if ensure_open(&tx, batch_id).is_err() {
            return Ok(());
        }
        push_messages(&tx, batch_id, "errors_json", &[message.to_string()])?;
        tx.commit()
            .map_err(|e| StateError::backend_context("add_batch_error: commit", e))?;
        Ok(())
    }

    fn get_batch(&self, batch_id: &BatchId) -> error::Result<Option<Batch>> {
        let conn = self.lock_conn()?;
        load_batch(&conn, batch_id.as_str())
    }

    fn list_batches(&self, filter: &HistoryFilter, page: Page) -> error::Result<Vec<Batch>> {
        let mut clauses = Vec::new();
        let mut args: Vec<String> = Vec::new();
        if let Some(endpoint) = &filter.endpoint_id {
            args.push(endpoint.as_str().to_string());
            clauses.push(format!("endpoint_id = ?{}", args.len()));
        }
        if let Some(sync_type) = filter.sync_type {
            args.push(sync_type.as_str().to_string());
            clauses.push(format!("sync_type = ?{}", args.len()));
        }
        if filter.sealed_only {
            clauses.push("completed_at IS NOT NULL".to_string());
        }
        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let sql = format!(
            "SELECT {BATCH_COLUMNS} FROM batches {where_sql} \
             ORDER BY ingested_at DESC, rowid DESC LIMIT {} OFFSET {}",
            page.limit, page.offset
        );

        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(&sql).map_err(StateError::backend)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(args.iter()), BatchRow::from_row)
            .map_err(StateError::backend)?;
        collect_rows(rows, BatchRow::into_model)
    }

    fn latest_sealed_batches(
        &self,
        endpoint: &EndpointId,
        limit: u32,
    ) -> error::Result<Vec<Batch>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {BATCH_COLUMNS} FROM batches \
                 WHERE endpoint_id = ?1 AND completed_at IS NOT NULL \
                 ORDER BY completed_at DESC, rowid DESC LIMIT ?2"
            ))
            .map_err(StateError::backend)?;
        let rows = stmt
            .query_map(params![endpoint.as_str(), limit], BatchRow::from_row)
            .map_err(StateError::backend)?;
        collect_rows(rows, BatchRow::into_model)
    }

    fn raw_records(&self, batch_id: &BatchId, page: Page) -> error::Result<Vec<RawRecord>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {RAW_COLUMNS} FROM raw_records WHERE batch_id = ?1 \
                 ORDER BY id LIMIT ?2 OFFSET ?3"
            ))
            .map_err(StateError::backend)?;
        let rows = stmt
            .query_map(
                params![batch_id.as_str(), page.limit, page.offset],
                RawRow::from_row,
            )
            .map_err(StateError::backend)?;
        collect_rows(rows, RawRow::into_model)
    }

    fn raw_records_after(
        &self,
        batch_id: &BatchId,
        after_id: i64,
        limit: u32,
    ) -> error::Result<Vec<RawRecord>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {RAW_COLUMNS} FROM raw_records WHERE batch_id = ?1 AND id > ?2 \
                 ORDER BY id LIMIT ?3"
            ))
            .map_err(StateError::backend)?;
        let rows = stmt
            .query_map(params![batch_id.as_str(), after_id, limit], RawRow::from_row)
            .map_err(StateError::backend)?;
        collect_rows(rows, RawRow::into_model)
    }

    fn get_raw_record(&self, id: i64) -> error::Result<Option<RawRecord>> {
        let conn = self.lock_conn()?;
        conn.query_row(
            &format!("SELECT {RAW_COLUMNS} FROM raw_records WHERE id = ?1"),
            [id],
            RawRow::from_row,
        )
        .optional()
        .map_err(StateError::backend)?
        .map(RawRow::into_model)
        .transpose()
    }

    fn dead_letters(&self, batch_id: &BatchId, page: Page) -> error::Result<Vec<DeadLetter>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT batch_id, run_id, raw_record_id, record_json, error_message, kind, failed_at \
                 FROM dead_letters WHERE batch_id = ?1 ORDER BY id LIMIT ?2 OFFSET ?3",
            )
            .map_err(StateError::backend)?;
        let rows = stmt
            .query_map(params![batch_id.as_str(), page.limit, page.offset], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<i64>>(1)?,
                    row.get::<_, Option<i64>>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })
            .map_err(StateError::backend)?;
        collect_rows(rows, |(batch, run_id, raw_record_id, record_json, error_message, kind, failed_at)| {
            Ok(DeadLetter {
                batch_id: BatchId::new(batch),
                run_id,
                raw_record_id,
                record_json,
                error_message,
                kind: parse_enum("dead letter kind", &kind, DeadLetterKind::parse)?,
                failed_at: parse_ts(&failed_at)?,
            })
        })
    }
}
