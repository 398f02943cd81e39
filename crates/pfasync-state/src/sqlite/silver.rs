use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};

use pfasync_types::dead_letter::DeadLetterKind;
use pfasync_types::ids::{BatchId, EndpointId, Page};
use pfasync_types::lineage::LineageEdge;
use pfasync_types::record::{NaturalKey, NormalizedRecord};

use super::bronze::write_dead_letters;
use super::{
    collect_rows, fmt_ts, now_ts, parse_ts, to_i64, NormalizedRow, SqliteStateBackend,
    NORMALIZED_COLUMNS,
};
use crate::backend::{ChunkOutcome, SilverChunk, SilverStore, SilverWrite};
use crate::error::{self, StateError};

struct Existing {
    id: i64,
    fields_json: String,
    is_discontinued: bool,
}

/// Drop the transform letters earlier commits left for the chunk's raw
/// records, then write the chunk's own.
fn replace_transform_letters(tx: &Transaction<'_>, chunk: &SilverChunk) -> error::Result<u64> {
    let mut stmt = tx
        .prepare(
            "DELETE FROM dead_letters \
             WHERE batch_id = ?1 AND kind = ?2 AND raw_record_id = ?3",
        )
        .map_err(|e| StateError::backend_context("upsert_chunk: prepare letter delete", e))?;
    for row in &chunk.rows {
        stmt.execute(params![
            chunk.batch_id.as_str(),
            DeadLetterKind::Transform.as_str(),
            row.raw_record_id,
        ])
        .map_err(|e| StateError::backend_context("upsert_chunk: delete letters", e))?;
    }
    write_dead_letters(tx, &chunk.rejects)
}

enum Upserted {
    Inserted(i64),
    Updated(i64),
    Unchanged(i64),
}

fn upsert_record(
    tx: &Transaction<'_>,
    chunk: &SilverChunk,
    row: &SilverWrite,
    seen_at: &str,
    now: &str,
) -> error::Result<Upserted> {
    let fields_json = serde_json::to_string(&row.fields)?;
    let existing = tx
        .query_row(
            "SELECT id, fields_json, is_discontinued FROM normalized_records \
             WHERE endpoint_id = ?1 AND scope = ?2 AND external_id = ?3",
            params![chunk.endpoint_id.as_str(), chunk.scope, row.external_id],
            |r| {
                Ok(Existing {
                    id: r.get(0)?,
                    fields_json: r.get(1)?,
                    is_discontinued: r.get(2)?,
                })
            },
        )
        .optional()
        .map_err(StateError::backend)?;

    match existing {
        None => {
            tx.execute(
                "INSERT INTO normalized_records \
                 (endpoint_id, scope, external_id, fields_json, last_seen_at, last_seen_batch_id, \
                  is_discontinued, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)",
                params![
                    chunk.endpoint_id.as_str(),
                    chunk.scope,
                    row.external_id,
                    fields_json,
                    seen_at,
                    chunk.batch_id.as_str(),
                    now,
                ],
            )
            .map_err(|e| StateError::backend_context("upsert_chunk: insert", e))?;
            Ok(Upserted::Inserted(tx.last_insert_rowid()))
        }
        Some(existing) if existing.fields_json != fields_json || existing.is_discontinued => {
            tx.execute(
                "UPDATE normalized_records SET fields_json = ?1, last_seen_at = ?2, \
                 last_seen_batch_id = ?3, is_discontinued = 0, updated_at = ?4 WHERE id = ?5",
                params![fields_json, seen_at, chunk.batch_id.as_str(), now, existing.id],
            )
            .map_err(|e| StateError::backend_context("upsert_chunk: update", e))?;
            Ok(Upserted::Updated(existing.id))
        }
        Some(existing) => {
            tx.execute(
                "UPDATE normalized_records SET last_seen_at = ?1, last_seen_batch_id = ?2 \
                 WHERE id = ?3",
                params![seen_at, chunk.batch_id.as_str(), existing.id],
            )
            .map_err(|e| StateError::backend_context("upsert_chunk: touch", e))?;
            Ok(Upserted::Unchanged(existing.id))
        }
    }
}

/// Overwrite the current edge; log it only when the provenance moved.
fn write_lineage(
    tx: &Transaction<'_>,
    chunk: &SilverChunk,
    normalized_id: i64,
    raw_record_id: i64,
    now: &str,
) -> error::Result<()> {
    let previous: Option<(i64, i64)> = tx
        .query_row(
            "SELECT raw_record_id, mapping_version_id FROM lineage_edges \
             WHERE normalized_record_id = ?1",
            [normalized_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(StateError::backend)?;

    tx.execute(
        "INSERT INTO lineage_edges \
         (normalized_record_id, raw_record_id, batch_id, mapping_version_id, transformed_at, \
          transformed_by) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
         ON CONFLICT (normalized_record_id) DO UPDATE SET \
         raw_record_id = excluded.raw_record_id, batch_id = excluded.batch_id, \
         mapping_version_id = excluded.mapping_version_id, \
         transformed_at = excluded.transformed_at, transformed_by = excluded.transformed_by",
        params![
            normalized_id,
            raw_record_id,
            chunk.batch_id.as_str(),
            chunk.mapping_version_id,
            now,
            chunk.transformed_by,
        ],
    )
    .map_err(|e| StateError::backend_context("upsert_chunk: lineage edge", e))?;

    if previous != Some((raw_record_id, chunk.mapping_version_id)) {
        tx.execute(
            "INSERT INTO lineage_log \
             (normalized_record_id, raw_record_id, batch_id, mapping_version_id, transformed_at, \
              transformed_by) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                normalized_id,
                raw_record_id,
                chunk.batch_id.as_str(),
                chunk.mapping_version_id,
                now,
                chunk.transformed_by,
            ],
        )
        .map_err(|e| StateError::backend_context("upsert_chunk: lineage log", e))?;
    }
    Ok(())
}

type EdgeRow = (i64, i64, String, i64, String, String);

fn edge_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EdgeRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn edge_into_model(row: EdgeRow) -> error::Result<LineageEdge> {
    let (normalized_record_id, raw_record_id, batch_id, mapping_version_id, transformed_at, transformed_by) =
        row;
    Ok(LineageEdge {
        normalized_record_id,
        raw_record_id,
        batch_id: BatchId::new(batch_id),
        mapping_version_id,
        transformed_at: parse_ts(&transformed_at)?,
        transformed_by,
    })
}

fn load_normalized(
    conn: &Connection,
    where_sql: &str,
    args: &[&dyn rusqlite::ToSql],
) -> error::Result<Option<NormalizedRecord>> {
    conn.query_row(
        &format!("SELECT {NORMALIZED_COLUMNS} FROM normalized_records WHERE {where_sql}"),
        args,
        NormalizedRow::from_row,
    )
    .optional()
    .map_err(StateError::backend)?
    .map(NormalizedRow::into_model)
    .transpose()
}

impl SilverStore for SqliteStateBackend {
    fn upsert_chunk(&self, chunk: &SilverChunk) -> error::Result<ChunkOutcome> {
        let conn = self.lock_conn()?;
        let tx = Transaction::new_unchecked(&conn, TransactionBehavior::Immediate)
            .map_err(|e| StateError::backend_context("upsert_chunk: begin tx", e))?;
        let seen_at = fmt_ts(&chunk.seen_at);
        let now = now_ts();

        let mut outcome = ChunkOutcome::default();
        for row in &chunk.rows {
            let normalized_id = match upsert_record(&tx, chunk, row, &seen_at, &now)? {
                Upserted::Inserted(id) => {
                    outcome.inserted += 1;
                    id
                }
                Upserted::Updated(id) => {
                    outcome.updated += 1;
                    id
                }
                Upserted::Unchanged(id) => {
                    outcome.unchanged += 1;
                    id
                }
            };
            write_lineage(&tx, chunk, normalized_id, row.raw_record_id, &now)?;
        }
        outcome.dead_letters = replace_transform_letters(&tx, chunk)?;

        if let Some(run_id) = chunk.run_id {
            tx.execute(
                "UPDATE sync_runs SET records_inserted = records_inserted + ?1, \
                 records_updated = records_updated + ?2, \
                 records_unchanged = records_unchanged + ?3 WHERE id = ?4",
                params![
                    to_i64(outcome.inserted),
                    to_i64(outcome.updated),
                    to_i64(outcome.unchanged),
                    run_id,
                ],
            )
            .map_err(|e| StateError::backend_context("upsert_chunk: run counters", e))?;
        }

        tx.commit()
            .map_err(|e| StateError::backend_context("upsert_chunk: commit", e))?;
        Ok(outcome)
    }

    fn get_normalized(&self, id: i64) -> error::Result<Option<NormalizedRecord>> {
        let conn = self.lock_conn()?;
        load_normalized(&conn, "id = ?1", &[&id])
    }

    fn get_normalized_by_key(
        &self,
        endpoint: &EndpointId,
        key: &NaturalKey,
    ) -> error::Result<Option<NormalizedRecord>> {
        let conn = self.lock_conn()?;
        load_normalized(
            &conn,
            "endpoint_id = ?1 AND scope = ?2 AND external_id = ?3",
            &[&endpoint.as_str(), &key.scope, &key.external_id],
        )
    }

    fn list_normalized(
        &self,
        endpoint: &EndpointId,
        scope: &str,
        page: Page,
    ) -> error::Result<Vec<NormalizedRecord>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {NORMALIZED_COLUMNS} FROM normalized_records \
                 WHERE endpoint_id = ?1 AND scope = ?2 ORDER BY id LIMIT ?3 OFFSET ?4"
            ))
            .map_err(StateError::backend)?;
        let rows = stmt
            .query_map(
                params![endpoint.as_str(), scope, page.limit, page.offset],
                NormalizedRow::from_row,
            )
            .map_err(StateError::backend)?;
        collect_rows(rows, NormalizedRow::into_model)
    }

    fn discontinue_unseen(
        &self,
        endpoint: &EndpointId,
        scope: &str,
        batch_id: &BatchId,
        run_id: Option<i64>,
    ) -> error::Result<u64> {
        let conn = self.lock_conn()?;
        let tx = Transaction::new_unchecked(&conn, TransactionBehavior::Immediate)
            .map_err(|e| StateError::backend_context("discontinue_unseen: begin tx", e))?;
        let flagged = tx
            .execute(
                "UPDATE normalized_records SET is_discontinued = 1, updated_at = ?1 \
                 WHERE endpoint_id = ?2 AND scope = ?3 AND is_discontinued = 0 \
                 AND last_seen_batch_id != ?4",
                params![now_ts(), endpoint.as_str(), scope, batch_id.as_str()],
            )
            .map_err(|e| StateError::backend_context("discontinue_unseen: flag", e))?;
        let flagged = flagged as u64;
        if let Some(run_id) = run_id {
            tx.execute(
                "UPDATE sync_runs SET records_deleted = records_deleted + ?1 WHERE id = ?2",
                params![to_i64(flagged), run_id],
            )
            .map_err(|e| StateError::backend_context("discontinue_unseen: run counters", e))?;
        }
        tx.commit()
            .map_err(|e| StateError::backend_context("discontinue_unseen: commit", e))?;
        Ok(flagged)
    }

    fn list_discontinued(&self, scope: &str, page: Page) -> error::Result<Vec<NormalizedRecord>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {NORMALIZED_COLUMNS} FROM normalized_records \
                 WHERE scope = ?1 AND is_discontinued = 1 ORDER BY id LIMIT ?2 OFFSET ?3"
            ))
            .map_err(StateError::backend)?;
        let rows = stmt
            .query_map(params![scope, page.limit, page.offset], NormalizedRow::from_row)
            .map_err(StateError::backend)?;
        collect_rows(rows, NormalizedRow::into_model)
    }

    fn restore_discontinued(&self, ids: &[i64]) -> error::Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let conn = self.lock_conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| StateError::backend_context("restore_discontinued: begin tx", e))?;
        let now = now_ts();
        let mut restored = 0u64;
        {
            let mut stmt = tx
                .prepare(
                    "UPDATE normalized_records SET is_discontinued = 0, last_seen_at = ?1, \
                     updated_at = ?1 WHERE id = ?2 AND is_discontinued = 1",
                )
                .map_err(|e| StateError::backend_context("restore_discontinued: prepare", e))?;
            for id in ids {
                restored += stmt
                    .execute(params![now, id])
                    .map_err(|e| StateError::backend_context("restore_discontinued: execute", e))?
                    as u64;
            }
        }
        tx.commit()
            .map_err(|e| StateError::backend_context("restore_discontinued: commit", e))?;
        Ok(restored)
    }

    fn lineage_edge(&self, normalized_record_id: i64) -> error::Result<Option<LineageEdge>> {
        let conn = self.lock_conn()?;
        conn.query_row(
            "SELECT normalized_record_id, raw_record_id, batch_id, mapping_version_id, \
             transformed_at, transformed_by FROM lineage_edges WHERE normalized_record_id = ?1",
            [normalized_record_id],
            edge_from_row,
        )
        .optional()
        .map_err(StateError::backend)?
        .map(edge_into_model)
        .transpose()
    }

    fn lineage_history(&self, normalized_record_id: i64) -> error::Result<Vec<LineageEdge>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT normalized_record_id, raw_record_id, batch_id, mapping_version_id, \
                 transformed_at, transformed_by FROM lineage_log \
                 WHERE normalized_record_id = ?1 ORDER BY id",
            )
            .map_err(StateError::backend)?;
        let rows = stmt
            .query_map([normalized_record_id], edge_from_row)
            .map_err(StateError::backend)?;
        collect_rows(rows, edge_into_model)
    }
}
