use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Transaction, TransactionBehavior};

use pfasync_types::ids::{BatchId, EndpointId};
use pfasync_types::run::{RunCounters, RunPhase, RunStatus, SyncRun};

use super::bronze::push_messages;
use super::{
    collect_rows, fmt_ts, load_run, now_ts, to_i64, RunRow, SqliteStateBackend, RUN_COLUMNS,
};
use crate::backend::{BeginRun, NewRun, RunStore, SlotHolder};
use crate::error::{self, StateError};

impl RunStore for SqliteStateBackend {
    fn begin_run(&self, run: &NewRun) -> error::Result<BeginRun> {
        let conn = self.lock_conn()?;
        let tx = Transaction::new_unchecked(&conn, TransactionBehavior::Immediate)
            .map_err(|e| StateError::backend_context("begin_run: begin tx", e))?;
        let now = now_ts();

        if let Some(holder) = slot_holder(&tx, &run.endpoint_id, &now)? {
            return Ok(BeginRun::Busy(holder));
        }

        tx.execute(
            "INSERT INTO batches (id, endpoint_id, scope, sync_type, ingested_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                run.batch_id.as_str(),
                run.endpoint_id.as_str(),
                run.scope,
                run.sync_type.as_str(),
                now,
            ],
        )
        .map_err(|e| StateError::backend_context("begin_run: open batch", e))?;
        tx.execute(
            "INSERT INTO sync_runs \
             (endpoint_id, batch_id, sync_type, status, phase, retry_of, owner, heartbeat_at, \
              started_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
            params![
                run.endpoint_id.as_str(),
                run.batch_id.as_str(),
                run.sync_type.as_str(),
                RunStatus::InProgress.as_str(),
                RunPhase::Fetching.as_str(),
                run.retry_of,
                run.owner,
                now,
            ],
        )
        .map_err(|e| StateError::backend_context("begin_run: insert run", e))?;
        let run_id = tx.last_insert_rowid();

        let claimed = tx
            .execute(
                "UPDATE endpoint_runs SET active_run_id = ?1, updated_at = ?2 \
                 WHERE endpoint_id = ?3 AND active_run_id IS NULL AND lock_holder IS NULL",
                params![run_id, now, run.endpoint_id.as_str()],
            )
            .map_err(|e| StateError::backend_context("begin_run: claim slot", e))?;
        if claimed == 0 {
            return Err(StateError::Conflict(format!(
                "endpoint {} slot changed during claim",
                run.endpoint_id
            )));
        }

        tx.commit()
            .map_err(|e| StateError::backend_context("begin_run: commit", e))?;
        Ok(BeginRun::Started { run_id })
    }

    fn get_run(&self, run_id: i64) -> error::Result<Option<SyncRun>> {
        let conn = self.lock_conn()?;
        load_run(&conn, run_id)
    }

    fn get_run_by_batch(&self, batch_id: &BatchId) -> error::Result<Option<SyncRun>> {
        let conn = self.lock_conn()?;
        conn.query_row(
            &format!("SELECT {RUN_COLUMNS} FROM sync_runs WHERE batch_id = ?1"),
            [batch_id.as_str()],
            RunRow::from_row,
        )
        .optional()
        .map_err(StateError::backend)?
        .map(RunRow::into_model)
        .transpose()
    }

    fn set_run_phase(&self, run_id: i64, phase: RunPhase) -> error::Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "UPDATE sync_runs SET phase = ?1 WHERE id = ?2",
            params![phase.as_str(), run_id],
        )
        .map_err(|e| StateError::backend_context("set_run_phase", e))?;
        Ok(())
    }

    fn add_run_counters(&self, run_id: i64, delta: &RunCounters) -> error::Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "UPDATE sync_runs SET \
             records_processed = records_processed + ?1, \
             records_inserted = records_inserted + ?2, \
             records_updated = records_updated + ?3, \
             records_unchanged = records_unchanged + ?4, \
             records_deleted = records_deleted + ?5 \
             WHERE id = ?6",
            params![
                to_i64(delta.records_processed),
                to_i64(delta.records_inserted),
                to_i64(delta.records_updated),
                to_i64(delta.records_unchanged),
                to_i64(delta.records_deleted),
                run_id,
            ],
        )
        .map_err(|e| StateError::backend_context("add_run_counters", e))?;
        Ok(())
    }

    fn request_cancel(&self, run_id: i64) -> error::Result<bool> {
        let conn = self.lock_conn()?;
        let changed = conn
            .execute(
                "UPDATE sync_runs SET cancel_requested = 1 WHERE id = ?1 AND status = ?2",
                params![run_id, RunStatus::InProgress.as_str()],
            )
            .map_err(|e| StateError::backend_context("request_cancel", e))?;
        Ok(changed > 0)
    }

    fn is_cancel_requested(&self, run_id: i64) -> error::Result<bool> {
        let conn = self.lock_conn()?;
        conn.query_row(
            "SELECT cancel_requested FROM sync_runs WHERE id = ?1",
            [run_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(StateError::backend)?
        .ok_or_else(|| StateError::NotFound(format!("run {run_id}")))
    }

    fn finish_run(
        &self,
        run_id: i64,
        status: RunStatus,
        error_message: Option<&str>,
    ) -> error::Result<SyncRun> {
        if !status.is_terminal() {
            return Err(StateError::Conflict(format!(
                "run {run_id} cannot finish as {status}"
            )));
        }
        let conn = self.lock_conn()?;
        let tx = Transaction::new_unchecked(&conn, TransactionBehavior::Immediate)
            .map_err(|e| StateError::backend_context("finish_run: begin tx", e))?;
        let run = load_run(&tx, run_id)?
            .ok_or_else(|| StateError::NotFound(format!("run {run_id}")))?;
        if run.status.is_terminal() {
            return Err(StateError::Conflict(format!(
                "run {run_id} already finished as {}",
                run.status
            )));
        }
        let finished = finish_in(&tx, &run, status, error_message)?;
        tx.commit()
            .map_err(|e| StateError::backend_context("finish_run: commit", e))?;
        Ok(finished)
    }

    fn active_run(&self, endpoint: &EndpointId) -> error::Result<Option<i64>> {
        let conn = self.lock_conn()?;
        let slot: Option<Option<i64>> = conn
            .query_row(
                "SELECT active_run_id FROM endpoint_runs WHERE endpoint_id = ?1",
                [endpoint.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(StateError::backend)?;
        Ok(slot.flatten())
    }

    fn runs_in_progress(&self) -> error::Result<Vec<SyncRun>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {RUN_COLUMNS} FROM sync_runs WHERE status = ?1 ORDER BY id"
            ))
            .map_err(StateError::backend)?;
        let rows = stmt
            .query_map([RunStatus::InProgress.as_str()], RunRow::from_row)
            .map_err(StateError::backend)?;
        collect_rows(rows, RunRow::into_model)
    }

    fn heartbeat_run(&self, run_id: i64, owner: &str) -> error::Result<bool> {
        let conn = self.lock_conn()?;
        let changed = conn
            .execute(
                "UPDATE sync_runs SET heartbeat_at = ?1 \
                 WHERE id = ?2 AND owner = ?3 AND status = ?4",
                params![now_ts(), run_id, owner, RunStatus::InProgress.as_str()],
            )
            .map_err(|e| StateError::backend_context("heartbeat_run", e))?;
        Ok(changed > 0)
    }

    fn stale_runs(&self, stale_before: DateTime<Utc>) -> error::Result<Vec<SyncRun>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {RUN_COLUMNS} FROM sync_runs \
                 WHERE status = ?1 AND heartbeat_at < ?2 ORDER BY id"
            ))
            .map_err(StateError::backend)?;
        let rows = stmt
            .query_map(
                params![RunStatus::InProgress.as_str(), fmt_ts(&stale_before)],
                RunRow::from_row,
            )
            .map_err(StateError::backend)?;
        collect_rows(rows, RunRow::into_model)
    }

    fn fail_stale_run(
        &self,
        run_id: i64,
        stale_before: DateTime<Utc>,
        message: &str,
    ) -> error::Result<Option<SyncRun>> {
        let conn = self.lock_conn()?;
        let tx = Transaction::new_unchecked(&conn, TransactionBehavior::Immediate)
            .map_err(|e| StateError::backend_context("fail_stale_run: begin tx", e))?;
        let Some(run) = load_run(&tx, run_id)? else {
            return Ok(None);
        };
        if run.status != RunStatus::InProgress || run.heartbeat_at >= stale_before {
            return Ok(None);
        }

        let completed_at: Option<String> = tx
            .query_row(
                "SELECT completed_at FROM batches WHERE id = ?1",
                [run.batch_id.as_str()],
                |row| row.get(0),
            )
            .map_err(|e| StateError::backend_context("fail_stale_run: load batch", e))?;
        if completed_at.is_none() {
            push_messages(&tx, &run.batch_id, "errors_json", &[message.to_string()])?;
        }
        let failed = finish_in(&tx, &run, RunStatus::Error, Some(message))?;
        tx.commit()
            .map_err(|e| StateError::backend_context("fail_stale_run: commit", e))?;
        Ok(Some(failed))
    }

    fn lock_endpoint(
        &self,
        endpoint: &EndpointId,
        holder: &str,
    ) -> error::Result<Option<SlotHolder>> {
        let conn = self.lock_conn()?;
        let tx = Transaction::new_unchecked(&conn, TransactionBehavior::Immediate)
            .map_err(|e| StateError::backend_context("lock_endpoint: begin tx", e))?;
        let now = now_ts();
        if let Some(current) = slot_holder(&tx, endpoint, &now)? {
            return Ok(Some(current));
        }
        tx.execute(
            "UPDATE endpoint_runs SET lock_holder = ?1, locked_at = ?2, updated_at = ?2 \
             WHERE endpoint_id = ?3 AND active_run_id IS NULL AND lock_holder IS NULL",
            params![holder, now, endpoint.as_str()],
        )
        .map_err(|e| StateError::backend_context("lock_endpoint: claim", e))?;
        tx.commit()
            .map_err(|e| StateError::backend_context("lock_endpoint: commit", e))?;
        Ok(None)
    }

    fn refresh_endpoint_lock(&self, endpoint: &EndpointId, holder: &str) -> error::Result<bool> {
        let conn = self.lock_conn()?;
        let changed = conn
            .execute(
                "UPDATE endpoint_runs SET locked_at = ?1 \
                 WHERE endpoint_id = ?2 AND lock_holder = ?3",
                params![now_ts(), endpoint.as_str(), holder],
            )
            .map_err(|e| StateError::backend_context("refresh_endpoint_lock", e))?;
        Ok(changed > 0)
    }

    fn unlock_endpoint(&self, endpoint: &EndpointId, holder: &str) -> error::Result<bool> {
        let conn = self.lock_conn()?;
        let changed = conn
            .execute(
                "UPDATE endpoint_runs SET lock_holder = NULL, locked_at = NULL, updated_at = ?1 \
                 WHERE endpoint_id = ?2 AND lock_holder = ?3",
                params![now_ts(), endpoint.as_str(), holder],
            )
            .map_err(|e| StateError::backend_context("unlock_endpoint", e))?;
        Ok(changed > 0)
    }

    fn release_stale_locks(
        &self,
        stale_before: DateTime<Utc>,
    ) -> error::Result<Vec<(EndpointId, String)>> {
        let conn = self.lock_conn()?;
        let tx = Transaction::new_unchecked(&conn, TransactionBehavior::Immediate)
            .map_err(|e| StateError::backend_context("release_stale_locks: begin tx", e))?;
        let cutoff = fmt_ts(&stale_before);
        let stale: Vec<(String, String)> = {
            let mut stmt = tx
                .prepare(
                    "SELECT endpoint_id, lock_holder FROM endpoint_runs \
                     WHERE lock_holder IS NOT NULL AND locked_at < ?1 ORDER BY endpoint_id",
                )
                .map_err(StateError::backend)?;
            let rows = stmt
                .query_map([&cutoff], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })
                .map_err(StateError::backend)?;
            collect_rows(rows, Ok)?
        };
        tx.execute(
            "UPDATE endpoint_runs SET lock_holder = NULL, locked_at = NULL, updated_at = ?1 \
             WHERE lock_holder IS NOT NULL AND locked_at < ?2",
            params![now_ts(), cutoff],
        )
        .map_err(|e| StateError::backend_context("release_stale_locks: update", e))?;
        tx.commit()
            .map_err(|e| StateError::backend_context("release_stale_locks: commit", e))?;
        Ok(stale
            .into_iter()
            .map(|(endpoint, holder)| (EndpointId::new(endpoint), holder))
            .collect())
    }
}

/// Ensure the registry row exists and report who holds the slot, if anyone.
fn slot_holder(
    tx: &Transaction<'_>,
    endpoint: &EndpointId,
    now: &str,
) -> error::Result<Option<SlotHolder>> {
    tx.execute(
        "INSERT OR IGNORE INTO endpoint_runs (endpoint_id, active_run_id, updated_at) \
         VALUES (?1, NULL, ?2)",
        params![endpoint.as_str(), now],
    )
    .map_err(|e| StateError::backend_context("slot_holder: registry row", e))?;
    let (active, lock): (Option<i64>, Option<String>) = tx
        .query_row(
            "SELECT active_run_id, lock_holder FROM endpoint_runs WHERE endpoint_id = ?1",
            [endpoint.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .map_err(StateError::backend)?;
    Ok(active.map(SlotHolder::Run).or(lock.map(SlotHolder::Lock)))
}

/// Move `run` to a terminal status and release its endpoint slot.
fn finish_in(
    tx: &Transaction<'_>,
    run: &SyncRun,
    status: RunStatus,
    error_message: Option<&str>,
) -> error::Result<SyncRun> {
    let finished_at = Utc::now();
    let duration_ms = (finished_at - run.started_at).num_milliseconds().max(0);
    let phase = if status == RunStatus::Success {
        RunPhase::Done
    } else {
        run.phase
    };
    tx.execute(
        "UPDATE sync_runs SET status = ?1, phase = ?2, error_message = ?3, \
         finished_at = ?4, duration_ms = ?5 WHERE id = ?6",
        params![
            status.as_str(),
            phase.as_str(),
            error_message,
            fmt_ts(&finished_at),
            duration_ms,
            run.id,
        ],
    )
    .map_err(|e| StateError::backend_context("finish_run: update run", e))?;
    tx.execute(
        "UPDATE endpoint_runs SET active_run_id = NULL, updated_at = ?1 \
         WHERE endpoint_id = ?2 AND active_run_id = ?3",
        params![fmt_ts(&finished_at), run.endpoint_id.as_str(), run.id],
    )
    .map_err(|e| StateError::backend_context("finish_run: release slot", e))?;
    load_run(tx, run.id)?.ok_or_else(|| StateError::NotFound(format!("run {}", run.id)))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pfasync_types::batch::SyncType;

    use super::super::test_support::{endpoint, open_run};
    use super::*;
    use crate::backend::BronzeStore;

    fn new_run(batch: &str) -> NewRun {
        NewRun {
            endpoint_id: endpoint(),
            batch_id: BatchId::new(batch),
            scope: "org-1".into(),
            sync_type: SyncType::Full,
            retry_of: None,
            owner: "worker-a".into(),
        }
    }

    #[test]
    fn begin_run_opens_batch_and_claims_slot() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        let (run_id, batch_id) = open_run(&backend, "b-1", SyncType::Full);

        let run = backend.get_run(run_id).unwrap().unwrap();
        assert_eq!(run.status, RunStatus::InProgress);
        assert_eq!(run.phase, RunPhase::Fetching);
        assert_eq!(run.batch_id, batch_id);
        assert!(backend.get_batch(&batch_id).unwrap().is_some());
        assert_eq!(backend.active_run(&endpoint()).unwrap(), Some(run_id));
    }

    #[test]
    fn second_begin_is_busy_and_writes_nothing() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        let (run_id, _) = open_run(&backend, "b-1", SyncType::Full);

        let outcome = backend.begin_run(&new_run("b-2")).unwrap();
        assert_eq!(outcome, BeginRun::Busy(SlotHolder::Run(run_id)));
        assert!(backend.get_batch(&BatchId::new("b-2")).unwrap().is_none());
        assert_eq!(backend.runs_in_progress().unwrap().len(), 1);
    }

    #[test]
    fn finish_releases_slot_and_is_final() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        let (run_id, _) = open_run(&backend, "b-1", SyncType::Full);

        let done = backend.finish_run(run_id, RunStatus::Success, None).unwrap();
        assert_eq!(done.status, RunStatus::Success);
        assert_eq!(done.phase, RunPhase::Done);
        assert!(done.finished_at.is_some());
        assert!(done.duration_ms.is_some());
        assert_eq!(backend.active_run(&endpoint()).unwrap(), None);

        let again = backend.finish_run(run_id, RunStatus::Error, Some("late"));
        assert!(matches!(again, Err(StateError::Conflict(_))));
        assert!(matches!(
            backend.begin_run(&new_run("b-2")).unwrap(),
            BeginRun::Started { .. }
        ));
    }

    #[test]
    fn finish_rejects_non_terminal_status() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        let (run_id, _) = open_run(&backend, "b-1", SyncType::Full);
        let err = backend.finish_run(run_id, RunStatus::InProgress, None);
        assert!(matches!(err, Err(StateError::Conflict(_))));
    }

    #[test]
    fn cancel_flag_only_for_running_runs() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        let (run_id, _) = open_run(&backend, "b-1", SyncType::Full);
        assert!(!backend.is_cancel_requested(run_id).unwrap());
        assert!(backend.request_cancel(run_id).unwrap());
        assert!(backend.is_cancel_requested(run_id).unwrap());

        backend
            .finish_run(run_id, RunStatus::Cancelled, Some("cancelled by operator"))
            .unwrap();
        assert!(!backend.request_cancel(run_id).unwrap());
        assert!(matches!(
            backend.is_cancel_requested(999),
            Err(StateError::NotFound(_))
        ));
    }

    #[test]
    fn counters_and_phase_accumulate() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        let (run_id, batch_id) = open_run(&backend, "b-1", SyncType::Full);
        backend.set_run_phase(run_id, RunPhase::Transforming).unwrap();
        let delta = RunCounters {
            records_inserted: 2,
            records_unchanged: 1,
            ..RunCounters::default()
        };
        backend.add_run_counters(run_id, &delta).unwrap();
        backend.add_run_counters(run_id, &delta).unwrap();

        let run = backend.get_run_by_batch(&batch_id).unwrap().unwrap();
        assert_eq!(run.phase, RunPhase::Transforming);
        assert_eq!(run.counters.records_inserted, 4);
        assert_eq!(run.counters.records_unchanged, 2);
    }

    #[test]
    fn concurrent_begins_admit_exactly_one() {
        let backend = Arc::new(SqliteStateBackend::in_memory().unwrap());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let backend = Arc::clone(&backend);
                std::thread::spawn(move || backend.begin_run(&new_run(&format!("b-{i}"))).unwrap())
            })
            .collect();
        let started = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|outcome| matches!(outcome, BeginRun::Started { .. }))
            .count();
        assert_eq!(started, 1);
    }

    #[test]
    fn heartbeat_requires_owner_and_running_status() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        let BeginRun::Started { run_id } = backend.begin_run(&new_run("b-1")).unwrap() else {
            panic!("slot busy");
        };
        let started = backend.get_run(run_id).unwrap().unwrap();
        assert_eq!(started.owner, "worker-a");

        assert!(backend.heartbeat_run(run_id, "worker-a").unwrap());
        assert!(!backend.heartbeat_run(run_id, "worker-b").unwrap());
        let beat = backend.get_run(run_id).unwrap().unwrap();
        assert!(beat.heartbeat_at >= started.heartbeat_at);

        backend.finish_run(run_id, RunStatus::Success, None).unwrap();
        assert!(!backend.heartbeat_run(run_id, "worker-a").unwrap());
    }

    #[test]
    fn only_runs_past_the_lease_are_failed() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        let BeginRun::Started { run_id } = backend.begin_run(&new_run("b-1")).unwrap() else {
            panic!("slot busy");
        };
        let run = backend.get_run(run_id).unwrap().unwrap();

        let fresh_cutoff = run.heartbeat_at - chrono::Duration::seconds(1);
        assert!(backend.stale_runs(fresh_cutoff).unwrap().is_empty());
        assert!(backend
            .fail_stale_run(run_id, fresh_cutoff, "interrupted")
            .unwrap()
            .is_none());
        assert_eq!(backend.active_run(&endpoint()).unwrap(), Some(run_id));

        let expired_cutoff = Utc::now() + chrono::Duration::seconds(1);
        let stale = backend.stale_runs(expired_cutoff).unwrap();
        assert_eq!(stale.len(), 1);
        let failed = backend
            .fail_stale_run(run_id, expired_cutoff, "interrupted")
            .unwrap()
            .unwrap();
        assert_eq!(failed.status, RunStatus::Error);
        assert_eq!(failed.error_message.as_deref(), Some("interrupted"));
        assert_eq!(backend.active_run(&endpoint()).unwrap(), None);
        let batch = backend.get_batch(&BatchId::new("b-1")).unwrap().unwrap();
        assert_eq!(batch.errors, vec!["interrupted"]);

        assert!(backend
            .fail_stale_run(run_id, expired_cutoff, "interrupted")
            .unwrap()
            .is_none());
        assert!(!backend.heartbeat_run(run_id, "worker-a").unwrap());
    }

    #[test]
    fn endpoint_lock_and_runs_exclude_each_other() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        assert_eq!(backend.lock_endpoint(&endpoint(), "recommit b-0").unwrap(), None);
        assert_eq!(
            backend.begin_run(&new_run("b-1")).unwrap(),
            BeginRun::Busy(SlotHolder::Lock("recommit b-0".into()))
        );
        assert!(backend.get_batch(&BatchId::new("b-1")).unwrap().is_none());
        assert_eq!(
            backend.lock_endpoint(&endpoint(), "recommit b-9").unwrap(),
            Some(SlotHolder::Lock("recommit b-0".into()))
        );

        assert!(backend.refresh_endpoint_lock(&endpoint(), "recommit b-0").unwrap());
        assert!(!backend.unlock_endpoint(&endpoint(), "recommit b-9").unwrap());
        assert!(backend.unlock_endpoint(&endpoint(), "recommit b-0").unwrap());
        assert!(!backend.refresh_endpoint_lock(&endpoint(), "recommit b-0").unwrap());

        let BeginRun::Started { run_id } = backend.begin_run(&new_run("b-1")).unwrap() else {
            panic!("slot busy");
        };
        assert_eq!(
            backend.lock_endpoint(&endpoint(), "recommit b-0").unwrap(),
            Some(SlotHolder::Run(run_id))
        );
    }

    #[test]
    fn stale_locks_are_released() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        backend.lock_endpoint(&endpoint(), "recommit b-0").unwrap();

        let past = Utc::now() - chrono::Duration::seconds(60);
        assert!(backend.release_stale_locks(past).unwrap().is_empty());

        let future = Utc::now() + chrono::Duration::seconds(1);
        let released = backend.release_stale_locks(future).unwrap();
        assert_eq!(released, vec![(endpoint(), "recommit b-0".to_string())]);
        assert!(matches!(
            backend.begin_run(&new_run("b-1")).unwrap(),
            BeginRun::Started { .. }
        ));
    }
}
