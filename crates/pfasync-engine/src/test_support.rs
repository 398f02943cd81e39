//! Store fixtures for engine unit tests.

use pfasync_state::{BeginRun, BronzeStore, NewRun, PageWrite, RunStore, SqliteStateBackend};
use pfasync_types::batch::{NewRawRecord, SyncType};
use pfasync_types::ids::{BatchId, EndpointId};
use pfasync_types::run::RunStatus;
use serde_json::Value;

use crate::capture::capture_page;

pub(crate) fn endpoint() -> EndpointId {
    EndpointId::new("pfa.activities")
}

/// Open a full-sync run and append `payloads` as one page.
pub(crate) fn open_batch(
    backend: &SqliteStateBackend,
    batch: &str,
    payloads: &[Value],
) -> (i64, BatchId) {
    open_batch_as(backend, batch, SyncType::Full, payloads)
}

pub(crate) fn open_batch_as(
    backend: &SqliteStateBackend,
    batch: &str,
    sync_type: SyncType,
    payloads: &[Value],
) -> (i64, BatchId) {
    let batch_id = BatchId::new(batch);
    let BeginRun::Started { run_id } = backend
        .begin_run(&NewRun {
            endpoint_id: endpoint(),
            batch_id: batch_id.clone(),
            scope: "org-1".into(),
            sync_type,
            retry_of: None,
            owner: "test".into(),
        })
        .unwrap()
    else {
        panic!("endpoint slot busy");
    };
    let captured = capture_page(payloads.to_vec(), "id", &batch_id, run_id, 0);
    let records: Vec<NewRawRecord> = captured.records;
    backend
        .append_page(&PageWrite {
            batch_id: &batch_id,
            run_id,
            entity_type: "activity",
            records: &records,
            warnings: &captured.warnings,
            rejects: &captured.rejects,
        })
        .unwrap();
    (run_id, batch_id)
}

/// Open, fill, seal and finish a full-sync batch.
pub(crate) fn sealed_batch(backend: &SqliteStateBackend, batch: &str, payloads: &[Value]) -> BatchId {
    sealed_batch_as(backend, batch, SyncType::Full, payloads)
}

pub(crate) fn sealed_batch_as(
    backend: &SqliteStateBackend,
    batch: &str,
    sync_type: SyncType,
    payloads: &[Value],
) -> BatchId {
    let (run_id, batch_id) = open_batch_as(backend, batch, sync_type, payloads);
    backend.seal_batch(&batch_id, "fp").unwrap();
    backend.finish_run(run_id, RunStatus::Success, None).unwrap();
    batch_id
}
