//! Orphan reconciliation after full syncs.

use pfasync_state::StateBackend;
use pfasync_types::batch::SyncType;
use pfasync_types::ids::{BatchId, Page};
use pfasync_types::record::NormalizedRecord;

use crate::error::{IngestError, Result};

/// Flag every live record of the batch's endpoint and scope that the batch
/// did not contain. Scope is checked before anything is written.
///
/// # Errors
///
/// Returns [`IngestError::ReconciliationScope`] for delta or unsealed
/// batches and [`IngestError::NotFound`] for unknown ones.
pub fn reconcile(backend: &dyn StateBackend, batch_id: &BatchId, run_id: Option<i64>) -> Result<u64> {
    let batch = backend
        .get_batch(batch_id)?
        .ok_or_else(|| IngestError::NotFound(format!("batch {batch_id}")))?;

    if batch.sync_type != SyncType::Full {
        return Err(IngestError::ReconciliationScope {
            batch_id: batch_id.clone(),
            reason: format!("sync type is {}, only full syncs reconcile", batch.sync_type),
        });
    }
    if !batch.is_sealed() {
        return Err(IngestError::ReconciliationScope {
            batch_id: batch_id.clone(),
            reason: "batch is not sealed".into(),
        });
    }

    let discontinued =
        backend.discontinue_unseen(&batch.endpoint_id, &batch.scope, batch_id, run_id)?;
    tracing::info!(
        batch_id = %batch_id,
        endpoint_id = %batch.endpoint_id,
        scope = %batch.scope,
        discontinued,
        "Orphans reconciled"
    );
    Ok(discontinued)
}

/// # Errors
///
/// Returns a storage error.
pub fn list_orphans(backend: &dyn StateBackend, scope: &str, page: Page) -> Result<Vec<NormalizedRecord>> {
    Ok(backend.list_discontinued(scope, page)?)
}

/// Clear the discontinued flag on `ids`. Ids that are not flagged are skipped.
///
/// # Errors
///
/// Returns a storage error.
pub fn restore_orphans(backend: &dyn StateBackend, ids: &[i64]) -> Result<u64> {
    let restored = backend.restore_discontinued(ids)?;
    tracing::info!(requested = ids.len(), restored, "Orphans restored");
    Ok(restored)
}
