//! Provenance lookups for silver records.

use chrono::{DateTime, Utc};
use serde::Serialize;

use pfasync_state::StateBackend;
use pfasync_types::batch::{Batch, RawRecord};
use pfasync_types::lineage::LineageEdge;
use pfasync_types::mapping::MappingVersionSnapshot;
use pfasync_types::record::NormalizedRecord;

use crate::error::{IngestError, Result};

/// A silver record with the bronze record, batch and rule version behind
/// its current state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineageView {
    pub silver: NormalizedRecord,
    pub bronze: RawRecord,
    pub mapping_version: MappingVersionSnapshot,
    pub batch: Batch,
    pub transformed_at: DateTime<Utc>,
    pub transformed_by: String,
}

/// # Errors
///
/// Returns [`IngestError::NotFound`] if the record or any part of its
/// provenance is missing.
pub fn get_lineage(backend: &dyn StateBackend, normalized_record_id: i64) -> Result<LineageView> {
    let silver = backend
        .get_normalized(normalized_record_id)?
        .ok_or_else(|| IngestError::NotFound(format!("normalized record {normalized_record_id}")))?;
    let edge = backend.lineage_edge(normalized_record_id)?.ok_or_else(|| {
        IngestError::NotFound(format!("lineage for normalized record {normalized_record_id}"))
    })?;

    let bronze = backend
        .get_raw_record(edge.raw_record_id)?
        .ok_or_else(|| IngestError::NotFound(format!("raw record {}", edge.raw_record_id)))?;
    let batch = backend
        .get_batch(&edge.batch_id)?
        .ok_or_else(|| IngestError::NotFound(format!("batch {}", edge.batch_id)))?;
    let mapping_version = backend
        .get_snapshot(edge.mapping_version_id)?
        .ok_or_else(|| {
            IngestError::NotFound(format!("mapping version {}", edge.mapping_version_id))
        })?;

    Ok(LineageView {
        silver,
        bronze,
        mapping_version,
        batch,
        transformed_at: edge.transformed_at,
        transformed_by: edge.transformed_by,
    })
}

/// Every provenance change of a record, oldest first.
///
/// # Errors
///
/// Returns [`IngestError::NotFound`] for an unknown record.
pub fn get_lineage_history(
    backend: &dyn StateBackend,
    normalized_record_id: i64,
) -> Result<Vec<LineageEdge>> {
    if backend.get_normalized(normalized_record_id)?.is_none() {
        return Err(IngestError::NotFound(format!(
            "normalized record {normalized_record_id}"
        )));
    }
    Ok(backend.lineage_history(normalized_record_id)?)
}

#[cfg(test)]
mod tests {
    use pfasync_state::{MappingStore, SilverStore, SqliteStateBackend};
    use pfasync_types::mapping::{DataType, MappingRule, TransformType};
    use pfasync_types::record::NaturalKey;
    use serde_json::json;

    use super::*;
    use crate::test_support::{endpoint, sealed_batch};
    use crate::transform::{commit_batch, CommitOptions};

    fn commit(backend: &SqliteStateBackend, batch: &pfasync_types::ids::BatchId) {
        let options = CommitOptions {
            chunk_size: 10,
            transformed_by: "lineage-test".into(),
            run_id: None,
        };
        commit_batch(backend, batch, &options).unwrap();
    }

    #[test]
    fn lineage_points_at_latest_source() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        backend
            .replace_active_rules(
                &endpoint(),
                &[MappingRule::new("name", "title", DataType::String, TransformType::Direct)],
            )
            .unwrap();

        let b1 = sealed_batch(&backend, "b1", &[json!({"id": "K1", "name": "one"})]);
        commit(&backend, &b1);
        let b2 = sealed_batch(&backend, "b2", &[json!({"id": "K1", "name": "two"})]);
        commit(&backend, &b2);

        let record = backend
            .get_normalized_by_key(&endpoint(), &NaturalKey::new("org-1", "K1"))
            .unwrap()
            .unwrap();
        let view = get_lineage(&backend, record.id).unwrap();
        assert_eq!(view.batch.id, b2);
        assert_eq!(view.bronze.batch_id, b2);
        assert_eq!(view.bronze.payload["name"], json!("two"));
        assert_eq!(view.transformed_by, "lineage-test");
        assert_eq!(view.mapping_version.rules.len(), 1);

        let history = get_lineage_history(&backend, record.id).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].batch_id, b1);
    }

    #[test]
    fn unknown_record_is_not_found() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        assert!(matches!(get_lineage(&backend, 42), Err(IngestError::NotFound(_))));
        assert!(matches!(
            get_lineage_history(&backend, 42),
            Err(IngestError::NotFound(_))
        ));
    }
}
