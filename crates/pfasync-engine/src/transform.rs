//! Bronze to silver: preview and chunked commit of a sealed batch.

use chrono::Utc;
use serde::Serialize;

use pfasync_state::{SilverChunk, SilverWrite, StateBackend};
use pfasync_types::batch::RawPayload;
use pfasync_types::dead_letter::{DeadLetter, DeadLetterKind};
use pfasync_types::ids::{BatchId, EndpointId};
use pfasync_types::mapping::MappingRule;
use pfasync_types::record::Fields;
use pfasync_types::run::RunStatus;

use crate::error::{IngestError, Result};
use crate::mapping::{apply_mapping, validate_rules, FieldWarning};

/// One previewed record. Nothing here is persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreviewRow {
    /// Bronze id when previewing stored records.
    pub raw_record_id: Option<i64>,
    pub original: RawPayload,
    pub mapped: Fields,
    pub warnings: Vec<FieldWarning>,
}

/// Tally of one commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitStats {
    pub batch_id: BatchId,
    pub mapping_version_id: i64,
    pub processed: u64,
    pub inserted: u64,
    pub updated: u64,
    pub unchanged: u64,
    /// Records that produced at least one transform warning. Each replaces
    /// the letter an earlier commit of the same record left.
    pub dead_letters: u64,
    /// Stopped early on a cancel request or because the run was finished
    /// elsewhere; committed chunks stay committed.
    pub cancelled: bool,
}

#[derive(Debug, Clone)]
pub struct CommitOptions {
    pub chunk_size: u32,
    /// Recorded on every lineage edge written by this commit.
    pub transformed_by: String,
    /// Run whose counters advance and whose cancel flag is honoured.
    pub run_id: Option<i64>,
}

fn check_rules(endpoint: &EndpointId, rules: &[MappingRule]) -> Result<()> {
    validate_rules(rules).map_err(|errors| IngestError::MappingConfig {
        endpoint_id: endpoint.clone(),
        errors,
    })
}

/// Apply `rules` to caller-supplied payloads.
///
/// # Errors
///
/// Returns [`IngestError::MappingConfig`] if the rules do not validate.
pub fn preview_payloads(
    endpoint: &EndpointId,
    rules: &[MappingRule],
    payloads: Vec<RawPayload>,
) -> Result<Vec<PreviewRow>> {
    check_rules(endpoint, rules)?;
    Ok(payloads
        .into_iter()
        .map(|original| {
            let mapped = apply_mapping(&original, rules);
            PreviewRow {
                raw_record_id: None,
                original,
                mapped: mapped.fields,
                warnings: mapped.warnings,
            }
        })
        .collect())
}

/// Apply `rules` to the first `sample` records of the endpoint's latest
/// sealed batch. Empty when nothing has been sealed yet.
///
/// # Errors
///
/// Returns [`IngestError::MappingConfig`] for invalid rules, or a storage error.
pub fn preview_batch(
    backend: &dyn StateBackend,
    endpoint: &EndpointId,
    rules: &[MappingRule],
    sample: u32,
) -> Result<Vec<PreviewRow>> {
    check_rules(endpoint, rules)?;
    let Some(batch) = backend.latest_sealed_batches(endpoint, 1)?.into_iter().next() else {
        return Ok(Vec::new());
    };

    Ok(backend
        .raw_records_after(&batch.id, 0, sample)?
        .into_iter()
        .map(|record| {
            let mapped = apply_mapping(&record.payload, rules);
            PreviewRow {
                raw_record_id: Some(record.id),
                original: record.payload,
                mapped: mapped.fields,
                warnings: mapped.warnings,
            }
        })
        .collect())
}

/// Cancel requested, or the run was finished from elsewhere.
fn run_halted(backend: &dyn StateBackend, run_id: i64) -> Result<bool> {
    let run = backend
        .get_run(run_id)?
        .ok_or_else(|| IngestError::NotFound(format!("run {run_id}")))?;
    Ok(run.cancel_requested || run.status != RunStatus::InProgress)
}

/// Transform every raw record of a sealed batch under the endpoint's
/// current active rules and upsert the results by natural key.
///
/// Repeating a commit with unchanged rules reports every record as
/// unchanged: `last_seen_at` is the batch's capture time and content
/// comparison decides updates.
///
/// # Errors
///
/// Returns [`IngestError::NotFound`] for an unknown batch,
/// [`IngestError::InvalidState`] for an unsealed one, or a storage error.
pub fn commit_batch(
    backend: &dyn StateBackend,
    batch_id: &BatchId,
    options: &CommitOptions,
) -> Result<CommitStats> {
    let batch = backend
        .get_batch(batch_id)?
        .ok_or_else(|| IngestError::NotFound(format!("batch {batch_id}")))?;
    if !batch.is_sealed() {
        return Err(IngestError::InvalidState(format!(
            "batch {batch_id} is not sealed and cannot be committed"
        )));
    }

    // Apply the snapshot's own rules; lineage must name what was applied.
    let version = backend.resolve_current_version(&batch.endpoint_id)?;
    let rules = &version.rules;

    let mut stats = CommitStats {
        batch_id: batch_id.clone(),
        mapping_version_id: version.id,
        processed: 0,
        inserted: 0,
        updated: 0,
        unchanged: 0,
        dead_letters: 0,
        cancelled: false,
    };
    let chunk_size = options.chunk_size.max(1);
    let mut after_id = 0;

    loop {
        let records = backend.raw_records_after(batch_id, after_id, chunk_size)?;
        let Some(last) = records.last() else {
            break;
        };
        after_id = last.id;

        let mut rows = Vec::with_capacity(records.len());
        let mut rejects = Vec::new();
        for record in records {
            let mapped = apply_mapping(&record.payload, rules);
            if !mapped.warnings.is_empty() {
                rejects.push(DeadLetter {
                    batch_id: batch_id.clone(),
                    run_id: options.run_id,
                    raw_record_id: Some(record.id),
                    record_json: serde_json::Value::Object(record.payload.clone()).to_string(),
                    error_message: mapped
                        .warnings
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join("; "),
                    kind: DeadLetterKind::Transform,
                    failed_at: Utc::now(),
                });
            }
            rows.push(SilverWrite {
                raw_record_id: record.id,
                external_id: record.external_id,
                fields: mapped.fields,
            });
        }

        let processed = rows.len() as u64;
        let outcome = backend.upsert_chunk(&SilverChunk {
            endpoint_id: batch.endpoint_id.clone(),
            scope: batch.scope.clone(),
            batch_id: batch_id.clone(),
            seen_at: batch.ingested_at,
            mapping_version_id: version.id,
            transformed_by: options.transformed_by.clone(),
            run_id: options.run_id,
            rows,
            rejects,
        })?;

        stats.processed += processed;
        stats.dead_letters += outcome.dead_letters;
        stats.inserted += outcome.inserted;
        stats.updated += outcome.updated;
        stats.unchanged += outcome.unchanged;
        tracing::debug!(
            batch_id = %batch_id,
            after_id,
            inserted = outcome.inserted,
            updated = outcome.updated,
            unchanged = outcome.unchanged,
            "Committed chunk"
        );

        if let Some(run_id) = options.run_id {
            if run_halted(backend, run_id)? {
                tracing::info!(run_id, batch_id = %batch_id, "Commit stopped, run no longer active");
                stats.cancelled = true;
                break;
            }
        }
    }

    tracing::info!(
        batch_id = %batch_id,
        mapping_version_id = version.id,
        processed = stats.processed,
        inserted = stats.inserted,
        updated = stats.updated,
        unchanged = stats.unchanged,
        dead_letters = stats.dead_letters,
        "Batch committed"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use pfasync_state::{BronzeStore, MappingStore, SilverStore, SqliteStateBackend};
    use pfasync_types::ids::Page;
    use pfasync_types::mapping::{DataType, TransformType};
    use pfasync_types::record::{FieldValue, NaturalKey};
    use serde_json::json;

    use super::*;
    use crate::test_support::{endpoint, sealed_batch};

    fn options() -> CommitOptions {
        CommitOptions {
            chunk_size: 2,
            transformed_by: "test".into(),
            run_id: None,
        }
    }

    fn rules() -> Vec<MappingRule> {
        vec![
            MappingRule::new("id", "code", DataType::String, TransformType::Direct),
            MappingRule::new("Start", "start_date", DataType::Date, TransformType::Date),
        ]
    }

    #[test]
    fn second_commit_is_a_no_op() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        backend.replace_active_rules(&endpoint(), &rules()).unwrap();
        let batch = sealed_batch(
            &backend,
            "b1",
            &[
                json!({"id": "K1", "Start": "03/15/2024"}),
                json!({"id": "K2", "Start": "2024-04-01"}),
                json!({"id": "K3", "Start": "bad"}),
            ],
        );

        let first = commit_batch(&backend, &batch, &options()).unwrap();
        assert_eq!(first.inserted, 3);
        assert_eq!(first.dead_letters, 1);

        let second = commit_batch(&backend, &batch, &options()).unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(second.updated, 0);
        assert_eq!(second.unchanged, 3);
        assert_eq!(second.mapping_version_id, first.mapping_version_id);

        let k1 = backend
            .get_normalized_by_key(&endpoint(), &NaturalKey::new("org-1", "K1"))
            .unwrap()
            .unwrap();
        assert_eq!(
            k1.fields["start_date"],
            FieldValue::Date(chrono::NaiveDate::from_ymd_opt(2024, 3, 15).unwrap())
        );
        let letters = backend.dead_letters(&batch, Page::default()).unwrap();
        assert_eq!(letters.len(), 1);
        assert!(letters.iter().all(|l| l.kind == DeadLetterKind::Transform));
    }

    #[test]
    fn recommit_replaces_transform_dead_letters() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        backend.replace_active_rules(&endpoint(), &rules()).unwrap();
        let batch = sealed_batch(
            &backend,
            "b1",
            &[
                json!({"id": "K1", "Start": "bad"}),
                json!({"id": "K2", "Start": "worse"}),
                json!({"id": "K3", "Start": "2024-13-45"}),
                json!({"id": "K4", "Start": "2024-01-02"}),
            ],
        );

        let first = commit_batch(&backend, &batch, &options()).unwrap();
        assert_eq!(first.dead_letters, 3);
        let before = backend.dead_letters(&batch, Page::default()).unwrap();
        assert_eq!(before.len(), 3);

        commit_batch(&backend, &batch, &options()).unwrap();
        let after = backend.dead_letters(&batch, Page::default()).unwrap();
        assert_eq!(after.len(), 3);
        assert!(after.iter().all(|l| l.raw_record_id.is_some()));

        // Once the date rule is dropped nothing degrades, so no letters remain.
        backend.replace_active_rules(&endpoint(), &rules()[..1]).unwrap();
        let fixed = commit_batch(&backend, &batch, &options()).unwrap();
        assert_eq!(fixed.dead_letters, 0);
        assert!(backend.dead_letters(&batch, Page::default()).unwrap().is_empty());
    }

    #[test]
    fn committed_fields_match_the_recorded_version() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        backend.replace_active_rules(&endpoint(), &rules()).unwrap();
        let batch = sealed_batch(&backend, "b1", &[json!({"id": "K1", "Start": "2024-01-02"})]);
        commit_batch(&backend, &batch, &options()).unwrap();

        let mut renamed = rules();
        renamed[0].destination_field = "external_code".into();
        backend.replace_active_rules(&endpoint(), &renamed).unwrap();
        let stats = commit_batch(&backend, &batch, &options()).unwrap();

        let version = backend.get_snapshot(stats.mapping_version_id).unwrap().unwrap();
        assert_eq!(version.rules, renamed);
        let raw = backend.raw_records_after(&batch, 0, 10).unwrap();
        let expected = apply_mapping(&raw[0].payload, &version.rules).fields;
        let stored = backend
            .get_normalized_by_key(&endpoint(), &NaturalKey::new("org-1", "K1"))
            .unwrap()
            .unwrap();
        assert_eq!(stored.fields, expected);
        assert!(stored.fields.contains_key("external_code"));
        let edge = backend.lineage_edge(stored.id).unwrap().unwrap();
        assert_eq!(edge.mapping_version_id, version.id);
    }

    #[test]
    fn rule_change_produces_new_version_and_updates() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        backend.replace_active_rules(&endpoint(), &rules()).unwrap();
        let batch = sealed_batch(&backend, "b1", &[json!({"id": "K1", "Start": "2024-01-02"})]);
        let first = commit_batch(&backend, &batch, &options()).unwrap();

        let mut changed = rules();
        changed[1].data_type = DataType::DateTime;
        backend.replace_active_rules(&endpoint(), &changed).unwrap();
        let second = commit_batch(&backend, &batch, &options()).unwrap();

        assert_ne!(second.mapping_version_id, first.mapping_version_id);
        assert_eq!(second.updated, 1);
    }

    #[test]
    fn unsealed_batch_is_rejected() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        let (_, batch) = crate::test_support::open_batch(&backend, "open", &[json!({"id": "K1"})]);
        let err = commit_batch(&backend, &batch, &options()).unwrap_err();
        assert!(matches!(err, IngestError::InvalidState(_)), "{err}");
    }

    #[test]
    fn preview_uses_latest_sealed_batch_without_writing() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        sealed_batch(&backend, "b1", &[json!({"id": "K1", "Start": "15.03.2024"})]);

        let rows = preview_batch(&backend, &endpoint(), &rules(), 20).unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].raw_record_id.is_some());
        assert_eq!(
            rows[0].mapped["start_date"],
            FieldValue::Date(chrono::NaiveDate::from_ymd_opt(2024, 3, 15).unwrap())
        );
        assert!(backend
            .list_normalized(&endpoint(), "org-1", Page::default())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn preview_rejects_invalid_rules() {
        let bad = vec![MappingRule::new("", "x", DataType::String, TransformType::Direct)];
        let err = preview_payloads(&endpoint(), &bad, vec![]).unwrap_err();
        assert!(matches!(err, IngestError::MappingConfig { .. }));
    }
}
