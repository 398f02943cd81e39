//! The public facade over store, sources and orchestrator.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use pfasync_state::{RestoreOutcome, SqliteStateBackend, StateBackend, StateError};
use pfasync_types::batch::{Batch, HistoryFilter, RawPayload, RawRecord, SyncType};
use pfasync_types::dead_letter::DeadLetter;
use pfasync_types::ids::{BatchId, EndpointId, Page};
use pfasync_types::lineage::LineageEdge;
use pfasync_types::mapping::{ActiveRule, MappingRule, MappingVersionSnapshot, SnapshotReason};
use pfasync_types::record::NormalizedRecord;
use pfasync_types::run::{RunPhase, RunStatus, SyncRun};

use crate::config::types::{EndpointConfig, IngestConfig};
use crate::error::{IngestError, Result};
use crate::lineage::LineageView;
use crate::mapping::validate_rules;
use crate::orchestrator::{run_blocking, Orchestrator, SyncHandle};
use crate::schema::{DriftReport, FieldMatcher, NormalizedEditDistanceMatcher};
use crate::source::RecordSource;
use crate::transform::{CommitStats, PreviewRow};

/// Snapshot of a run as seen through its batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub run_id: i64,
    pub batch_id: BatchId,
    pub endpoint_id: EndpointId,
    pub status: RunStatus,
    pub phase: RunPhase,
    pub processed: u64,
    pub inserted: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub deleted: u64,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub sealed: bool,
    pub cancel_requested: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_of: Option<i64>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Progress {
    fn new(run: SyncRun, batch: Batch) -> Self {
        Self {
            run_id: run.id,
            batch_id: run.batch_id,
            endpoint_id: run.endpoint_id,
            status: run.status,
            phase: run.phase,
            processed: run.counters.records_processed,
            inserted: run.counters.records_inserted,
            updated: run.counters.records_updated,
            unchanged: run.counters.records_unchanged,
            deleted: run.counters.records_deleted,
            sealed: batch.is_sealed(),
            errors: batch.errors,
            warnings: batch.warnings,
            cancel_requested: run.cancel_requested,
            retry_of: run.retry_of,
            started_at: run.started_at,
            finished_at: run.finished_at,
        }
    }
}

/// Builder for [`IngestService`].
pub struct IngestServiceBuilder {
    config: IngestConfig,
    backend: Option<Arc<dyn StateBackend>>,
    sources: HashMap<EndpointId, Arc<dyn RecordSource>>,
    matcher: Option<Arc<dyn FieldMatcher>>,
}

impl IngestServiceBuilder {
    /// Use an existing store instead of opening `state.path`.
    #[must_use]
    pub fn with_backend(mut self, backend: Arc<dyn StateBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Override the configured source of one endpoint.
    #[must_use]
    pub fn with_source(mut self, endpoint: impl Into<EndpointId>, source: Arc<dyn RecordSource>) -> Self {
        self.sources.insert(endpoint.into(), source);
        self
    }

    #[must_use]
    pub fn with_matcher(mut self, matcher: Arc<dyn FieldMatcher>) -> Self {
        self.matcher = Some(matcher);
        self
    }

    /// # Errors
    ///
    /// Returns a storage error if the configured database cannot be opened.
    pub fn build(self) -> Result<IngestService> {
        let backend: Arc<dyn StateBackend> = match self.backend {
            Some(backend) => backend,
            None => Arc::new(SqliteStateBackend::open(&self.config.state.path)?),
        };
        let orchestrator = Orchestrator::new(Arc::clone(&backend), self.config.resources.clone());
        Ok(IngestService {
            config: self.config,
            backend,
            orchestrator,
            sources: self.sources,
            matcher: self
                .matcher
                .unwrap_or_else(|| Arc::new(NormalizedEditDistanceMatcher::default())),
        })
    }
}

/// Entry point for ingestion, mapping, lineage and reconciliation.
pub struct IngestService {
    config: IngestConfig,
    backend: Arc<dyn StateBackend>,
    orchestrator: Orchestrator,
    sources: HashMap<EndpointId, Arc<dyn RecordSource>>,
    matcher: Arc<dyn FieldMatcher>,
}

fn store_not_found(err: StateError) -> IngestError {
    match err {
        StateError::NotFound(what) => IngestError::NotFound(what),
        other => IngestError::State(other),
    }
}

impl IngestService {
    pub fn builder(config: IngestConfig) -> IngestServiceBuilder {
        IngestServiceBuilder {
            config,
            backend: None,
            sources: HashMap::new(),
            matcher: None,
        }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn StateBackend> {
        &self.backend
    }

    fn endpoint(&self, endpoint_id: &EndpointId) -> Result<&EndpointConfig> {
        self.config
            .endpoint(endpoint_id)
            .ok_or_else(|| IngestError::NotFound(format!("endpoint {endpoint_id}")))
    }

    fn source_for(&self, endpoint: &EndpointConfig) -> Result<Arc<dyn RecordSource>> {
        if let Some(source) = self.sources.get(&endpoint.endpoint_id()) {
            return Ok(Arc::clone(source));
        }
        Ok(crate::source::from_config(endpoint, &self.config.resources)?)
    }

    // -- Runs -------------------------------------------------------------

    /// Start a sync and return at once; the batch id tracks progress.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::ConcurrentRun`] if the endpoint is busy.
    pub async fn start_ingestion(&self, endpoint_id: &EndpointId, sync_type: SyncType) -> Result<SyncHandle> {
        let endpoint = self.endpoint(endpoint_id)?;
        let source = self.source_for(endpoint)?;
        self.orchestrator.start_sync(endpoint, source, sync_type, None).await
    }

    /// Wait for a run started by this service.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::NotFound`] for an unknown run.
    pub async fn wait_for_run(&self, run_id: i64) -> Result<SyncRun> {
        self.orchestrator.wait(run_id).await
    }

    /// # Errors
    ///
    /// Returns [`IngestError::NotFound`] for an unknown batch.
    pub async fn get_progress(&self, batch_id: &BatchId) -> Result<Progress> {
        let batch_id = batch_id.clone();
        run_blocking(&self.backend, "get_progress", move |b| {
            let run = b
                .get_run_by_batch(&batch_id)?
                .ok_or_else(|| IngestError::NotFound(format!("run for batch {batch_id}")))?;
            let batch = b
                .get_batch(&batch_id)?
                .ok_or_else(|| IngestError::NotFound(format!("batch {batch_id}")))?;
            Ok(Progress::new(run, batch))
        })
        .await
    }

    /// # Errors
    ///
    /// Returns [`IngestError::NotFound`] or [`IngestError::InvalidState`].
    pub async fn cancel_run(&self, batch_id: &BatchId) -> Result<SyncRun> {
        self.orchestrator.cancel(batch_id).await
    }

    /// # Errors
    ///
    /// Returns [`IngestError::InvalidState`] unless the run ended `error` or `cancelled`.
    pub async fn retry_run(&self, batch_id: &BatchId) -> Result<SyncHandle> {
        let lookup = batch_id.clone();
        let batch = run_blocking(&self.backend, "get_batch", move |b| {
            b.get_batch(&lookup)?
                .ok_or_else(|| IngestError::NotFound(format!("batch {lookup}")))
        })
        .await?;
        let endpoint = self.endpoint(&batch.endpoint_id)?;
        let source = self.source_for(endpoint)?;
        self.orchestrator.retry(batch_id, endpoint, source).await
    }

    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn recover_interrupted(&self) -> Result<Vec<i64>> {
        self.orchestrator.recover_interrupted().await
    }

    // -- Bronze -----------------------------------------------------------

    /// Batches matching `filter`, newest first.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn get_history(&self, filter: HistoryFilter, page: Page) -> Result<Vec<Batch>> {
        run_blocking(&self.backend, "list_batches", move |b| {
            Ok(b.list_batches(&filter, page)?)
        })
        .await
    }

    /// # Errors
    ///
    /// Returns [`IngestError::NotFound`] for an unknown batch.
    pub async fn get_bronze_records(&self, batch_id: &BatchId, page: Page) -> Result<Vec<RawRecord>> {
        let batch_id = batch_id.clone();
        run_blocking(&self.backend, "raw_records", move |b| {
            if b.get_batch(&batch_id)?.is_none() {
                return Err(IngestError::NotFound(format!("batch {batch_id}")));
            }
            Ok(b.raw_records(&batch_id, page)?)
        })
        .await
    }

    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn list_dead_letters(&self, batch_id: &BatchId, page: Page) -> Result<Vec<DeadLetter>> {
        let batch_id = batch_id.clone();
        run_blocking(&self.backend, "dead_letters", move |b| {
            Ok(b.dead_letters(&batch_id, page)?)
        })
        .await
    }

    // -- Lineage ----------------------------------------------------------

    /// # Errors
    ///
    /// Returns [`IngestError::NotFound`] for an unknown record.
    pub async fn get_lineage(&self, normalized_record_id: i64) -> Result<LineageView> {
        run_blocking(&self.backend, "get_lineage", move |b| {
            crate::lineage::get_lineage(b, normalized_record_id)
        })
        .await
    }

    /// # Errors
    ///
    /// Returns [`IngestError::NotFound`] for an unknown record.
    pub async fn get_lineage_history(&self, normalized_record_id: i64) -> Result<Vec<LineageEdge>> {
        run_blocking(&self.backend, "get_lineage_history", move |b| {
            crate::lineage::get_lineage_history(b, normalized_record_id)
        })
        .await
    }

    // -- Mapping ----------------------------------------------------------

    /// Apply `rules` to a sample of the latest sealed batch. Nothing is written.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::MappingConfig`] for invalid rules.
    pub async fn preview_mapping(&self, endpoint_id: &EndpointId, rules: Vec<MappingRule>) -> Result<Vec<PreviewRow>> {
        self.endpoint(endpoint_id)?;
        let endpoint_id = endpoint_id.clone();
        let sample = self.config.resources.preview_sample_size;
        run_blocking(&self.backend, "preview_mapping", move |b| {
            crate::transform::preview_batch(b, &endpoint_id, &rules, sample)
        })
        .await
    }

    /// Apply `rules` to caller-supplied payloads. Nothing is written.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::MappingConfig`] for invalid rules.
    pub fn preview_payloads(
        &self,
        endpoint_id: &EndpointId,
        rules: &[MappingRule],
        payloads: Vec<RawPayload>,
    ) -> Result<Vec<PreviewRow>> {
        crate::transform::preview_payloads(endpoint_id, rules, payloads)
    }

    /// Validate, snapshot the current active set, then replace it. Returns
    /// the number of rules saved.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::MappingConfig`] with every problem found;
    /// nothing is written in that case.
    pub async fn save_mappings_bulk(&self, endpoint_id: &EndpointId, rules: Vec<MappingRule>) -> Result<usize> {
        self.endpoint(endpoint_id)?;
        validate_rules(&rules).map_err(|errors| IngestError::MappingConfig {
            endpoint_id: endpoint_id.clone(),
            errors,
        })?;

        let endpoint = endpoint_id.clone();
        let outcome = run_blocking(&self.backend, "replace_active_rules", move |b| {
            Ok(b.replace_active_rules(&endpoint, &rules)?)
        })
        .await?;
        tracing::info!(
            endpoint_id = %endpoint_id,
            saved = outcome.saved,
            snapshot_id = outcome.snapshot_id,
            "Mapping rules replaced"
        );
        Ok(outcome.saved)
    }

    /// Decode untyped rules (as read from a file or request body), then save.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::MappingConfig`] for unknown type names or
    /// invalid rules.
    pub async fn save_mappings_json(&self, endpoint_id: &EndpointId, raw: &Value) -> Result<usize> {
        let rules = crate::mapping::parse_rules(raw).map_err(|errors| IngestError::MappingConfig {
            endpoint_id: endpoint_id.clone(),
            errors,
        })?;
        self.save_mappings_bulk(endpoint_id, rules).await
    }

    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn list_mappings(&self, endpoint_id: &EndpointId) -> Result<Vec<ActiveRule>> {
        let endpoint_id = endpoint_id.clone();
        run_blocking(&self.backend, "active_rules", move |b| {
            Ok(b.active_rules(&endpoint_id)?)
        })
        .await
    }

    /// Freeze the current active set as a manual snapshot.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn save_mapping_version(&self, endpoint_id: &EndpointId) -> Result<MappingVersionSnapshot> {
        let endpoint_id = endpoint_id.clone();
        run_blocking(&self.backend, "create_snapshot", move |b| {
            Ok(b.create_snapshot(&endpoint_id, SnapshotReason::Manual)?)
        })
        .await
    }

    /// Make a snapshot's rules the active set again.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::NotFound`] if the version does not exist or
    /// belongs to another endpoint.
    pub async fn restore_mapping_version(&self, endpoint_id: &EndpointId, version_id: i64) -> Result<RestoreOutcome> {
        let endpoint = endpoint_id.clone();
        let outcome = run_blocking(&self.backend, "restore_snapshot", move |b| {
            b.restore_snapshot(&endpoint, version_id).map_err(store_not_found)
        })
        .await?;
        tracing::info!(
            endpoint_id = %endpoint_id,
            version_id,
            restored = outcome.restored,
            backup_snapshot_id = outcome.backup_snapshot_id,
            "Mapping version restored"
        );
        Ok(outcome)
    }

    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn list_mapping_versions(&self, endpoint_id: &EndpointId) -> Result<Vec<MappingVersionSnapshot>> {
        let endpoint_id = endpoint_id.clone();
        run_blocking(&self.backend, "list_snapshots", move |b| {
            Ok(b.list_snapshots(&endpoint_id)?)
        })
        .await
    }

    /// # Errors
    ///
    /// Returns [`IngestError::NotFound`] for an unknown version.
    pub async fn get_mapping_version(&self, version_id: i64) -> Result<MappingVersionSnapshot> {
        run_blocking(&self.backend, "get_snapshot", move |b| {
            b.get_snapshot(version_id)?
                .ok_or_else(|| IngestError::NotFound(format!("mapping version {version_id}")))
        })
        .await
    }

    /// Re-transform a sealed batch under the current rules. No reconciliation.
    /// Holds the batch's endpoint for the duration.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::ConcurrentRun`] while a sync or another
    /// recommit holds the endpoint, [`IngestError::InvalidState`] for an
    /// unsealed batch.
    pub async fn recommit_batch(&self, batch_id: &BatchId) -> Result<CommitStats> {
        self.orchestrator.recommit(batch_id).await
    }

    // -- Schema -----------------------------------------------------------

    /// Compare the two latest sealed batches of an endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::NotFound`] for an unconfigured endpoint.
    pub async fn get_schema_drift(&self, endpoint_id: &EndpointId) -> Result<DriftReport> {
        let destination_fields = self.endpoint(endpoint_id)?.destination_fields.clone();
        let endpoint_id = endpoint_id.clone();
        let sample = self.config.resources.drift_sample_size;
        let matcher = Arc::clone(&self.matcher);
        run_blocking(&self.backend, "analyze_drift", move |b| {
            crate::schema::analyze_drift(b, &endpoint_id, &destination_fields, sample, matcher.as_ref())
        })
        .await
    }

    // -- Orphans ----------------------------------------------------------

    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn list_orphans(&self, scope: &str, page: Page) -> Result<Vec<NormalizedRecord>> {
        let scope = scope.to_string();
        run_blocking(&self.backend, "list_orphans", move |b| {
            crate::reconcile::list_orphans(b, &scope, page)
        })
        .await
    }

    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn restore_orphans(&self, ids: Vec<i64>) -> Result<u64> {
        run_blocking(&self.backend, "restore_orphans", move |b| {
            crate::reconcile::restore_orphans(b, &ids)
        })
        .await
    }
}
