//! Sync run orchestration: fetch, persist, seal, commit and reconcile.
//!
//! A run is a spawned tokio task. The fetcher pages through the source and
//! hands pages over a bounded channel to a single persister, so bronze
//! writes land strictly in page order. Every state call goes through
//! `spawn_blocking`; nothing about a run lives only in memory except its
//! join handle.
//!
//! Each orchestrator has an owner id. A run heartbeats under it while it
//! works and re-checks ownership before every stage, so a run that another
//! process recovered stops instead of sealing or committing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use pfasync_state::{BeginRun, NewRun, PageWrite, StateBackend};
use pfasync_types::batch::SyncType;
use pfasync_types::error::FetchError;
use pfasync_types::ids::{BatchId, EndpointId};
use pfasync_types::run::{RunPhase, RunStatus, SyncRun};

use crate::capture::capture_page;
use crate::config::types::{EndpointConfig, ResourceConfig};
use crate::error::{compute_backoff, IngestError, Result};
use crate::reconcile::reconcile;
use crate::schema::fingerprint::batch_fingerprint;
use crate::source::{PageRequest, RecordSource, SourcePage};
use crate::transform::{commit_batch, CommitOptions, CommitStats};

/// Recorded on runs failed by recovery.
const INTERRUPTED: &str = "interrupted: owner stopped heartbeating";

/// Identifies a started run. The batch id is the caller's progress handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncHandle {
    pub run_id: i64,
    pub batch_id: BatchId,
    pub endpoint_id: EndpointId,
}

/// Run a store call on the blocking pool.
pub(crate) async fn run_blocking<T, F>(
    backend: &Arc<dyn StateBackend>,
    what: &'static str,
    f: F,
) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn StateBackend) -> Result<T> + Send + 'static,
{
    let backend = Arc::clone(backend);
    tokio::task::spawn_blocking(move || f(backend.as_ref()))
        .await
        .map_err(|e| IngestError::join(what, e))?
}

/// How a run's pipeline ended, short of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunEnd {
    Completed,
    Cancelled,
    /// Recovery failed the run while it worked; its row is no longer ours.
    Abandoned,
}

/// A fetch attempt either yields a page or stops the run.
enum Fetched {
    Page(SourcePage),
    Stopped(RunEnd),
}

/// Everything a run task needs. Cloned into the fetcher and heartbeat.
#[derive(Clone)]
struct RunContext {
    backend: Arc<dyn StateBackend>,
    resources: ResourceConfig,
    endpoint: EndpointConfig,
    source: Arc<dyn RecordSource>,
    run_id: i64,
    batch_id: BatchId,
    sync_type: SyncType,
    owner: String,
    lost: Arc<AtomicBool>,
}

impl RunContext {
    /// Heartbeat the run. `false` once it is no longer `in_progress` under
    /// this owner; that answer is sticky.
    async fn still_owned(&self) -> Result<bool> {
        if self.lost.load(Ordering::Acquire) {
            return Ok(false);
        }
        let run_id = self.run_id;
        let owner = self.owner.clone();
        let owned = run_blocking(&self.backend, "heartbeat_run", move |b| {
            Ok(b.heartbeat_run(run_id, &owner)?)
        })
        .await?;
        if !owned {
            self.lost.store(true, Ordering::Release);
        }
        Ok(owned)
    }

    /// Checked between stages: `Some` means stop now.
    async fn checkpoint(&self) -> Result<Option<RunEnd>> {
        if !self.still_owned().await? {
            return Ok(Some(RunEnd::Abandoned));
        }
        if self.cancel_requested().await? {
            return Ok(Some(RunEnd::Cancelled));
        }
        Ok(None)
    }

    async fn cancel_requested(&self) -> Result<bool> {
        let run_id = self.run_id;
        run_blocking(&self.backend, "is_cancel_requested", move |b| {
            Ok(b.is_cancel_requested(run_id)?)
        })
        .await
    }

    async fn set_phase(&self, phase: RunPhase) -> Result<()> {
        let run_id = self.run_id;
        run_blocking(&self.backend, "set_run_phase", move |b| {
            Ok(b.set_run_phase(run_id, phase)?)
        })
        .await
    }
}

/// Starts, tracks and controls sync runs.
pub struct Orchestrator {
    backend: Arc<dyn StateBackend>,
    resources: ResourceConfig,
    owner: String,
    tasks: Mutex<HashMap<i64, JoinHandle<()>>>,
}

impl Orchestrator {
    pub fn new(backend: Arc<dyn StateBackend>, resources: ResourceConfig) -> Self {
        Self {
            backend,
            resources,
            owner: format!("pfasync-{}-{}", std::process::id(), uuid::Uuid::new_v4()),
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Owner id recorded on runs and locks taken by this orchestrator.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    fn stale_before(&self) -> Result<DateTime<Utc>> {
        let lease = chrono::Duration::from_std(self.resources.run_lease())
            .map_err(|e| IngestError::InvalidState(format!("run lease out of range: {e}")))?;
        Ok(Utc::now()
            .checked_sub_signed(lease)
            .unwrap_or(DateTime::<Utc>::MIN_UTC))
    }

    fn tasks(&self) -> Result<MutexGuard<'_, HashMap<i64, JoinHandle<()>>>> {
        self.tasks
            .lock()
            .map_err(|_| IngestError::Infrastructure(anyhow::anyhow!("run task registry poisoned")))
    }

    /// Claim the endpoint, open the run and its batch, and spawn the run.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::ConcurrentRun`] if the endpoint already has a
    /// run in progress; nothing is written in that case.
    pub async fn start_sync(
        &self,
        endpoint: &EndpointConfig,
        source: Arc<dyn RecordSource>,
        sync_type: SyncType,
        retry_of: Option<i64>,
    ) -> Result<SyncHandle> {
        let endpoint_id = endpoint.endpoint_id();
        let batch_id = BatchId::new(uuid::Uuid::new_v4().to_string());
        let new_run = NewRun {
            endpoint_id: endpoint_id.clone(),
            batch_id: batch_id.clone(),
            scope: endpoint.scope.clone(),
            sync_type,
            retry_of,
            owner: self.owner.clone(),
        };

        let begun = run_blocking(&self.backend, "begin_run", move |b| Ok(b.begin_run(&new_run)?))
            .await?;
        let run_id = match begun {
            BeginRun::Started { run_id } => run_id,
            BeginRun::Busy(holder) => {
                tracing::warn!(
                    endpoint_id = %endpoint_id,
                    holder = %holder,
                    "Sync rejected, endpoint busy"
                );
                return Err(IngestError::ConcurrentRun {
                    endpoint_id,
                    holder,
                });
            }
        };

        tracing::info!(
            run_id,
            batch_id = %batch_id,
            endpoint_id = %endpoint_id,
            sync_type = %sync_type,
            retry_of,
            source = %source.describe(),
            "Sync run started"
        );

        let ctx = RunContext {
            backend: Arc::clone(&self.backend),
            resources: self.resources.clone(),
            endpoint: endpoint.clone(),
            source,
            run_id,
            batch_id: batch_id.clone(),
            sync_type,
            owner: self.owner.clone(),
            lost: Arc::new(AtomicBool::new(false)),
        };
        let handle = tokio::spawn(execute_run(ctx));
        let mut tasks = self.tasks()?;
        tasks.retain(|_, task| !task.is_finished());
        tasks.insert(run_id, handle);

        Ok(SyncHandle {
            run_id,
            batch_id,
            endpoint_id,
        })
    }

    /// Wait for a run started by this orchestrator, then return its final row.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::NotFound`] for an unknown run.
    pub async fn wait(&self, run_id: i64) -> Result<SyncRun> {
        let handle = self.tasks()?.remove(&run_id);
        if let Some(handle) = handle {
            handle.await.map_err(|e| IngestError::join("sync run", e))?;
        }
        run_blocking(&self.backend, "get_run", move |b| {
            b.get_run(run_id)?
                .ok_or_else(|| IngestError::NotFound(format!("run {run_id}")))
        })
        .await
    }

    /// Request cooperative cancellation of the run that owns `batch_id`.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::NotFound`] for an unknown batch and
    /// [`IngestError::InvalidState`] if the run already finished.
    pub async fn cancel(&self, batch_id: &BatchId) -> Result<SyncRun> {
        let batch_id = batch_id.clone();
        let run = run_blocking(&self.backend, "request_cancel", move |b| {
            let run = b
                .get_run_by_batch(&batch_id)?
                .ok_or_else(|| IngestError::NotFound(format!("run for batch {batch_id}")))?;
            if !b.request_cancel(run.id)? {
                return Err(IngestError::InvalidState(format!(
                    "run {} is {}, only in-progress runs can be cancelled",
                    run.id, run.status
                )));
            }
            Ok(run)
        })
        .await?;
        tracing::info!(run_id = run.id, batch_id = %run.batch_id, "Cancel requested");
        Ok(run)
    }

    /// Start a follow-up run for a failed or cancelled one, from a fresh batch.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::InvalidState`] unless the run ended `error` or
    /// `cancelled`, or any [`start_sync`](Self::start_sync) error.
    pub async fn retry(
        &self,
        batch_id: &BatchId,
        endpoint: &EndpointConfig,
        source: Arc<dyn RecordSource>,
    ) -> Result<SyncHandle> {
        let lookup = batch_id.clone();
        let previous = run_blocking(&self.backend, "get_run_by_batch", move |b| {
            b.get_run_by_batch(&lookup)?
                .ok_or_else(|| IngestError::NotFound(format!("run for batch {lookup}")))
        })
        .await?;

        if !previous.status.is_retryable() {
            return Err(IngestError::InvalidState(format!(
                "run {} is {}, only error or cancelled runs can be retried",
                previous.id, previous.status
            )));
        }
        if previous.endpoint_id != endpoint.endpoint_id() {
            return Err(IngestError::InvalidState(format!(
                "run {} belongs to endpoint {}",
                previous.id, previous.endpoint_id
            )));
        }

        self.start_sync(endpoint, source, previous.sync_type, Some(previous.id))
            .await
    }

    /// Fail `in_progress` runs whose owner stopped heartbeating for longer
    /// than the lease and release their endpoints, along with endpoint locks
    /// nobody refreshed. Returns the recovered run ids.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn recover_interrupted(&self) -> Result<Vec<i64>> {
        let live: Vec<i64> = {
            let mut tasks = self.tasks()?;
            tasks.retain(|_, task| !task.is_finished());
            tasks.keys().copied().collect()
        };
        let stale_before = self.stale_before()?;

        let (recovered, released) = run_blocking(&self.backend, "recover_interrupted", move |b| {
            let mut recovered = Vec::new();
            for run in b.stale_runs(stale_before)? {
                if live.contains(&run.id) {
                    continue;
                }
                if let Some(failed) = b.fail_stale_run(run.id, stale_before, INTERRUPTED)? {
                    recovered.push(failed);
                }
            }
            Ok((recovered, b.release_stale_locks(stale_before)?))
        })
        .await?;

        for run in &recovered {
            tracing::warn!(
                run_id = run.id,
                batch_id = %run.batch_id,
                owner = %run.owner,
                heartbeat_at = %run.heartbeat_at,
                "Interrupted run marked as error"
            );
        }
        for (endpoint_id, holder) in &released {
            tracing::warn!(endpoint_id = %endpoint_id, holder = %holder, "Stale endpoint lock released");
        }
        Ok(recovered.into_iter().map(|run| run.id).collect())
    }

    /// Re-transform a sealed batch under the current rules while holding its
    /// endpoint, so no sync writes the same records meanwhile.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::ConcurrentRun`] if a run or another recommit
    /// holds the endpoint, [`IngestError::NotFound`] for an unknown batch and
    /// [`IngestError::InvalidState`] for an unsealed one.
    pub async fn recommit(&self, batch_id: &BatchId) -> Result<CommitStats> {
        let lookup = batch_id.clone();
        let batch = run_blocking(&self.backend, "get_batch", move |b| {
            b.get_batch(&lookup)?
                .ok_or_else(|| IngestError::NotFound(format!("batch {lookup}")))
        })
        .await?;
        let endpoint_id = batch.endpoint_id;
        let holder = format!("recommit {batch_id} by {}", self.owner);

        let (endpoint, who) = (endpoint_id.clone(), holder.clone());
        let taken = run_blocking(&self.backend, "lock_endpoint", move |b| {
            Ok(b.lock_endpoint(&endpoint, &who)?)
        })
        .await?;
        if let Some(current) = taken {
            tracing::warn!(
                endpoint_id = %endpoint_id,
                batch_id = %batch_id,
                holder = %current,
                "Recommit rejected, endpoint busy"
            );
            return Err(IngestError::ConcurrentRun {
                endpoint_id,
                holder: current,
            });
        }

        let heartbeat = tokio::spawn(keep_lock(
            Arc::clone(&self.backend),
            endpoint_id.clone(),
            holder.clone(),
            self.resources.heartbeat_interval(),
        ));
        let options = CommitOptions {
            chunk_size: self.resources.commit_chunk_size,
            transformed_by: format!("{}/{} recommit", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
            run_id: None,
        };
        let target = batch_id.clone();
        let committed = run_blocking(&self.backend, "commit_batch", move |b| {
            commit_batch(b, &target, &options)
        })
        .await;
        heartbeat.abort();

        let endpoint = endpoint_id.clone();
        let released = run_blocking(&self.backend, "unlock_endpoint", move |b| {
            Ok(b.unlock_endpoint(&endpoint, &holder)?)
        })
        .await;
        let stats = committed?;
        if !released? {
            tracing::warn!(endpoint_id = %endpoint_id, batch_id = %batch_id, "Recommit lock was already released");
        }
        Ok(stats)
    }
}

/// Refresh an endpoint lock until aborted or lost.
async fn keep_lock(
    backend: Arc<dyn StateBackend>,
    endpoint: EndpointId,
    holder: String,
    period: Duration,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let (e, h) = (endpoint.clone(), holder.clone());
        match run_blocking(&backend, "refresh_endpoint_lock", move |b| {
            Ok(b.refresh_endpoint_lock(&e, &h)?)
        })
        .await
        {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(endpoint_id = %endpoint, holder = %holder, "Endpoint lock lost");
                return;
            }
            Err(err) => tracing::warn!(endpoint_id = %endpoint, error = %err, "Lock refresh failed"),
        }
    }
}

/// Heartbeat a run until aborted or the run is lost.
async fn keep_alive(ctx: RunContext) {
    let mut ticker = tokio::time::interval(ctx.resources.heartbeat_interval());
    ticker.tick().await;
    loop {
        ticker.tick().await;
        match ctx.still_owned().await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(run_id = ctx.run_id, batch_id = %ctx.batch_id, "Run lease lost");
                return;
            }
            Err(err) => tracing::warn!(run_id = ctx.run_id, error = %err, "Heartbeat failed"),
        }
    }
}

/// Body of a run task. Leaves the run in a terminal status unless recovery
/// already did.
async fn execute_run(ctx: RunContext) {
    let heartbeat = tokio::spawn(keep_alive(ctx.clone()));
    let outcome = drive(&ctx).await;
    heartbeat.abort();

    // A failed heartbeat check still lets the run try to record its outcome.
    let owned = match &outcome {
        Ok(RunEnd::Abandoned) => false,
        _ => ctx.still_owned().await.unwrap_or(true),
    };
    if !owned {
        tracing::warn!(
            run_id = ctx.run_id,
            batch_id = %ctx.batch_id,
            endpoint_id = %ctx.endpoint.id,
            "Run was failed by recovery, abandoning without recording an outcome"
        );
        return;
    }

    let (status, message) = match &outcome {
        Ok(RunEnd::Completed) => (RunStatus::Success, None),
        Ok(RunEnd::Cancelled) => (RunStatus::Cancelled, Some("cancelled by request".to_string())),
        Ok(RunEnd::Abandoned) => return,
        Err(err) => (RunStatus::Error, Some(err.to_string())),
    };

    if let Err(err) = &outcome {
        tracing::error!(
            run_id = ctx.run_id,
            batch_id = %ctx.batch_id,
            endpoint_id = %ctx.endpoint.id,
            error = %err,
            "Sync run failed"
        );
    }

    let batch_id = ctx.batch_id.clone();
    let run_id = ctx.run_id;
    let finished = run_blocking(&ctx.backend, "finish_run", move |b| {
        if status == RunStatus::Error {
            if let Some(message) = &message {
                b.add_batch_error(&batch_id, message)?;
            }
        }
        Ok(b.finish_run(run_id, status, message.as_deref())?)
    })
    .await;

    match finished {
        Ok(run) => tracing::info!(
            run_id = run.id,
            batch_id = %run.batch_id,
            endpoint_id = %run.endpoint_id,
            status = %run.status,
            records_processed = run.counters.records_processed,
            records_inserted = run.counters.records_inserted,
            records_updated = run.counters.records_updated,
            records_unchanged = run.counters.records_unchanged,
            records_deleted = run.counters.records_deleted,
            duration_ms = run.duration_ms,
            "Sync run finished"
        ),
        Err(err) => tracing::error!(
            run_id = ctx.run_id,
            batch_id = %ctx.batch_id,
            error = %err,
            "Failed to record run outcome"
        ),
    }
}

async fn drive(ctx: &RunContext) -> Result<RunEnd> {
    match fetch_and_persist(ctx).await? {
        RunEnd::Completed => {}
        stopped => return Ok(stopped),
    }

    if let Some(stopped) = ctx.checkpoint().await? {
        return Ok(stopped);
    }
    seal(ctx).await?;

    if let Some(stopped) = ctx.checkpoint().await? {
        return Ok(stopped);
    }
    ctx.set_phase(RunPhase::Transforming).await?;
    let options = CommitOptions {
        chunk_size: ctx.resources.commit_chunk_size,
        transformed_by: format!(
            "{}/{} run {}",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            ctx.run_id
        ),
        run_id: Some(ctx.run_id),
    };
    let batch_id = ctx.batch_id.clone();
    let stats = run_blocking(&ctx.backend, "commit_batch", move |b| {
        commit_batch(b, &batch_id, &options)
    })
    .await?;
    if stats.cancelled {
        return Ok(ctx.checkpoint().await?.unwrap_or(RunEnd::Cancelled));
    }

    if ctx.sync_type == SyncType::Full {
        if let Some(stopped) = ctx.checkpoint().await? {
            return Ok(stopped);
        }
        ctx.set_phase(RunPhase::Reconciling).await?;
        let batch_id = ctx.batch_id.clone();
        let run_id = ctx.run_id;
        run_blocking(&ctx.backend, "reconcile", move |b| {
            reconcile(b, &batch_id, Some(run_id))
        })
        .await?;
    }

    Ok(RunEnd::Completed)
}

async fn seal(ctx: &RunContext) -> Result<()> {
    let batch_id = ctx.batch_id.clone();
    let sample = ctx.resources.fingerprint_sample_size;
    let batch = run_blocking(&ctx.backend, "seal_batch", move |b| {
        let records = b.raw_records_after(&batch_id, 0, sample)?;
        let fingerprint = batch_fingerprint(records.iter().map(|r| &r.payload));
        Ok(b.seal_batch(&batch_id, &fingerprint)?)
    })
    .await?;
    tracing::info!(
        run_id = ctx.run_id,
        batch_id = %batch.id,
        record_count = batch.record_count,
        warnings = batch.warnings.len(),
        fingerprint = batch.schema_fingerprint.as_deref(),
        "Batch sealed"
    );
    Ok(())
}

/// Page through the source into bronze. The batch stays open.
async fn fetch_and_persist(ctx: &RunContext) -> Result<RunEnd> {
    let (tx, mut rx) = mpsc::channel::<(u64, SourcePage)>(ctx.resources.page_channel_capacity.max(1));
    let fetcher = tokio::spawn(fetch_pages(ctx.clone(), tx));

    let mut persisted: Result<()> = Ok(());
    while let Some((page_no, page)) = rx.recv().await {
        if let Err(err) = persist_page(ctx, page_no, page).await {
            persisted = Err(err);
            break;
        }
    }
    // Closing the receiver stops the fetcher at its next send.
    drop(rx);

    let fetched = fetcher.await.map_err(|e| IngestError::join("fetcher", e))?;
    persisted?;
    fetched
}

async fn persist_page(ctx: &RunContext, page_no: u64, page: SourcePage) -> Result<()> {
    let captured = capture_page(
        page.records,
        &ctx.endpoint.key_field,
        &ctx.batch_id,
        ctx.run_id,
        page_no,
    );
    let rejected = captured.rejects.len();
    let batch_id = ctx.batch_id.clone();
    let run_id = ctx.run_id;
    let entity_type = ctx.endpoint.entity_type.clone();

    let written = run_blocking(&ctx.backend, "append_page", move |b| {
        Ok(b.append_page(&PageWrite {
            batch_id: &batch_id,
            run_id,
            entity_type: &entity_type,
            records: &captured.records,
            warnings: &captured.warnings,
            rejects: &captured.rejects,
        })?)
    })
    .await?;

    tracing::debug!(
        run_id,
        batch_id = %ctx.batch_id,
        page_no,
        written,
        rejected,
        "Page persisted"
    );
    Ok(())
}

async fn fetch_pages(ctx: RunContext, tx: mpsc::Sender<(u64, SourcePage)>) -> Result<RunEnd> {
    let mut offset = 0u64;
    let mut page_no = 0u64;

    loop {
        let request = PageRequest {
            offset,
            limit: ctx.endpoint.page_size,
        };
        let page = match fetch_with_retry(&ctx, request).await? {
            Fetched::Page(page) => page,
            Fetched::Stopped(stopped) => {
                tracing::info!(
                    run_id = ctx.run_id,
                    batch_id = %ctx.batch_id,
                    offset,
                    reason = ?stopped,
                    "Fetch stopped"
                );
                return Ok(stopped);
            }
        };

        let received = page.records.len() as u64;
        let has_more = page.has_more && received > 0;
        if tx.send((page_no, page)).await.is_err() {
            // Persister gave up; its error is reported by the caller.
            return Ok(RunEnd::Completed);
        }
        if !has_more {
            return Ok(RunEnd::Completed);
        }
        offset += received;
        page_no += 1;
    }
}

/// Fetch one page with timeout and bounded retries, checking for cancel
/// and ownership before every attempt.
async fn fetch_with_retry(ctx: &RunContext, request: PageRequest) -> Result<Fetched> {
    let max_retries = ctx.resources.max_retries;
    let timeout = Duration::from_secs(ctx.resources.fetch_timeout_secs);
    let mut attempt = 0u32;

    loop {
        if let Some(stopped) = ctx.checkpoint().await? {
            return Ok(Fetched::Stopped(stopped));
        }
        attempt += 1;

        let result = match tokio::time::timeout(timeout, ctx.source.fetch_page(request)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::timeout(format!(
                "page at offset {} exceeded {}s",
                request.offset, ctx.resources.fetch_timeout_secs
            ))),
        };

        match result {
            Ok(page) => return Ok(Fetched::Page(page)),
            Err(ref err) if err.retryable && attempt <= max_retries => {
                let delay = compute_backoff(err, attempt, &ctx.resources);
                #[allow(clippy::cast_possible_truncation)]
                let delay_ms = delay.as_millis() as u64;
                tracing::warn!(
                    run_id = ctx.run_id,
                    batch_id = %ctx.batch_id,
                    attempt,
                    max_retries,
                    delay_ms,
                    offset = request.offset,
                    kind = %err.kind,
                    "Retryable fetch error, will retry"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                if err.retryable {
                    tracing::error!(
                        run_id = ctx.run_id,
                        batch_id = %ctx.batch_id,
                        attempt,
                        max_retries,
                        kind = %err.kind,
                        "Max retries exhausted, failing run"
                    );
                } else {
                    tracing::error!(
                        run_id = ctx.run_id,
                        batch_id = %ctx.batch_id,
                        kind = %err.kind,
                        status_code = err.status_code,
                        "Non-retryable fetch error, failing run"
                    );
                }
                return Err(IngestError::from_fetch(ctx.run_id, ctx.batch_id.clone(), err));
            }
        }
    }
}
