//! State backend trait definitions.
//!
//! The store is split by layer: [`BronzeStore`] (batches, raw records, dead
//! letters), [`MappingStore`] (active rules and immutable version
//! snapshots), [`SilverStore`] (normalized records and lineage) and
//! [`RunStore`] (sync runs and the per-endpoint run registry).
//! [`StateBackend`] bundles all four for use behind `Arc<dyn StateBackend>`.
//! Model types live in [`pfasync_types`].

use std::fmt;

use chrono::{DateTime, Utc};
use pfasync_types::batch::{Batch, HistoryFilter, NewRawRecord, RawRecord, SyncType};
use pfasync_types::dead_letter::DeadLetter;
use pfasync_types::ids::{BatchId, EndpointId, Page};
use pfasync_types::lineage::LineageEdge;
use pfasync_types::mapping::{ActiveRule, MappingRule, MappingVersionSnapshot, SnapshotReason};
use pfasync_types::record::{Fields, NaturalKey, NormalizedRecord};
use pfasync_types::run::{RunCounters, RunPhase, RunStatus, SyncRun};

use crate::error;

// ---------------------------------------------------------------------------
// Write models
// ---------------------------------------------------------------------------

/// Request to open a run together with its batch.
#[derive(Debug, Clone)]
pub struct NewRun {
    pub endpoint_id: EndpointId,
    pub batch_id: BatchId,
    pub scope: String,
    pub sync_type: SyncType,
    pub retry_of: Option<i64>,
    /// Identifies the executing process; heartbeats must present it.
    pub owner: String,
}

/// What occupies an endpoint slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotHolder {
    /// An `in_progress` sync run.
    Run(i64),
    /// A named exclusive operation outside any run, such as a recommit.
    Lock(String),
}

impl fmt::Display for SlotHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Run(run_id) => write!(f, "run {run_id}"),
            Self::Lock(holder) => write!(f, "lock '{holder}'"),
        }
    }
}

/// Outcome of the compare-and-swap on the endpoint run registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BeginRun {
    /// Slot claimed; the run is `in_progress` and its batch is open.
    Started { run_id: i64 },
    /// The slot is taken. Nothing was written.
    Busy(SlotHolder),
}

/// One fetched page, written in a single transaction.
#[derive(Debug, Clone, Copy)]
pub struct PageWrite<'a> {
    pub batch_id: &'a BatchId,
    pub run_id: i64,
    pub entity_type: &'a str,
    pub records: &'a [NewRawRecord],
    /// Appended to the batch's warnings.
    pub warnings: &'a [String],
    /// Records skipped at capture time.
    pub rejects: &'a [DeadLetter],
}

/// Result of replacing an endpoint's active rule set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplaceOutcome {
    /// Snapshot of the rules that were active before the replace.
    pub snapshot_id: i64,
    pub saved: usize,
}

/// Result of restoring a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestoreOutcome {
    pub restored: usize,
    /// Snapshot of the rules that were active before the restore.
    pub backup_snapshot_id: i64,
}

/// One transformed record ready for upsert.
#[derive(Debug, Clone, PartialEq)]
pub struct SilverWrite {
    pub raw_record_id: i64,
    pub external_id: String,
    pub fields: Fields,
}

/// A chunk of transformed records from one batch.
#[derive(Debug, Clone)]
pub struct SilverChunk {
    pub endpoint_id: EndpointId,
    pub scope: String,
    pub batch_id: BatchId,
    /// Written as `last_seen_at`; the batch's capture time keeps commits repeatable.
    pub seen_at: DateTime<Utc>,
    pub mapping_version_id: i64,
    pub transformed_by: String,
    /// Run whose counters advance with this chunk, if any.
    pub run_id: Option<i64>,
    pub rows: Vec<SilverWrite>,
    /// Transform letters for records in `rows`. They replace any transform
    /// letters an earlier commit left for the same raw records.
    pub rejects: Vec<DeadLetter>,
}

/// Per-chunk upsert tally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkOutcome {
    pub inserted: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub dead_letters: u64,
}

impl std::ops::AddAssign for ChunkOutcome {
    fn add_assign(&mut self, rhs: Self) {
        self.inserted += rhs.inserted;
        self.updated += rhs.updated;
        self.unchanged += rhs.unchanged;
        self.dead_letters += rhs.dead_letters;
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Raw capture store (bronze layer).
pub trait BronzeStore: Send + Sync {
    /// Persist one page: raw records, dead letters, batch count and run
    /// progress move together. Rejected once the batch is sealed.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Conflict`](crate::StateError::Conflict) for a
    /// sealed batch, or a storage error.
    fn append_page(&self, page: &PageWrite<'_>) -> error::Result<u64>;

    /// Seal a batch: set `completed_at` and its schema fingerprint.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Conflict`](crate::StateError::Conflict) if the
    /// batch is already sealed.
    fn seal_batch(&self, batch_id: &BatchId, fingerprint: &str) -> error::Result<Batch>;

    /// Record a fatal error against an unsealed batch.
    ///
    /// # Errors
    ///
    /// Returns a storage error; sealed batches are left untouched.
    fn add_batch_error(&self, batch_id: &BatchId, message: &str) -> error::Result<()>;

    /// # Errors
    ///
    /// Returns a storage error.
    fn get_batch(&self, batch_id: &BatchId) -> error::Result<Option<Batch>>;

    /// Batches matching `filter`, newest first.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    fn list_batches(&self, filter: &HistoryFilter, page: Page) -> error::Result<Vec<Batch>>;

    /// Most recent sealed batches of an endpoint, newest first.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    fn latest_sealed_batches(&self, endpoint: &EndpointId, limit: u32)
        -> error::Result<Vec<Batch>>;

    /// # Errors
    ///
    /// Returns a storage error.
    fn raw_records(&self, batch_id: &BatchId, page: Page) -> error::Result<Vec<RawRecord>>;

    /// Keyset iteration in id order, for chunked processing and sampling.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    fn raw_records_after(
        &self,
        batch_id: &BatchId,
        after_id: i64,
        limit: u32,
    ) -> error::Result<Vec<RawRecord>>;

    /// # Errors
    ///
    /// Returns a storage error.
    fn get_raw_record(&self, id: i64) -> error::Result<Option<RawRecord>>;

    /// # Errors
    ///
    /// Returns a storage error.
    fn dead_letters(&self, batch_id: &BatchId, page: Page) -> error::Result<Vec<DeadLetter>>;
}

/// Field mapping registry and its immutable version history.
pub trait MappingStore: Send + Sync {
    /// Active registry rows in rule order.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    fn active_rules(&self, endpoint: &EndpointId) -> error::Result<Vec<ActiveRule>>;

    /// Freeze the current active set, then replace it, in one transaction.
    ///
    /// # Errors
    ///
    /// Returns a storage error; nothing is written on failure.
    fn replace_active_rules(
        &self,
        endpoint: &EndpointId,
        rules: &[MappingRule],
    ) -> error::Result<ReplaceOutcome>;

    /// Freeze the current active set as a new snapshot.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    fn create_snapshot(
        &self,
        endpoint: &EndpointId,
        reason: SnapshotReason,
    ) -> error::Result<MappingVersionSnapshot>;

    /// # Errors
    ///
    /// Returns a storage error.
    fn get_snapshot(&self, id: i64) -> error::Result<Option<MappingVersionSnapshot>>;

    /// Snapshots of an endpoint, newest first.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    fn list_snapshots(&self, endpoint: &EndpointId) -> error::Result<Vec<MappingVersionSnapshot>>;

    /// Make a snapshot's frozen rules the active set. The snapshot itself
    /// is kept; the previous active set is frozen first.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::NotFound`](crate::StateError::NotFound) if the
    /// snapshot does not exist or belongs to another endpoint.
    fn restore_snapshot(&self, endpoint: &EndpointId, version_id: i64)
        -> error::Result<RestoreOutcome>;

    /// Snapshot identifying the current active set: the latest snapshot if
    /// its content hash matches, otherwise a new `commit` snapshot.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    fn resolve_current_version(&self, endpoint: &EndpointId)
        -> error::Result<MappingVersionSnapshot>;
}

/// Normalized (silver) records and their lineage.
pub trait SilverStore: Send + Sync {
    /// Upsert a chunk by natural key, overwrite lineage edges and replace the
    /// chunk's transform dead letters, in one transaction. Advances the run's
    /// counters when `run_id` is set.
    ///
    /// # Errors
    ///
    /// Returns a storage error; nothing from the chunk is written on failure.
    fn upsert_chunk(&self, chunk: &SilverChunk) -> error::Result<ChunkOutcome>;

    /// # Errors
    ///
    /// Returns a storage error.
    fn get_normalized(&self, id: i64) -> error::Result<Option<NormalizedRecord>>;

    /// # Errors
    ///
    /// Returns a storage error.
    fn get_normalized_by_key(
        &self,
        endpoint: &EndpointId,
        key: &NaturalKey,
    ) -> error::Result<Option<NormalizedRecord>>;

    /// # Errors
    ///
    /// Returns a storage error.
    fn list_normalized(
        &self,
        endpoint: &EndpointId,
        scope: &str,
        page: Page,
    ) -> error::Result<Vec<NormalizedRecord>>;

    /// Flag every live record of `endpoint`/`scope` not last seen in
    /// `batch_id`. `last_seen_at` is left as is. Returns the count.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    fn discontinue_unseen(
        &self,
        endpoint: &EndpointId,
        scope: &str,
        batch_id: &BatchId,
        run_id: Option<i64>,
    ) -> error::Result<u64>;

    /// # Errors
    ///
    /// Returns a storage error.
    fn list_discontinued(&self, scope: &str, page: Page) -> error::Result<Vec<NormalizedRecord>>;

    /// Clear the discontinued flag and refresh `last_seen_at`. Returns the count.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    fn restore_discontinued(&self, ids: &[i64]) -> error::Result<u64>;

    /// # Errors
    ///
    /// Returns a storage error.
    fn lineage_edge(&self, normalized_record_id: i64) -> error::Result<Option<LineageEdge>>;

    /// Every provenance change of a record, oldest first.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    fn lineage_history(&self, normalized_record_id: i64) -> error::Result<Vec<LineageEdge>>;
}

/// Sync runs and the per-endpoint run registry.
pub trait RunStore: Send + Sync {
    /// Compare-and-swap the endpoint slot; on success create the run
    /// (`in_progress`) and open its batch in the same transaction.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    fn begin_run(&self, run: &NewRun) -> error::Result<BeginRun>;

    /// # Errors
    ///
    /// Returns a storage error.
    fn get_run(&self, run_id: i64) -> error::Result<Option<SyncRun>>;

    /// # Errors
    ///
    /// Returns a storage error.
    fn get_run_by_batch(&self, batch_id: &BatchId) -> error::Result<Option<SyncRun>>;

    /// # Errors
    ///
    /// Returns a storage error.
    fn set_run_phase(&self, run_id: i64, phase: RunPhase) -> error::Result<()>;

    /// Add `delta` to the run's counters.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    fn add_run_counters(&self, run_id: i64, delta: &RunCounters) -> error::Result<()>;

    /// Set the cooperative cancel flag. Returns `false` if the run is not
    /// `in_progress`.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    fn request_cancel(&self, run_id: i64) -> error::Result<bool>;

    /// # Errors
    ///
    /// Returns a storage error.
    fn is_cancel_requested(&self, run_id: i64) -> error::Result<bool>;

    /// Move an `in_progress` run to a terminal status and release the
    /// endpoint slot in the same transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Conflict`](crate::StateError::Conflict) if the
    /// run already finished.
    fn finish_run(
        &self,
        run_id: i64,
        status: RunStatus,
        error_message: Option<&str>,
    ) -> error::Result<SyncRun>;

    /// Run currently holding the endpoint slot.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    fn active_run(&self, endpoint: &EndpointId) -> error::Result<Option<i64>>;

    /// # Errors
    ///
    /// Returns a storage error.
    fn runs_in_progress(&self) -> error::Result<Vec<SyncRun>>;

    /// Refresh the run's heartbeat. Returns `false`, touching nothing, once
    /// the run is no longer `in_progress` under `owner`.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    fn heartbeat_run(&self, run_id: i64, owner: &str) -> error::Result<bool>;

    /// `in_progress` runs whose last heartbeat is older than `stale_before`.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    fn stale_runs(&self, stale_before: DateTime<Utc>) -> error::Result<Vec<SyncRun>>;

    /// Fail a run left behind by a dead owner: record `message` on its batch,
    /// finish it as `error` and release the endpoint, in one transaction.
    /// Returns `None` if the run finished or heartbeated since it was listed.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    fn fail_stale_run(
        &self,
        run_id: i64,
        stale_before: DateTime<Utc>,
        message: &str,
    ) -> error::Result<Option<SyncRun>>;

    /// Take the endpoint slot for an operation outside any run. Returns the
    /// current holder when the slot is taken; nothing is written then.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    fn lock_endpoint(&self, endpoint: &EndpointId, holder: &str)
        -> error::Result<Option<SlotHolder>>;

    /// Refresh a lock's timestamp. Returns `false` if `holder` lost the lock.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    fn refresh_endpoint_lock(&self, endpoint: &EndpointId, holder: &str) -> error::Result<bool>;

    /// Release a lock taken by `holder`. Returns `false` if it was not held.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    fn unlock_endpoint(&self, endpoint: &EndpointId, holder: &str) -> error::Result<bool>;

    /// Release locks not refreshed since `stale_before`. Returns the freed
    /// endpoints with their former holders.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    fn release_stale_locks(
        &self,
        stale_before: DateTime<Utc>,
    ) -> error::Result<Vec<(EndpointId, String)>>;
}

/// Full storage contract.
///
/// Implementations must be `Send + Sync` for use behind `Arc<dyn StateBackend>`.
pub trait StateBackend: BronzeStore + MappingStore + SilverStore + RunStore {}

impl<T: BronzeStore + MappingStore + SilverStore + RunStore> StateBackend for T {}
