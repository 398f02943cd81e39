//! Durable record store for the pfasync pipeline.
//!
//! Provides the [`StateBackend`] trait family and a [`SqliteStateBackend`]
//! implementation holding the bronze layer, mapping registry and version
//! history, silver records, lineage, sync runs and dead letters.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions, clippy::must_use_candidate)]

pub mod backend;
pub mod error;
pub mod hashing;
pub mod schema;
pub mod sqlite;

pub use backend::{
    BeginRun, BronzeStore, ChunkOutcome, MappingStore, NewRun, PageWrite, ReplaceOutcome,
    RestoreOutcome, RunStore, SilverChunk, SilverStore, SilverWrite, SlotHolder, StateBackend,
};
pub use error::{Result, StateError};
pub use sqlite::SqliteStateBackend;

/// Convenience re-exports for callers and benches.
pub mod prelude {
    pub use crate::backend::*;
    pub use crate::error::{Result, StateError};
    pub use crate::sqlite::SqliteStateBackend;
    pub use pfasync_types::batch::{Batch, HistoryFilter, NewRawRecord, RawPayload, SyncType};
    pub use pfasync_types::ids::{BatchId, EndpointId, Page};
    pub use pfasync_types::mapping::{DataType, MappingRule, SnapshotReason, TransformType};
    pub use pfasync_types::record::{FieldValue, Fields, NaturalKey};
    pub use pfasync_types::run::{RunCounters, RunPhase, RunStatus};
}
