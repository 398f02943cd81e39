//! Ingestion, transformation and lineage engine for Plan-Forecast-Actual data.
//!
//! Raw pages are captured into bronze batches, transformed into silver
//! records under versioned mapping rules, and reconciled against full
//! syncs. [`IngestService`] is the entry point.

pub mod capture;
pub mod config;
pub mod error;
pub mod lineage;
pub mod mapping;
pub mod orchestrator;
pub mod reconcile;
pub mod schema;
pub mod service;
pub mod source;
pub mod transform;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export public API for convenience
pub use error::{IngestError, Result};
pub use orchestrator::{Orchestrator, SyncHandle};
pub use service::{IngestService, IngestServiceBuilder, Progress};
pub use transform::{CommitStats, PreviewRow};
