//! Ingest error taxonomy and retry backoff policy helpers.

use std::time::Duration;

use pfasync_state::{SlotHolder, StateError};
use pfasync_types::error::{BackoffClass, FetchError};
use pfasync_types::ids::{BatchId, EndpointId};

use crate::config::types::ResourceConfig;

/// Multiplier applied to the base delay for throttling errors.
const SLOW_BACKOFF_FACTOR: u64 = 5;

/// Categorized engine error.
///
/// Per-record problems never surface here: they degrade to null values,
/// batch warnings and dead letters.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Retryable source failure that outlived the retry budget.
    #[error("transient fetch failure in run {run_id} (batch {batch_id}): {source}")]
    TransientFetch {
        run_id: i64,
        batch_id: BatchId,
        #[source]
        source: FetchError,
    },

    /// Source failure that retrying cannot fix (auth, client error, bad body).
    #[error("source rejected run {run_id} (batch {batch_id}): {source}")]
    SourceRejected {
        run_id: i64,
        batch_id: BatchId,
        #[source]
        source: FetchError,
    },

    /// Payload is not a string-keyed object.
    #[error("malformed payload: {0}")]
    Schema(String),

    /// Rule set rejected at save time. Nothing was written.
    #[error("invalid mapping rules for {endpoint_id}: {}", .errors.join("; "))]
    MappingConfig {
        endpoint_id: EndpointId,
        errors: Vec<String>,
    },

    /// Orphan scan attempted on a delta or unsealed batch. Nothing was written.
    #[error("cannot reconcile batch {batch_id}: {reason}")]
    ReconciliationScope { batch_id: BatchId, reason: String },

    /// A run or a recommit holds the endpoint. Nothing was written.
    #[error("endpoint {endpoint_id} is busy with {holder}")]
    ConcurrentRun {
        endpoint_id: EndpointId,
        holder: SlotHolder,
    },

    #[error("not found: {0}")]
    NotFound(String),

    /// Operation not allowed in the entity's current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error(transparent)]
    State(#[from] StateError),

    /// Host-side failure (task join, channel, source construction).
    #[error(transparent)]
    Infrastructure(#[from] anyhow::Error),
}

impl IngestError {
    /// Wrap a fetch failure with run correlation ids.
    pub fn from_fetch(run_id: i64, batch_id: BatchId, source: FetchError) -> Self {
        if source.retryable {
            Self::TransientFetch {
                run_id,
                batch_id,
                source,
            }
        } else {
            Self::SourceRejected {
                run_id,
                batch_id,
                source,
            }
        }
    }

    /// Returns the fetch error behind a source failure.
    pub fn as_fetch_error(&self) -> Option<&FetchError> {
        match self {
            Self::TransientFetch { source, .. } | Self::SourceRejected { source, .. } => {
                Some(source)
            }
            _ => None,
        }
    }

    pub(crate) fn join(what: &str, err: tokio::task::JoinError) -> Self {
        Self::Infrastructure(anyhow::anyhow!("{what} task panicked: {err}"))
    }
}

/// Convenience alias used throughout the engine.
pub type Result<T> = std::result::Result<T, IngestError>;

/// Compute retry delay based on error hints and attempt number.
pub(crate) fn compute_backoff(
    err: &FetchError,
    attempt: u32,
    resources: &ResourceConfig,
) -> Duration {
    if let Some(ms) = err.retry_after_ms {
        return Duration::from_millis(ms.min(resources.backoff_max_ms));
    }

    let base_ms = match err.backoff_class {
        BackoffClass::Normal => resources.backoff_base_ms,
        BackoffClass::Slow => resources.backoff_base_ms.saturating_mul(SLOW_BACKOFF_FACTOR),
    };

    let exponent = attempt.saturating_sub(1).min(32);
    let delay_ms = base_ms.saturating_mul(2u64.saturating_pow(exponent));
    Duration::from_millis(delay_ms.min(resources.backoff_max_ms))
}
