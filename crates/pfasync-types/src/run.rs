//! Sync run tracking types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::batch::SyncType;
use crate::ids::{BatchId, EndpointId};

/// Lifecycle status of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    InProgress,
    Success,
    Error,
    Cancelled,
}

impl RunStatus {
    /// Wire-format string for storage.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Success => "success",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "success" => Some(Self::Success),
            "error" => Some(Self::Error),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Terminal states never transition again.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Error | Self::Cancelled)
    }

    /// Whether `retry` may create a follow-up run.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Error | Self::Cancelled)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stage a running sync is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Fetching,
    Transforming,
    Reconciling,
    Done,
}

impl RunPhase {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fetching => "fetching",
            Self::Transforming => "transforming",
            Self::Reconciling => "reconciling",
            Self::Done => "done",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "fetching" => Some(Self::Fetching),
            "transforming" => Some(Self::Transforming),
            "reconciling" => Some(Self::Reconciling),
            "done" => Some(Self::Done),
            _ => None,
        }
    }
}

/// Aggregate counters of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounters {
    pub records_processed: u64,
    pub records_inserted: u64,
    pub records_updated: u64,
    pub records_unchanged: u64,
    pub records_deleted: u64,
}

/// One execution of the sync state machine for an endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRun {
    pub id: i64,
    pub endpoint_id: EndpointId,
    pub batch_id: BatchId,
    pub sync_type: SyncType,
    pub status: RunStatus,
    pub phase: RunPhase,
    pub counters: RunCounters,
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_of: Option<i64>,
    pub cancel_requested: bool,
    /// Process that executes the run; only it may advance the run.
    pub owner: String,
    /// Last liveness signal from the owner. Recovery fails runs whose
    /// heartbeat is older than the lease.
    pub heartbeat_at: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}
