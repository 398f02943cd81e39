//! Bronze-layer types: capture batches and raw records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{BatchId, EndpointId};

/// Dynamically typed payload exactly as received from the source.
pub type RawPayload = serde_json::Map<String, serde_json::Value>;

/// How much of the source a sync covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncType {
    /// Complete snapshot; enables orphan reconciliation.
    Full,
    /// Changes only; never reconciles.
    Delta,
}

impl SyncType {
    /// Wire-format string for storage.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Delta => "delta",
        }
    }

    /// Parse the storage representation.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "full" => Some(Self::Full),
            "delta" => Some(Self::Delta),
            _ => None,
        }
    }
}

impl std::fmt::Display for SyncType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One capture of an endpoint. Sealed (`completed_at` set) only on success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub id: BatchId,
    pub endpoint_id: EndpointId,
    pub scope: String,
    pub sync_type: SyncType,
    pub ingested_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub record_count: u64,
    pub schema_fingerprint: Option<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl Batch {
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.completed_at.is_some()
    }
}

/// Immutable raw record belonging to exactly one batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub id: i64,
    pub batch_id: BatchId,
    /// Value of the endpoint key field, extracted at capture time.
    pub external_id: String,
    pub payload: RawPayload,
    pub ingested_at: DateTime<Utc>,
    /// Short fingerprint of this record's own field set.
    pub schema_version: String,
    pub entity_type: String,
}

/// A raw record that passed capture validation but is not yet stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRawRecord {
    pub external_id: String,
    pub payload: RawPayload,
    pub schema_version: String,
}

/// Listing filter for batch history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryFilter {
    pub endpoint_id: Option<EndpointId>,
    pub sync_type: Option<SyncType>,
    #[serde(default)]
    pub sealed_only: bool,
}
