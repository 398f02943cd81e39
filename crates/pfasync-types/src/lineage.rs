//! Provenance links from silver records back to bronze.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::BatchId;

/// Current provenance of a normalized record. One per record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineageEdge {
    pub normalized_record_id: i64,
    pub raw_record_id: i64,
    pub batch_id: BatchId,
    pub mapping_version_id: i64,
    pub transformed_at: DateTime<Utc>,
    pub transformed_by: String,
}
