//! Records and values that could not be captured or transformed cleanly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::BatchId;

/// Where the data-quality issue was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterKind {
    /// Malformed payload skipped at capture time.
    Schema,
    /// Field-level transform degraded to null or default.
    Transform,
}

impl DeadLetterKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Schema => "schema",
            Self::Transform => "transform",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "schema" => Some(Self::Schema),
            "transform" => Some(Self::Transform),
            _ => None,
        }
    }
}

/// A captured data-quality issue, kept for inspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub batch_id: BatchId,
    pub run_id: Option<i64>,
    /// Bronze record a transform letter belongs to. Unset for capture rejects,
    /// which never reached bronze.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_record_id: Option<i64>,
    /// JSON-serialized record content (or the offending value).
    pub record_json: String,
    pub error_message: String,
    pub kind: DeadLetterKind,
    pub failed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dead_letter_roundtrip() {
        let rec = DeadLetter {
            batch_id: BatchId::new("b-1"),
            run_id: Some(3),
            raw_record_id: None,
            record_json: r#"{"name": "x"}"#.into(),
            error_message: "missing key field 'id'".into(),
            kind: DeadLetterKind::Schema,
            failed_at: Utc::now(),
        };
        let json = serde_json::to_string(&rec).unwrap();
        let back: DeadLetter = serde_json::from_str(&json).unwrap();
        assert_eq!(rec, back);
    }
}
