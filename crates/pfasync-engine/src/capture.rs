//! Turning fetched JSON values into raw records.
//!
//! Capture never transforms: the payload is stored exactly as received. A
//! value that cannot be stored (not an object, no usable key) becomes a
//! schema dead letter and a batch warning, and the page continues.

use chrono::Utc;
use serde_json::Value;

use pfasync_types::batch::NewRawRecord;
use pfasync_types::dead_letter::{DeadLetter, DeadLetterKind};
use pfasync_types::ids::BatchId;

use crate::schema::fingerprint::record_schema_version;

/// Output of capturing one page.
#[derive(Debug, Default)]
pub struct CapturedPage {
    pub records: Vec<NewRawRecord>,
    pub rejects: Vec<DeadLetter>,
    pub warnings: Vec<String>,
}

/// Render the natural key of a payload. Strings are trimmed; integers are
/// formatted; anything else is unusable.
pub fn external_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(n.to_string()),
        _ => None,
    }
}

/// Split a fetched page into storable records and rejects.
pub fn capture_page(
    values: Vec<Value>,
    key_field: &str,
    batch_id: &BatchId,
    run_id: i64,
    page_no: u64,
) -> CapturedPage {
    let mut page = CapturedPage::default();

    for (index, value) in values.into_iter().enumerate() {
        let problem = match &value {
            Value::Object(payload) => match payload.get(key_field).and_then(external_id) {
                Some(id) => {
                    page.records.push(NewRawRecord {
                        schema_version: record_schema_version(payload),
                        external_id: id,
                        payload: payload.clone(),
                    });
                    continue;
                }
                None => format!("missing or unusable key field '{key_field}'"),
            },
            other => format!("payload is not an object ({})", json_kind(other)),
        };

        page.warnings
            .push(format!("page {page_no} record {index}: {problem}"));
        page.rejects.push(DeadLetter {
            batch_id: batch_id.clone(),
            run_id: Some(run_id),
            raw_record_id: None,
            record_json: value.to_string(),
            error_message: problem,
            kind: DeadLetterKind::Schema,
            failed_at: Utc::now(),
        });
    }

    page
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
