//! Schema drift between the two most recent sealed batches of an endpoint.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate};
use serde::Serialize;
use serde_json::Value;

use pfasync_state::StateBackend;
use pfasync_types::batch::RawPayload;
use pfasync_types::ids::{BatchId, EndpointId};
use pfasync_types::mapping::{DataType, MappingRule, TransformType};

use super::fingerprint::field_set;
use super::matcher::{FieldMatcher, MatchKind};
use crate::error::Result;
use crate::mapping::custom::to_snake_case;

/// Type observed for a raw JSON value.
///
/// Variant order is the tie-break order of the majority vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InferredType {
    Boolean,
    Integer,
    Float,
    Date,
    DateTime,
    String,
    Array,
    Object,
}

impl InferredType {
    /// Classify one value. `None` for JSON null.
    pub fn of(value: &Value) -> Option<Self> {
        let inferred = match value {
            Value::Null => return None,
            Value::Bool(_) => Self::Boolean,
            Value::Number(n) if n.is_i64() || n.is_u64() => Self::Integer,
            Value::Number(_) => Self::Float,
            Value::String(s) if NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok() => Self::Date,
            Value::String(s) if DateTime::parse_from_rfc3339(s).is_ok() => Self::DateTime,
            Value::String(_) => Self::String,
            Value::Array(_) => Self::Array,
            Value::Object(_) => Self::Object,
        };
        Some(inferred)
    }

    /// Rule stub types for a field of this type.
    fn rule_types(self) -> (DataType, TransformType) {
        match self {
            Self::Boolean => (DataType::Boolean, TransformType::Boolean),
            Self::Integer => (DataType::Integer, TransformType::Numeric),
            Self::Float => (DataType::Float, TransformType::Numeric),
            Self::Date => (DataType::Date, TransformType::Date),
            Self::DateTime => (DataType::DateTime, TransformType::Date),
            Self::String => (DataType::String, TransformType::Direct),
            Self::Array | Self::Object => (DataType::Json, TransformType::Direct),
        }
    }
}

/// A shared field whose dominant type moved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeChange {
    pub field: String,
    pub before: InferredType,
    pub after: InferredType,
}

/// Proposed rule for a newly observed field. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MappingSuggestion {
    pub rule: MappingRule,
    pub match_kind: MatchKind,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DriftReport {
    pub endpoint_id: EndpointId,
    pub newer_batch_id: Option<BatchId>,
    pub older_batch_id: Option<BatchId>,
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub type_changed: Vec<TypeChange>,
    pub suggestions: Vec<MappingSuggestion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl DriftReport {
    fn empty(endpoint_id: EndpointId, note: impl Into<String>) -> Self {
        Self {
            endpoint_id,
            newer_batch_id: None,
            older_batch_id: None,
            added: Vec::new(),
            removed: Vec::new(),
            type_changed: Vec::new(),
            suggestions: Vec::new(),
            note: Some(note.into()),
        }
    }

    /// True when the two samples expose the same fields with the same types.
    pub fn is_clean(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.type_changed.is_empty()
    }
}

/// Majority type per field, ignoring nulls. Fields seen only as null are absent.
pub fn dominant_types<'a>(
    payloads: impl IntoIterator<Item = &'a RawPayload>,
) -> BTreeMap<String, InferredType> {
    let mut votes: BTreeMap<&str, BTreeMap<InferredType, u32>> = BTreeMap::new();
    for payload in payloads {
        for (field, value) in payload {
            if let Some(kind) = InferredType::of(value) {
                *votes.entry(field).or_default().entry(kind).or_default() += 1;
            }
        }
    }

    votes
        .into_iter()
        .filter_map(|(field, counts)| {
            // Iteration is in type order, so `>` keeps the earliest on a tie.
            let mut best: Option<(InferredType, u32)> = None;
            for (kind, count) in counts {
                if best.map_or(true, |(_, top)| count > top) {
                    best = Some((kind, count));
                }
            }
            best.map(|(kind, _)| (field.to_string(), kind))
        })
        .collect()
}

/// Field-level comparison of two samples, without suggestions.
pub fn compare_samples(
    older: &[RawPayload],
    newer: &[RawPayload],
) -> (Vec<String>, Vec<String>, Vec<TypeChange>) {
    let old_fields = field_set(older);
    let new_fields = field_set(newer);

    let added = new_fields.difference(&old_fields).cloned().collect();
    let removed = old_fields.difference(&new_fields).cloned().collect();

    let old_types = dominant_types(older);
    let new_types = dominant_types(newer);
    let type_changed = old_fields
        .intersection(&new_fields)
        .filter_map(|field| {
            let before = *old_types.get(field)?;
            let after = *new_types.get(field)?;
            (before != after).then(|| TypeChange {
                field: field.clone(),
                before,
                after,
            })
        })
        .collect();

    (added, removed, type_changed)
}

/// One suggestion per added field.
pub fn suggest_rules(
    added: &[String],
    newer: &[RawPayload],
    candidates: &[String],
    matcher: &dyn FieldMatcher,
) -> Vec<MappingSuggestion> {
    let types = dominant_types(newer);
    added
        .iter()
        .map(|field| {
            let (data_type, transform_type) = types
                .get(field)
                .copied()
                .unwrap_or(InferredType::String)
                .rule_types();
            let (destination, match_kind, confidence) =
                match matcher.best_match(field, candidates) {
                    Some(found) => (found.candidate, found.kind, found.confidence),
                    None => (to_snake_case(field), MatchKind::Derived, 0.0),
                };
            MappingSuggestion {
                rule: MappingRule::new(field.clone(), destination, data_type, transform_type),
                match_kind,
                confidence,
            }
        })
        .collect()
}

/// Compare the two most recent sealed batches of `endpoint`.
///
/// `destination_fields` are the configured candidates; destinations of the
/// endpoint's active rules are added to them.
///
/// # Errors
///
/// Returns a storage error.
pub fn analyze_drift(
    backend: &dyn StateBackend,
    endpoint: &EndpointId,
    destination_fields: &[String],
    sample_size: u32,
    matcher: &dyn FieldMatcher,
) -> Result<DriftReport> {
    let batches = backend.latest_sealed_batches(endpoint, 2)?;
    let [newer_batch, older_batch] = batches.as_slice() else {
        return Ok(DriftReport::empty(
            endpoint.clone(),
            format!(
                "drift needs two sealed batches; endpoint has {}",
                batches.len()
            ),
        ));
    };

    let sample = |batch_id: &BatchId| -> Result<Vec<RawPayload>> {
        Ok(backend
            .raw_records_after(batch_id, 0, sample_size)?
            .into_iter()
            .map(|record| record.payload)
            .collect())
    };
    let newer = sample(&newer_batch.id)?;
    let older = sample(&older_batch.id)?;

    let mut candidates: BTreeSet<String> = destination_fields.iter().cloned().collect();
    candidates.extend(
        backend
            .active_rules(endpoint)?
            .into_iter()
            .filter(|active| active.rule.is_active)
            .map(|active| active.rule.destination_field),
    );
    let candidates: Vec<String> = candidates.into_iter().collect();

    let (added, removed, type_changed) = compare_samples(&older, &newer);
    let suggestions = suggest_rules(&added, &newer, &candidates, matcher);

    tracing::debug!(
        endpoint_id = %endpoint,
        newer_batch_id = %newer_batch.id,
        older_batch_id = %older_batch.id,
        added = added.len(),
        removed = removed.len(),
        type_changed = type_changed.len(),
        "Schema drift analysed"
    );

    Ok(DriftReport {
        endpoint_id: endpoint.clone(),
        newer_batch_id: Some(newer_batch.id.clone()),
        older_batch_id: Some(older_batch.id.clone()),
        added,
        removed,
        type_changed,
        suggestions,
        note: None,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::schema::matcher::NormalizedEditDistanceMatcher;

    fn payloads(values: &[Value]) -> Vec<RawPayload> {
        values
            .iter()
            .map(|v| v.as_object().cloned().unwrap())
            .collect()
    }

    #[test]
    fn added_and_removed_fields() {
        let older = payloads(&[json!({"a": 1, "b": 2, "c": 3})]);
        let newer = payloads(&[json!({"a": 1, "c": 3, "d": 4})]);
        let (added, removed, changed) = compare_samples(&older, &newer);
        assert_eq!(added, vec!["d"]);
        assert_eq!(removed, vec!["b"]);
        assert!(changed.is_empty());
    }

    #[test]
    fn majority_vote_ignores_nulls() {
        let sample = payloads(&[
            json!({"v": 1}),
            json!({"v": null}),
            json!({"v": null}),
            json!({"v": "x"}),
            json!({"v": 2}),
        ]);
        assert_eq!(dominant_types(&sample)["v"], InferredType::Integer);
    }

    #[test]
    fn vote_tie_prefers_earlier_type() {
        let sample = payloads(&[json!({"v": "text"}), json!({"v": true})]);
        assert_eq!(dominant_types(&sample)["v"], InferredType::Boolean);
    }

    #[test]
    fn type_change_detected() {
        let older = payloads(&[json!({"start": "2024-01-01"}), json!({"start": "2024-02-01"})]);
        let newer = payloads(&[json!({"start": 1_704_067_200_000_i64})]);
        let (_, _, changed) = compare_samples(&older, &newer);
        assert_eq!(
            changed,
            vec![TypeChange {
                field: "start".into(),
                before: InferredType::Date,
                after: InferredType::Integer,
            }]
        );
    }

    #[test]
    fn all_null_field_has_no_type_change() {
        let older = payloads(&[json!({"x": null})]);
        let newer = payloads(&[json!({"x": 5})]);
        let (_, _, changed) = compare_samples(&older, &newer);
        assert!(changed.is_empty());
    }

    #[test]
    fn suggestions_match_or_derive() {
        let newer = payloads(&[json!({"StartDate": "2024-03-01", "Owner Name": "ann"})]);
        let added = vec!["Owner Name".to_string(), "StartDate".to_string()];
        let candidates = vec!["start_date".to_string()];
        let suggestions = suggest_rules(
            &added,
            &newer,
            &candidates,
            &NormalizedEditDistanceMatcher::default(),
        );

        assert_eq!(suggestions[0].match_kind, MatchKind::Derived);
        assert_eq!(suggestions[0].rule.destination_field, "owner_name");
        assert_eq!(suggestions[0].rule.transform_type, TransformType::Direct);

        assert_eq!(suggestions[1].match_kind, MatchKind::Exact);
        assert_eq!(suggestions[1].rule.destination_field, "start_date");
        assert_eq!(suggestions[1].rule.data_type, DataType::Date);
        assert_eq!(suggestions[1].rule.transform_type, TransformType::Date);
    }

    #[test]
    fn empty_report_carries_note() {
        let report = DriftReport::empty(EndpointId::new("e"), "none");
        assert!(report.is_clean());
        assert_eq!(report.note.as_deref(), Some("none"));
    }
}
