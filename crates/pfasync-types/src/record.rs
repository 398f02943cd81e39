//! Silver-layer types: normalized records and their typed field values.
//!
//! Strong typing starts here. Everything upstream of a
//! [`NormalizedRecord`] is a dynamically typed JSON payload.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{BatchId, EndpointId};

/// Typed value of a normalized field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Null,
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Date(NaiveDate),
    DateTime(DateTime<Utc>),
    Json(serde_json::Value),
}

impl FieldValue {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Natural conversion of a JSON value, used by pass-through mappings.
    #[must_use]
    pub fn from_json(value: &serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Boolean(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Integer(i),
                None => n.as_f64().map_or(Self::Null, Self::Float),
            },
            Value::String(s) => Self::Text(s.clone()),
            Value::Array(_) | Value::Object(_) => Self::Json(value.clone()),
        }
    }

    /// Plain JSON rendering without the type tag.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            Self::Null => Value::Null,
            Self::Text(s) => Value::String(s.clone()),
            Self::Integer(i) => Value::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f).map_or(Value::Null, Value::Number),
            Self::Boolean(b) => Value::Bool(*b),
            Self::Date(d) => Value::String(d.format("%Y-%m-%d").to_string()),
            Self::DateTime(dt) => Value::String(dt.to_rfc3339()),
            Self::Json(v) => v.clone(),
        }
    }
}

/// Mapped fields of one record, ordered by destination name.
pub type Fields = BTreeMap<String, FieldValue>;

/// Identity of a normalized record inside an endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NaturalKey {
    pub scope: String,
    pub external_id: String,
}

impl NaturalKey {
    #[must_use]
    pub fn new(scope: impl Into<String>, external_id: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            external_id: external_id.into(),
        }
    }
}

impl std::fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.scope, self.external_id)
    }
}

/// Silver record, upserted by natural key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub id: i64,
    pub endpoint_id: EndpointId,
    pub natural_key: NaturalKey,
    pub fields: Fields,
    pub last_seen_at: DateTime<Utc>,
    pub last_seen_batch_id: BatchId,
    pub is_discontinued: bool,
    pub updated_at: DateTime<Utc>,
}
