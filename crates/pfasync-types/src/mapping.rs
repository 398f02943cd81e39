//! Field-mapping configuration: rules, transform kinds and version snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::EndpointId;

/// Destination type of a mapped field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    String,
    Integer,
    Float,
    Boolean,
    Date,
    #[serde(rename = "datetime")]
    DateTime,
    Json,
}

impl DataType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::DateTime => "datetime",
            Self::Json => "json",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "string" => Some(Self::String),
            "integer" => Some(Self::Integer),
            "float" => Some(Self::Float),
            "boolean" => Some(Self::Boolean),
            "date" => Some(Self::Date),
            "datetime" => Some(Self::DateTime),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// How a source value is converted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformType {
    Direct,
    Date,
    Boolean,
    Numeric,
    Custom,
}

impl TransformType {
    pub const ALL: [Self; 5] = [
        Self::Direct,
        Self::Date,
        Self::Boolean,
        Self::Numeric,
        Self::Custom,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Date => "date",
            Self::Boolean => "boolean",
            Self::Numeric => "numeric",
            Self::Custom => "custom",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == raw)
    }
}

impl std::fmt::Display for TransformType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_active() -> bool {
    true
}

/// One source-field to destination-field conversion rule.
///
/// Equality is field-for-field; registry ids live on [`ActiveRule`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingRule {
    pub source_field: String,
    pub destination_field: String,
    pub data_type: DataType,
    pub transform_type: TransformType,
    #[serde(default)]
    pub transform_params: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<serde_json::Value>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

impl MappingRule {
    /// Shorthand for an active rule without params or default.
    #[must_use]
    pub fn new(
        source_field: impl Into<String>,
        destination_field: impl Into<String>,
        data_type: DataType,
        transform_type: TransformType,
    ) -> Self {
        Self {
            source_field: source_field.into(),
            destination_field: destination_field.into(),
            data_type,
            transform_type,
            transform_params: serde_json::Map::new(),
            default_value: None,
            is_active: true,
        }
    }

    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.transform_params.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn with_default(mut self, value: serde_json::Value) -> Self {
        self.default_value = Some(value);
        self
    }
}

/// A rule as stored in the live registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveRule {
    pub id: i64,
    pub endpoint_id: EndpointId,
    pub rule: MappingRule,
    pub updated_at: DateTime<Utc>,
}

/// Why a snapshot was frozen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotReason {
    Manual,
    BeforeBulkReplace,
    BeforeRestore,
    Commit,
}

impl SnapshotReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::BeforeBulkReplace => "before_bulk_replace",
            Self::BeforeRestore => "before_restore",
            Self::Commit => "commit",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "manual" => Some(Self::Manual),
            "before_bulk_replace" => Some(Self::BeforeBulkReplace),
            "before_restore" => Some(Self::BeforeRestore),
            "commit" => Some(Self::Commit),
            _ => None,
        }
    }
}

/// Immutable, point-in-time copy of an endpoint's rule set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingVersionSnapshot {
    pub id: i64,
    pub endpoint_id: EndpointId,
    pub captured_at: DateTime<Utc>,
    pub reason: SnapshotReason,
    /// Hex sha256 of the canonical JSON encoding of `rules`.
    pub rules_hash: String,
    pub rules: Vec<MappingRule>,
}
