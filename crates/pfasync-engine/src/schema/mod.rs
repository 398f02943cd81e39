//! Schema fingerprinting and drift analysis over bronze samples.

pub mod drift;
pub mod fingerprint;
pub mod matcher;

pub use drift::{analyze_drift, DriftReport, InferredType, MappingSuggestion, TypeChange};
pub use fingerprint::{batch_fingerprint, field_set, record_schema_version};
pub use matcher::{FieldMatch, FieldMatcher, MatchKind, NormalizedEditDistanceMatcher};
