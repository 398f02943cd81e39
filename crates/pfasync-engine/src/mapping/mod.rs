//! Field mapping: rule application, the transform catalog and save-time validation.

pub mod apply;
pub mod custom;
pub mod transforms;
pub mod validate;

pub use apply::{apply_mapping, FieldWarning, MappedRecord};
pub use custom::{to_snake_case, CustomFunction};
pub use validate::{parse_rules, validate_rules};
