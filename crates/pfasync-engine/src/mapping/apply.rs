//! Rule application over one raw payload.

use serde::Serialize;
use serde_json::Value;

use pfasync_types::batch::RawPayload;
use pfasync_types::mapping::{MappingRule, TransformType};
use pfasync_types::record::{FieldValue, Fields};

use super::custom::CustomFunction;
use super::transforms::{self, TransformResult};

/// A value that could not be converted and fell back to its default or null.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldWarning {
    pub source_field: String,
    pub destination_field: String,
    pub message: String,
}

impl std::fmt::Display for FieldWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} -> {}: {}",
            self.source_field, self.destination_field, self.message
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MappedRecord {
    pub fields: Fields,
    pub warnings: Vec<FieldWarning>,
}

/// Read a source field: exact key first, then a dotted path into nested objects.
pub(crate) fn read_field<'a>(payload: &'a RawPayload, field: &str) -> Option<&'a Value> {
    if let Some(value) = payload.get(field) {
        return Some(value);
    }
    let (head, rest) = field.split_once('.')?;
    let mut current = payload.get(head)?;
    for segment in rest.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Apply every active rule to `payload`. Never fails: conversion problems
/// become warnings and the field falls back to its default or null.
pub fn apply_mapping(payload: &RawPayload, rules: &[MappingRule]) -> MappedRecord {
    let mut mapped = MappedRecord::default();

    for rule in rules.iter().filter(|rule| rule.is_active) {
        let outcome = match custom_function(rule) {
            Some(function) if function.reads_many() => {
                function.apply_many(payload, &rule.transform_params)
            }
            _ => match read_field(payload, &rule.source_field) {
                Some(value) if !value.is_null() => convert(rule, value),
                _ => Ok(default_value(rule)),
            },
        };

        let value = match outcome {
            Ok(FieldValue::Null) if rule.default_value.is_some() => default_value(rule),
            Ok(value) => value,
            Err(message) => {
                mapped.warnings.push(FieldWarning {
                    source_field: rule.source_field.clone(),
                    destination_field: rule.destination_field.clone(),
                    message,
                });
                default_value(rule)
            }
        };
        mapped.fields.insert(rule.destination_field.clone(), value);
    }

    mapped
}

fn custom_function(rule: &MappingRule) -> Option<CustomFunction> {
    (rule.transform_type == TransformType::Custom)
        .then(|| CustomFunction::from_params(&rule.transform_params))
        .flatten()
}

fn convert(rule: &MappingRule, value: &Value) -> TransformResult {
    let params = &rule.transform_params;
    match rule.transform_type {
        TransformType::Direct => transforms::direct(value, rule.data_type),
        TransformType::Date => transforms::date(value, rule.data_type, params),
        TransformType::Boolean => transforms::boolean(value),
        TransformType::Numeric => transforms::numeric(value, rule.data_type, params),
        TransformType::Custom => match custom_function(rule) {
            Some(function) => function.apply_one(value, params),
            None => Err("unknown custom function".into()),
        },
    }
}

/// The rule's default, coerced through its own transform when possible.
fn default_value(rule: &MappingRule) -> FieldValue {
    match &rule.default_value {
        None | Some(Value::Null) => FieldValue::Null,
        Some(raw) => convert(rule, raw).unwrap_or_else(|_| FieldValue::from_json(raw)),
    }
}
