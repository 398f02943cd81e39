//! Save-time checks for rule sets. Every problem is collected so the caller
//! sees the whole list at once.

use std::collections::HashSet;

use serde_json::Value;

use pfasync_types::mapping::{DataType, MappingRule, TransformType};

use super::custom::CustomFunction;

const DATA_TYPES: [DataType; 7] = [
    DataType::String,
    DataType::Integer,
    DataType::Float,
    DataType::Boolean,
    DataType::Date,
    DataType::DateTime,
    DataType::Json,
];

fn known_names<T: Copy>(all: &[T], name: fn(T) -> &'static str) -> String {
    all.iter().map(|t| name(*t)).collect::<Vec<_>>().join(", ")
}

/// Decode untyped rule objects, reporting unknown type names by rule index.
///
/// # Errors
///
/// Returns every problem found; nothing is decoded partially.
pub fn parse_rules(raw: &Value) -> Result<Vec<MappingRule>, Vec<String>> {
    let Some(items) = raw.as_array() else {
        return Err(vec!["rules must be a list".into()]);
    };

    let mut rules = Vec::with_capacity(items.len());
    let mut errors = Vec::new();
    for (index, item) in items.iter().enumerate() {
        let before = errors.len();
        match item.get("transform_type").and_then(Value::as_str) {
            Some(name) if TransformType::parse(name).is_none() => errors.push(format!(
                "rule {index}: unknown transform type '{name}' (expected one of {})",
                known_names(&TransformType::ALL, TransformType::as_str)
            )),
            _ => {}
        }
        match item.get("data_type").and_then(Value::as_str) {
            Some(name) if DataType::parse(name).is_none() => errors.push(format!(
                "rule {index}: unknown data type '{name}' (expected one of {})",
                known_names(&DATA_TYPES, DataType::as_str)
            )),
            _ => {}
        }
        if errors.len() > before {
            continue;
        }
        match serde_json::from_value::<MappingRule>(item.clone()) {
            Ok(rule) => rules.push(rule),
            Err(e) => errors.push(format!("rule {index}: {e}")),
        }
    }

    if errors.is_empty() {
        Ok(rules)
    } else {
        Err(errors)
    }
}

/// Semantic checks on a typed rule set.
///
/// # Errors
///
/// Returns every problem found.
pub fn validate_rules(rules: &[MappingRule]) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();
    let mut destinations = HashSet::new();

    for (index, rule) in rules.iter().enumerate() {
        let label = format!("rule {index} ({} -> {})", rule.source_field, rule.destination_field);
        if rule.source_field.trim().is_empty() {
            errors.push(format!("rule {index}: source_field must not be empty"));
        }
        if rule.destination_field.trim().is_empty() {
            errors.push(format!("rule {index}: destination_field must not be empty"));
        }
        if rule.is_active && !destinations.insert(rule.destination_field.as_str()) {
            errors.push(format!(
                "{label}: destination '{}' is already mapped by another active rule",
                rule.destination_field
            ));
        }
        check_params(rule, &label, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_params(rule: &MappingRule, label: &str, errors: &mut Vec<String>) {
    let params = &rule.transform_params;
    match rule.transform_type {
        TransformType::Date => {
            if params.get("format").is_some_and(|f| !f.is_string()) {
                errors.push(format!("{label}: params.format must be a string"));
            }
        }
        TransformType::Numeric => match params.get("decimal_separator") {
            None => {}
            Some(Value::String(s)) if s == "." || s == "," => {}
            Some(_) => errors.push(format!("{label}: params.decimal_separator must be '.' or ','")),
        },
        TransformType::Custom => check_custom(params, label, errors),
        TransformType::Direct | TransformType::Boolean => {}
    }
}

fn check_custom(params: &serde_json::Map<String, Value>, label: &str, errors: &mut Vec<String>) {
    let Some(name) = params.get("function").and_then(Value::as_str) else {
        errors.push(format!("{label}: custom rules need params.function"));
        return;
    };
    let Some(function) = CustomFunction::parse(name) else {
        errors.push(format!(
            "{label}: unknown custom function '{name}' (expected one of {})",
            known_names(&CustomFunction::ALL, CustomFunction::as_str)
        ));
        return;
    };

    match function {
        CustomFunction::ValueMap => {
            if !params.get("map").is_some_and(Value::is_object) {
                errors.push(format!("{label}: value_map needs a 'map' object"));
            }
        }
        CustomFunction::FirstNonEmpty | CustomFunction::Concat => {
            let fields_ok = params
                .get("fields")
                .and_then(Value::as_array)
                .is_some_and(|fields| !fields.is_empty() && fields.iter().all(Value::is_string));
            if !fields_ok {
                errors.push(format!("{label}: {name} needs a non-empty 'fields' list of strings"));
            }
            if params.get("separator").is_some_and(|s| !s.is_string()) {
                errors.push(format!("{label}: params.separator must be a string"));
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn accepts_well_formed_rules() {
        let rules = vec![
            MappingRule::new("Start", "start_date", DataType::Date, TransformType::Date),
            MappingRule::new("Status", "status", DataType::String, TransformType::Custom)
                .with_param("function", json!("value_map"))
                .with_param("map", json!({"A": "active"})),
        ];
        assert!(validate_rules(&rules).is_ok());
    }

    #[test]
    fn collects_every_problem() {
        let rules = vec![
            MappingRule::new("", "x", DataType::String, TransformType::Direct),
            MappingRule::new("a", "x", DataType::String, TransformType::Direct),
            MappingRule::new("b", "y", DataType::String, TransformType::Custom)
                .with_param("function", json!("eval")),
            MappingRule::new("c", "z", DataType::String, TransformType::Custom)
                .with_param("function", json!("value_map")),
        ];
        let errors = validate_rules(&rules).unwrap_err();
        assert_eq!(errors.len(), 4, "{errors:?}");
        assert!(errors[1].contains("already mapped"));
        assert!(errors[2].contains("unknown custom function 'eval'"));
        assert!(errors[3].contains("'map' object"));
    }

    #[test]
    fn inactive_duplicates_are_allowed() {
        let mut old = MappingRule::new("a", "x", DataType::String, TransformType::Direct);
        old.is_active = false;
        let rules = vec![old, MappingRule::new("b", "x", DataType::String, TransformType::Direct)];
        assert!(validate_rules(&rules).is_ok());
    }

    #[test]
    fn concat_needs_string_fields() {
        let rules = vec![MappingRule::new("a", "x", DataType::String, TransformType::Custom)
            .with_param("function", json!("concat"))
            .with_param("fields", json!(["a", 1]))];
        assert!(validate_rules(&rules).is_err());
    }

    #[test]
    fn parse_names_unknown_transform() {
        let raw = json!([
            {"source_field": "a", "destination_field": "b", "data_type": "string", "transform_type": "script"},
            {"source_field": "c", "destination_field": "d", "data_type": "decimal", "transform_type": "direct"}
        ]);
        let errors = parse_rules(&raw).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].starts_with("rule 0: unknown transform type 'script'"));
        assert!(errors[1].starts_with("rule 1: unknown data type 'decimal'"));
    }

    #[test]
    fn parse_valid_rules() {
        let raw = json!([
            {"source_field": "a", "destination_field": "b", "data_type": "datetime", "transform_type": "date"}
        ]);
        let rules = parse_rules(&raw).unwrap();
        assert_eq!(rules[0].data_type, DataType::DateTime);
    }
}
