//! Fixed catalog of named pure functions for `custom` rules.

use serde_json::{Map, Value};

use pfasync_types::batch::RawPayload;
use pfasync_types::record::FieldValue;

use super::transforms::{decimal_separator, parse_number, TransformResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CustomFunction {
    Trim,
    Uppercase,
    Lowercase,
    ToSnakeCase,
    PercentToRatio,
    ValueMap,
    FirstNonEmpty,
    Concat,
}

impl CustomFunction {
    pub const ALL: [Self; 8] = [
        Self::Trim,
        Self::Uppercase,
        Self::Lowercase,
        Self::ToSnakeCase,
        Self::PercentToRatio,
        Self::ValueMap,
        Self::FirstNonEmpty,
        Self::Concat,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trim => "trim",
            Self::Uppercase => "uppercase",
            Self::Lowercase => "lowercase",
            Self::ToSnakeCase => "to_snake_case",
            Self::PercentToRatio => "percent_to_ratio",
            Self::ValueMap => "value_map",
            Self::FirstNonEmpty => "first_non_empty",
            Self::Concat => "concat",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.as_str() == raw)
    }

    /// Function named by a rule's `params.function`.
    pub fn from_params(params: &Map<String, Value>) -> Option<Self> {
        params
            .get("function")
            .and_then(Value::as_str)
            .and_then(Self::parse)
    }

    /// Reads `params.fields` from the payload instead of the rule's source field.
    pub fn reads_many(self) -> bool {
        matches!(self, Self::FirstNonEmpty | Self::Concat)
    }

    /// Apply a single-input function to a non-null value.
    pub fn apply_one(self, value: &Value, params: &Map<String, Value>) -> TransformResult {
        match self {
            Self::Trim => text(value).map(|s| FieldValue::Text(s.trim().to_string())),
            Self::Uppercase => text(value).map(|s| FieldValue::Text(s.to_uppercase())),
            Self::Lowercase => text(value).map(|s| FieldValue::Text(s.to_lowercase())),
            Self::ToSnakeCase => text(value).map(|s| FieldValue::Text(to_snake_case(&s))),
            Self::PercentToRatio => percent_to_ratio(value, params),
            Self::ValueMap => value_map(value, params),
            Self::FirstNonEmpty | Self::Concat => self.apply_many(&Map::new(), params),
        }
    }

    /// Apply a multi-field function against the whole payload.
    pub fn apply_many(self, payload: &RawPayload, params: &Map<String, Value>) -> TransformResult {
        let values = param_fields(params)
            .into_iter()
            .filter_map(|field| super::apply::read_field(payload, field))
            .filter(|value| !is_blank(value));

        match self {
            Self::FirstNonEmpty => Ok(values
                .map(FieldValue::from_json)
                .next()
                .unwrap_or(FieldValue::Null)),
            Self::Concat => {
                let separator = params
                    .get("separator")
                    .and_then(Value::as_str)
                    .unwrap_or(" ");
                let parts: Vec<String> = values.map(render).collect();
                Ok(if parts.is_empty() {
                    FieldValue::Null
                } else {
                    FieldValue::Text(parts.join(separator))
                })
            }
            _ => Err(format!("{} takes a single source field", self.as_str())),
        }
    }
}

/// `StartDate`, `start date` and `HTTPServer` become `start_date`,
/// `start_date` and `http_server`.
pub fn to_snake_case(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if !c.is_alphanumeric() {
            if !out.is_empty() && !out.ends_with('_') {
                out.push('_');
            }
            continue;
        }
        if c.is_uppercase() && i > 0 && !out.is_empty() && !out.ends_with('_') {
            let prev = chars[i - 1];
            let next_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            if prev.is_lowercase() || prev.is_ascii_digit() || (prev.is_uppercase() && next_lower) {
                out.push('_');
            }
        }
        out.extend(c.to_lowercase());
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

pub(crate) fn param_fields(params: &Map<String, Value>) -> Vec<&str> {
    params
        .get("fields")
        .and_then(Value::as_array)
        .map(|fields| fields.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

fn text(value: &Value) -> Result<String, String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(_) | Value::Bool(_) => Ok(value.to_string()),
        other => Err(format!("expected text, got {other}")),
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn percent_to_ratio(value: &Value, params: &Map<String, Value>) -> TransformResult {
    let percent = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_number(s, decimal_separator(params)),
        _ => None,
    }
    .ok_or_else(|| format!("'{value}' is not a percentage"))?;
    Ok(FieldValue::Float(percent / 100.0))
}

fn value_map(value: &Value, params: &Map<String, Value>) -> TransformResult {
    let Some(table) = params.get("map").and_then(Value::as_object) else {
        return Err("value_map needs a 'map' object".into());
    };
    let key = render(value);
    table
        .get(&key)
        .or_else(|| table.get(key.trim()))
        .map(FieldValue::from_json)
        .ok_or_else(|| format!("no mapping for '{key}'"))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[rstest]
    #[case("StartDate", "start_date")]
    #[case("Owner Name", "owner_name")]
    #[case("HTTPServer", "http_server")]
    #[case("plan-value (EUR)", "plan_value_eur")]
    #[case("already_snake", "already_snake")]
    #[case("Q3Budget", "q3_budget")]
    fn snake_case(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(to_snake_case(input), expected);
    }

    #[test]
    fn catalog_names_roundtrip() {
        for function in CustomFunction::ALL {
            assert_eq!(CustomFunction::parse(function.as_str()), Some(function));
        }
        assert_eq!(CustomFunction::parse("eval"), None);
    }

    #[test]
    fn text_functions() {
        let none = Map::new();
        assert_eq!(
            CustomFunction::Trim.apply_one(&json!("  a b "), &none),
            Ok(FieldValue::Text("a b".into()))
        );
        assert_eq!(
            CustomFunction::Uppercase.apply_one(&json!("abc"), &none),
            Ok(FieldValue::Text("ABC".into()))
        );
        assert!(CustomFunction::Lowercase.apply_one(&json!([1]), &none).is_err());
    }

    #[test]
    fn percent_to_ratio_divides() {
        assert_eq!(
            CustomFunction::PercentToRatio.apply_one(&json!("25%"), &Map::new()),
            Ok(FieldValue::Float(0.25))
        );
    }

    #[test]
    fn value_map_lookup() {
        let p = params(json!({"function": "value_map", "map": {"A": "active", "1": true}}));
        assert_eq!(
            CustomFunction::ValueMap.apply_one(&json!("A"), &p),
            Ok(FieldValue::Text("active".into()))
        );
        assert_eq!(
            CustomFunction::ValueMap.apply_one(&json!(1), &p),
            Ok(FieldValue::Boolean(true))
        );
        assert!(CustomFunction::ValueMap.apply_one(&json!("Z"), &p).is_err());
    }

    #[test]
    fn first_non_empty_and_concat() {
        let payload = params(json!({"a": "", "b": null, "c": "third", "d": 4}));
        let p = params(json!({"fields": ["a", "b", "c", "d"], "separator": "-"}));
        assert_eq!(
            CustomFunction::FirstNonEmpty.apply_many(&payload, &p),
            Ok(FieldValue::Text("third".into()))
        );
        assert_eq!(
            CustomFunction::Concat.apply_many(&payload, &p),
            Ok(FieldValue::Text("third-4".into()))
        );
        let missing = params(json!({"fields": ["zz"]}));
        assert_eq!(
            CustomFunction::Concat.apply_many(&payload, &missing),
            Ok(FieldValue::Null)
        );
    }
}
