//! Built-in value transforms. Each returns the converted value or a short
//! reason the input could not be converted.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{Map, Value};

use pfasync_types::mapping::DataType;
use pfasync_types::record::FieldValue;

pub type TransformResult = Result<FieldValue, String>;

/// Date-only layouts, month-first before day-first.
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d.%m.%Y", "%d/%m/%Y"];

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

const CURRENCY_SYMBOLS: &[char] = &['$', '€', '£', '¥', '₹', '₽', '₩', '¢'];

const TRUE_WORDS: &[&str] = &["true", "yes", "y", "t", "1", "on", "x"];
const FALSE_WORDS: &[&str] = &["false", "no", "n", "f", "0", "off"];

/// Natural conversion with light coercion toward the declared type.
pub fn direct(value: &Value, data_type: DataType) -> TransformResult {
    Ok(match (data_type, value) {
        (DataType::Json, _) => FieldValue::Json(value.clone()),
        (DataType::String, Value::Number(n)) => FieldValue::Text(n.to_string()),
        (DataType::String, Value::Bool(b)) => FieldValue::Text(b.to_string()),
        _ => FieldValue::from_json(value),
    })
}

/// Tolerant date parse. Yields `Date`, or `DateTime` for datetime columns.
pub fn date(value: &Value, data_type: DataType, params: &Map<String, Value>) -> TransformResult {
    let parsed = match value {
        Value::Number(n) => n
            .as_i64()
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .ok_or_else(|| format!("'{n}' is not an epoch-millisecond timestamp"))?,
        Value::String(s) => parse_date_str(s.trim(), params.get("format").and_then(Value::as_str))
            .ok_or_else(|| format!("unrecognised date '{s}'"))?,
        other => return Err(format!("cannot read a date from {other}")),
    };

    Ok(if data_type == DataType::DateTime {
        FieldValue::DateTime(parsed)
    } else {
        FieldValue::Date(parsed.date_naive())
    })
}

fn parse_date_str(raw: &str, custom: Option<&str>) -> Option<DateTime<Utc>> {
    if raw.is_empty() {
        return None;
    }
    if let Some(format) = custom {
        if let Some(parsed) = parse_with(raw, format) {
            return Some(parsed);
        }
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Some(parsed) = DATE_FORMATS
        .iter()
        .chain(DATETIME_FORMATS)
        .find_map(|format| parse_with(raw, format))
    {
        return Some(parsed);
    }
    if raw.bytes().all(|b| b.is_ascii_digit()) {
        return raw.parse::<i64>().ok().and_then(DateTime::<Utc>::from_timestamp_millis);
    }
    None
}

fn parse_with(raw: &str, format: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, format)
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(raw, format)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .map(|naive| naive.and_utc())
}

/// Truthy/falsy words, case-insensitive, plus JSON 0/1.
pub fn boolean(value: &Value) -> TransformResult {
    match value {
        Value::Bool(b) => Ok(FieldValue::Boolean(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(1) => Ok(FieldValue::Boolean(true)),
            Some(0) => Ok(FieldValue::Boolean(false)),
            _ => Err(format!("'{n}' is not a boolean")),
        },
        Value::String(s) => {
            let word = s.trim().to_ascii_lowercase();
            if TRUE_WORDS.contains(&word.as_str()) {
                Ok(FieldValue::Boolean(true))
            } else if FALSE_WORDS.contains(&word.as_str()) {
                Ok(FieldValue::Boolean(false))
            } else {
                Err(format!("'{s}' is not a boolean"))
            }
        }
        other => Err(format!("cannot read a boolean from {other}")),
    }
}

/// Parse a formatted number: currency, separators, `%` and accounting
/// parentheses are tolerated.
pub fn parse_number(raw: &str, decimal_separator: char) -> Option<f64> {
    let mut text = raw.trim();
    let mut negative = false;
    if let Some(inner) = text.strip_prefix('(').and_then(|t| t.strip_suffix(')')) {
        negative = true;
        text = inner;
    }

    let thousands = if decimal_separator == ',' { '.' } else { ',' };
    let cleaned: String = text
        .chars()
        .filter(|c| {
            !c.is_whitespace()
                && *c != '_'
                && *c != '%'
                && *c != thousands
                && *c != '\''
                && !CURRENCY_SYMBOLS.contains(c)
        })
        .map(|c| if c == decimal_separator { '.' } else { c })
        .collect();
    if cleaned.is_empty() {
        return None;
    }

    let parsed: f64 = cleaned.parse().ok()?;
    if !parsed.is_finite() {
        return None;
    }
    Some(if negative { -parsed } else { parsed })
}

pub(crate) fn decimal_separator(params: &Map<String, Value>) -> char {
    match params.get("decimal_separator").and_then(Value::as_str) {
        Some(",") => ',',
        _ => '.',
    }
}

/// Number from a JSON number or a formatted string.
pub fn numeric(value: &Value, data_type: DataType, params: &Map<String, Value>) -> TransformResult {
    let number = match value {
        Value::Number(n) if data_type == DataType::Integer && n.is_i64() => {
            return n
                .as_i64()
                .map(FieldValue::Integer)
                .ok_or_else(|| format!("'{n}' is out of range"));
        }
        Value::Number(n) => n.as_f64().ok_or_else(|| format!("'{n}' is out of range"))?,
        Value::String(s) => parse_number(s, decimal_separator(params))
            .ok_or_else(|| format!("'{s}' is not a number"))?,
        other => return Err(format!("cannot read a number from {other}")),
    };
    Ok(number_value(number, data_type))
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn number_value(number: f64, data_type: DataType) -> FieldValue {
    let integral = number.fract() == 0.0 && number.abs() < i64::MAX as f64;
    if data_type == DataType::Integer && integral {
        FieldValue::Integer(number as i64)
    } else {
        FieldValue::Float(number)
    }
}
