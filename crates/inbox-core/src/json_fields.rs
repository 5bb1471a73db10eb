//! Tolerant field extraction for JSON payloads whose numeric encoding is not
//! stable across producers (integers, floats and numeric strings all appear).

use serde_json::Value;

/// Decodes a non-negative integer from an integer, float or numeric string.
pub fn value_as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(number) => {
            if let Some(parsed) = number.as_u64() {
                return Some(parsed);
            }
            let float = number.as_f64()?;
            (float.is_finite() && float >= 0.0 && float <= u64::MAX as f64)
                .then_some(float.trunc() as u64)
        }
        Value::String(raw) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return None;
            }
            trimmed.parse::<u64>().ok().or_else(|| {
                trimmed
                    .parse::<f64>()
                    .ok()
                    .filter(|float| float.is_finite() && *float >= 0.0)
                    .map(|float| float.trunc() as u64)
            })
        }
        _ => None,
    }
}

/// Returns the named field when present and not `null`.
pub fn json_field<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    value.get(key).filter(|field| !field.is_null())
}

/// Walks nested object keys, returning the leaf when present and not `null`.
pub fn json_path<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut current = value;
    for key in path {
        current = current.get(*key)?;
    }
    (!current.is_null()).then_some(current)
}

pub fn json_u64(value: &Value, key: &str) -> Option<u64> {
    json_field(value, key).and_then(value_as_u64)
}

/// Reads a trimmed, non-empty string; numbers are rendered in decimal form.
pub fn json_string(value: &Value, key: &str) -> Option<String> {
    match json_field(value, key)? {
        Value::String(raw) => {
            let trimmed = raw.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

pub fn json_bool(value: &Value, key: &str) -> Option<bool> {
    match json_field(value, key)? {
        Value::Bool(flag) => Some(*flag),
        Value::Number(number) => number.as_u64().map(|raw| raw != 0),
        Value::String(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}
