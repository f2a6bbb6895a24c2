//! Argument repair: field-alias auto-fill and type coercion.
//!
//! Pure functions, no I/O. The dispatcher calls these per field and
//! collects every failure before reporting.

use serde_json::Value;

use super::types::ParamType;

// ─── Field Aliases ───────────────────────────────────────────────────────────

/// Well-known field names that callers commonly use for the same slot.
///
/// Consulted after the schema's own alias list.
const FIELD_ALIASES: &[(&str, &[&str])] = &[
    ("identifier", &["app", "app_name", "application", "name", "bundle_id", "target"]),
    ("text", &["content", "value", "string", "input"]),
    ("path", &["file", "file_path", "filepath", "filename"]),
    ("key", &["keys", "key_combo", "shortcut", "hotkey"]),
    ("source", &["script", "code"]),
    ("pid", &["process_id", "subject"]),
    ("to", &["recipient", "recipients"]),
    ("body", &["message"]),
    ("query", &["q", "search", "term"]),
    ("url", &["link", "href"]),
];

/// Alternate names accepted for `field` by the fixed alias table.
pub fn field_aliases(field: &str) -> &'static [&'static str] {
    FIELD_ALIASES
        .iter()
        .find(|(name, _)| *name == field)
        .map(|(_, aliases)| *aliases)
        .unwrap_or(&[])
}

// ─── Coercion ────────────────────────────────────────────────────────────────

/// Coerce `value` to `ty`, returning the repaired value or a reason.
pub fn coerce(value: &Value, ty: ParamType) -> Result<Value, String> {
    match ty {
        ParamType::Any => Ok(value.clone()),
        ParamType::String => coerce_string(value),
        ParamType::Integer => coerce_integer(value),
        ParamType::Float => coerce_float(value),
        ParamType::Boolean => coerce_boolean(value),
        ParamType::Array => coerce_array(value),
        ParamType::Object => coerce_object(value),
    }
}

fn coerce_string(value: &Value) -> Result<Value, String> {
    match value {
        Value::String(_) => Ok(value.clone()),
        Value::Number(n) => Ok(Value::String(n.to_string())),
        Value::Bool(b) => Ok(Value::String(b.to_string())),
        other => Err(mismatch("string", other)),
    }
}

fn coerce_integer(value: &Value) -> Result<Value, String> {
    match value {
        Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
        Value::Number(n) => n
            .as_f64()
            .and_then(exact_integer)
            .map(Value::from)
            .ok_or_else(|| format!("expected integer, got non-integral number {n}")),
        Value::String(s) => {
            let trimmed = s.trim();
            if let Ok(i) = trimmed.parse::<i64>() {
                return Ok(Value::from(i));
            }
            trimmed
                .parse::<f64>()
                .ok()
                .and_then(exact_integer)
                .map(Value::from)
                .ok_or_else(|| format!("expected integer, got string '{s}'"))
        }
        other => Err(mismatch("integer", other)),
    }
}

/// 2^63. `i64::MAX as f64` rounds up to this value, so it is an exclusive bound.
pub(crate) const I64_BOUND: f64 = 9_223_372_036_854_775_808.0;

/// `5.0` → `Some(5)`, `5.5` → `None`, `2^63` → `None`.
fn exact_integer(f: f64) -> Option<i64> {
    if f.is_finite() && f.fract() == 0.0 && (-I64_BOUND..I64_BOUND).contains(&f) {
        Some(f as i64)
    } else {
        None
    }
}

fn coerce_float(value: &Value) -> Result<Value, String> {
    match value {
        Value::Number(_) => Ok(value.clone()),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| format!("expected number, got string '{s}'")),
        other => Err(mismatch("number", other)),
    }
}

fn coerce_boolean(value: &Value) -> Result<Value, String> {
    match value {
        Value::Bool(_) => Ok(value.clone()),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Ok(Value::Bool(false)),
            Some(1) => Ok(Value::Bool(true)),
            _ => Err(format!("expected boolean, got number {n}")),
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Ok(Value::Bool(true)),
            "false" | "no" | "off" | "0" => Ok(Value::Bool(false)),
            _ => Err(format!("expected boolean, got string '{s}'")),
        },
        other => Err(mismatch("boolean", other)),
    }
}

/// Structured text first, then a comma split.
fn coerce_array(value: &Value) -> Result<Value, String> {
    match value {
        Value::Array(_) => Ok(value.clone()),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.starts_with('[') {
                if let Ok(parsed @ Value::Array(_)) = serde_json::from_str::<Value>(trimmed) {
                    return Ok(parsed);
                }
            }
            let items = trimmed
                .split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(|item| Value::String(item.to_string()))
                .collect();
            Ok(Value::Array(items))
        }
        other => Err(mismatch("array", other)),
    }
}

fn coerce_object(value: &Value) -> Result<Value, String> {
    match value {
        Value::Object(_) => Ok(value.clone()),
        Value::String(s) => match serde_json::from_str::<Value>(s.trim()) {
            Ok(parsed @ Value::Object(_)) => Ok(parsed),
            Ok(other) => Err(format!("expected object, string parses to {}", type_name(&other))),
            Err(e) => Err(format!("expected object, string is not valid JSON: {e}")),
        },
        other => Err(mismatch("object", other)),
    }
}

fn mismatch(expected: &str, got: &Value) -> String {
    format!("expected {expected}, got {}", type_name(got))
}

/// JSON type name of a value, for error messages.
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
