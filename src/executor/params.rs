//! Typed parameter accessors.
//!
//! Required accessors fail with `InvalidParams` naming the field when it is
//! absent, null or of the wrong type. Optional accessors return `None` for
//! absent or null fields and fail only on a type mismatch.

use serde_json::{Map, Value};

use super::errors::ExecutorError;
use crate::engine::coercion::{type_name, I64_BOUND};

/// Arguments of one tool call.
#[derive(Debug, Clone, Default)]
pub struct Params {
    args: Map<String, Value>,
}

impl Params {
    /// Wrap a call's `arguments`. Null means no arguments.
    pub fn from_value(value: Value) -> Result<Self, ExecutorError> {
        match value {
            Value::Object(args) => Ok(Self { args }),
            Value::Null => Ok(Self::default()),
            other => Err(ExecutorError::invalid(
                "arguments",
                format!("expected object, got {}", type_name(&other)),
            )),
        }
    }

    /// The raw value, treating null as absent.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.args.get(name).filter(|v| !v.is_null())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    // ─── Strings ─────────────────────────────────────────────────────────

    pub fn required_str(&self, name: &str) -> Result<&str, ExecutorError> {
        self.optional_str(name)?.ok_or_else(|| missing(name))
    }

    pub fn optional_str(&self, name: &str) -> Result<Option<&str>, ExecutorError> {
        self.get(name)
            .map(|v| v.as_str().ok_or_else(|| mismatch(name, "string", v)))
            .transpose()
    }

    // ─── Numbers ─────────────────────────────────────────────────────────

    pub fn required_i64(&self, name: &str) -> Result<i64, ExecutorError> {
        self.optional_i64(name)?.ok_or_else(|| missing(name))
    }

    /// Accepts exact floats (`5.0`); rejects `5.5` instead of truncating.
    pub fn optional_i64(&self, name: &str) -> Result<Option<i64>, ExecutorError> {
        let Some(value) = self.get(name) else {
            return Ok(None);
        };
        let Value::Number(n) = value else {
            return Err(mismatch(name, "integer", value));
        };
        if let Some(i) = n.as_i64() {
            return Ok(Some(i));
        }
        match n.as_f64() {
            Some(f) if f.is_finite() && f.fract() == 0.0 => {
                if (-I64_BOUND..I64_BOUND).contains(&f) {
                    Ok(Some(f as i64))
                } else {
                    Err(ExecutorError::invalid(name, format!("integer {n} is out of range")))
                }
            }
            _ => Err(ExecutorError::invalid(
                name,
                format!("expected integer, got non-integral number {n}"),
            )),
        }
    }

    pub fn required_f64(&self, name: &str) -> Result<f64, ExecutorError> {
        self.optional_f64(name)?.ok_or_else(|| missing(name))
    }

    pub fn optional_f64(&self, name: &str) -> Result<Option<f64>, ExecutorError> {
        self.get(name)
            .map(|v| v.as_f64().ok_or_else(|| mismatch(name, "number", v)))
            .transpose()
    }

    // ─── Booleans ────────────────────────────────────────────────────────

    pub fn required_bool(&self, name: &str) -> Result<bool, ExecutorError> {
        self.optional_bool(name)?.ok_or_else(|| missing(name))
    }

    pub fn optional_bool(&self, name: &str) -> Result<Option<bool>, ExecutorError> {
        self.get(name)
            .map(|v| v.as_bool().ok_or_else(|| mismatch(name, "boolean", v)))
            .transpose()
    }

    // ─── Containers ──────────────────────────────────────────────────────

    pub fn required_object(&self, name: &str) -> Result<&Map<String, Value>, ExecutorError> {
        self.optional_object(name)?.ok_or_else(|| missing(name))
    }

    pub fn optional_object(&self, name: &str) -> Result<Option<&Map<String, Value>>, ExecutorError> {
        self.get(name)
            .map(|v| v.as_object().ok_or_else(|| mismatch(name, "object", v)))
            .transpose()
    }

    pub fn required_array(&self, name: &str) -> Result<&Vec<Value>, ExecutorError> {
        self.optional_array(name)?.ok_or_else(|| missing(name))
    }

    pub fn optional_array(&self, name: &str) -> Result<Option<&Vec<Value>>, ExecutorError> {
        self.get(name)
            .map(|v| v.as_array().ok_or_else(|| mismatch(name, "array", v)))
            .transpose()
    }
}

fn missing(name: &str) -> ExecutorError {
    ExecutorError::invalid(name, "required parameter is missing")
}

fn mismatch(name: &str, expected: &str, got: &Value) -> ExecutorError {
    ExecutorError::invalid(name, format!("expected {expected}, got {}", type_name(got)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Params {
        Params::from_value(value).unwrap()
    }

    fn field_of(err: ExecutorError) -> String {
        match err {
            ExecutorError::InvalidParams { field, .. } => field,
            other => panic!("expected InvalidParams, got {other:?}"),
        }
    }

    #[test]
    fn test_required_missing_names_field() {
        let p = params(json!({}));
        assert_eq!(field_of(p.required_str("identifier").unwrap_err()), "identifier");
        assert_eq!(field_of(p.required_f64("x").unwrap_err()), "x");
    }

    #[test]
    fn test_optional_absent_and_null() {
        let p = params(json!({"pid": null}));
        assert_eq!(p.optional_i64("pid").unwrap(), None);
        assert_eq!(p.optional_i64("missing").unwrap(), None);
        assert_eq!(field_of(p.required_i64("pid").unwrap_err()), "pid");
    }

    #[test]
    fn test_optional_type_mismatch_errors() {
        let p = params(json!({"activate": "yes"}));
        let err = p.optional_bool("activate").unwrap_err();
        assert!(err.to_string().contains("expected boolean, got string"));
    }

    #[test]
    fn test_integer_accepts_exact_float() {
        let p = params(json!({"a": 5.0, "b": 5.5, "c": -3}));
        assert_eq!(p.required_i64("a").unwrap(), 5);
        assert_eq!(p.required_i64("c").unwrap(), -3);
        let err = p.required_i64("b").unwrap_err();
        assert!(err.to_string().contains("non-integral number 5.5"));
    }

    #[test]
    fn test_integer_rejects_out_of_range() {
        let p = params(json!({"a": 9_223_372_036_854_775_808.0f64, "b": u64::MAX}));
        let err = p.required_i64("a").unwrap_err();
        assert!(err.to_string().contains("out of range"), "{err}");
        assert_eq!(field_of(p.required_i64("b").unwrap_err()), "b");
    }

    #[test]
    fn test_integer_rejects_string() {
        let p = params(json!({"a": "5"}));
        assert_eq!(field_of(p.required_i64("a").unwrap_err()), "a");
    }

    #[test]
    fn test_containers() {
        let p = params(json!({"opts": {"k": 1}, "mods": ["shift"]}));
        assert_eq!(p.required_object("opts").unwrap()["k"], 1);
        assert_eq!(p.required_array("mods").unwrap().len(), 1);
        assert!(p.optional_array("opts").is_err());
    }

    #[test]
    fn test_non_object_arguments_rejected() {
        let err = Params::from_value(json!([1])).unwrap_err();
        assert_eq!(field_of(err), "arguments");
        assert!(!Params::from_value(Value::Null).unwrap().contains("x"));
    }
}
