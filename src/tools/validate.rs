//! Parameter validation — coercion, defaults, constraint checks.
//!
//! Caller parameters are untrusted input that ends up inside backing-store
//! queries, so anything not declared by the tool is rejected and constraint
//! violations are rejected rather than clamped.

use crate::tools::catalog::{ParamSpec, ParamType, ToolSpec};
use crate::types::ValidationError;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Validated, coerced parameters. Immutable once built.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidatedParams(BTreeMap<String, Value>);

impl ValidatedParams {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(Value::as_str)
    }

    pub fn i64(&self, name: &str) -> Option<i64> {
        self.0.get(name).and_then(Value::as_i64)
    }

    pub fn f64(&self, name: &str) -> Option<f64> {
        self.0.get(name).and_then(Value::as_f64)
    }

    pub fn list(&self, name: &str) -> Option<&Vec<Value>> {
        self.0.get(name).and_then(Value::as_array)
    }

    pub fn object(&self, name: &str) -> Option<&Map<String, Value>> {
        self.0.get(name).and_then(Value::as_object)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Lowercase hex SHA-256 of the key-ordered JSON encoding.
    pub fn digest(&self) -> String {
        let encoded = serde_json::to_vec(&self.0).unwrap_or_default();
        format!("{:x}", Sha256::digest(&encoded))
    }
}

impl FromIterator<(String, Value)> for ValidatedParams {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Validate raw caller parameters against a tool's declared schema.
pub fn validate(spec: &ToolSpec, raw: &Value) -> Result<ValidatedParams, ValidationError> {
    let empty = Map::new();
    let supplied_map = match raw {
        Value::Null => &empty,
        Value::Object(map) => map,
        other => {
            return Err(ValidationError::type_mismatch(
                "params",
                format!("expected object, got {}", value_type_name(other)),
            ))
        }
    };

    // JSON null counts as absent.
    let supplied: BTreeMap<&str, &Value> = supplied_map
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (k.as_str(), v))
        .collect();

    for name in &spec.required {
        if !supplied.contains_key(name.as_str()) {
            return Err(ValidationError::missing(name));
        }
    }

    let mut coerced: BTreeMap<String, Value> = BTreeMap::new();
    for (name, param) in &spec.parameters {
        match supplied.get(name.as_str()) {
            Some(value) => {
                coerced.insert(name.clone(), coerce(name, param.param_type, value)?);
            }
            None => {
                if let Some(default) = &param.default {
                    coerced.insert(name.clone(), coerce(name, param.param_type, default)?);
                }
            }
        }
    }

    for (name, value) in &coerced {
        if let Some(param) = spec.parameters.get(name) {
            check_constraints(name, param, value)?;
        }
    }

    if let Some(unknown) = supplied.keys().find(|k| !spec.parameters.contains_key(**k)) {
        return Err(ValidationError::unknown_param(*unknown));
    }

    Ok(ValidatedParams(coerced))
}

/// Coerce a JSON value to the declared type without losing information.
pub fn coerce(name: &str, param_type: ParamType, value: &Value) -> Result<Value, ValidationError> {
    let mismatch = |expected: &str| {
        ValidationError::type_mismatch(
            name,
            format!("expected {}, got {}", expected, describe_value(value)),
        )
    };

    match param_type {
        ParamType::Int => match value {
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Value::from(i))
                } else if let Some(f) = n.as_f64() {
                    if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
                        Ok(Value::from(f as i64))
                    } else {
                        Err(mismatch("integer"))
                    }
                } else {
                    Err(mismatch("integer"))
                }
            }
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| mismatch("integer")),
            _ => Err(mismatch("integer")),
        },
        ParamType::Float => {
            let parsed = match value {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            };
            match parsed.and_then(serde_json::Number::from_f64) {
                Some(n) => Ok(Value::Number(n)),
                None => Err(mismatch("number")),
            }
        }
        ParamType::Bool => match value {
            Value::Bool(b) => Ok(Value::Bool(*b)),
            Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(Value::Bool(true)),
            Value::String(s) if s.eq_ignore_ascii_case("false") => Ok(Value::Bool(false)),
            _ => Err(mismatch("boolean")),
        },
        ParamType::String => match value {
            Value::String(s) => Ok(Value::String(s.clone())),
            Value::Number(n) => Ok(Value::String(n.to_string())),
            Value::Bool(b) => Ok(Value::String(b.to_string())),
            _ => Err(mismatch("string")),
        },
        ParamType::List => match value {
            Value::Array(_) => Ok(value.clone()),
            _ => Err(mismatch("list")),
        },
        ParamType::Object => match value {
            Value::Object(_) => Ok(value.clone()),
            _ => Err(mismatch("object")),
        },
    }
}

/// Apply declared bounds: numeric value, string length, or list size.
pub fn check_constraints(
    name: &str,
    param: &ParamSpec,
    value: &Value,
) -> Result<(), ValidationError> {
    let Some(constraints) = &param.constraints else {
        return Ok(());
    };

    let measured = match (param.param_type, value) {
        (ParamType::Int | ParamType::Float, v) => v.as_f64(),
        (ParamType::String, Value::String(s)) => Some(s.chars().count() as f64),
        (ParamType::List, Value::Array(items)) => Some(items.len() as f64),
        _ => None,
    };

    match measured {
        Some(m) if !constraints.admits(m) => {
            Err(ValidationError::out_of_range(name, constraints.describe()))
        }
        _ => Ok(()),
    }
}

fn value_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn describe_value(v: &Value) -> String {
    match v {
        Value::String(s) if s.len() <= 32 => format!("string '{}'", s),
        Value::Number(n) => format!("number {}", n),
        other => value_type_name(other).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::catalog::Constraints;
    use proptest::prelude::*;
    use serde_json::json;
    use std::collections::BTreeSet;

    fn param(param_type: ParamType) -> ParamSpec {
        ParamSpec {
            param_type,
            default: None,
            constraints: None,
            description: String::new(),
        }
    }

    fn search_spec() -> ToolSpec {
        let mut parameters = BTreeMap::new();
        parameters.insert("query_text".to_string(), param(ParamType::String));
        parameters.insert(
            "limit".to_string(),
            ParamSpec {
                default: Some(json!(10)),
                constraints: Some(Constraints {
                    min: Some(1.0),
                    max: Some(50.0),
                }),
                ..param(ParamType::Int)
            },
        );
        parameters.insert("min_score".to_string(), param(ParamType::Float));
        parameters.insert("exact".to_string(), param(ParamType::Bool));
        parameters.insert(
            "filters".to_string(),
            ParamSpec {
                constraints: Some(Constraints {
                    min: None,
                    max: Some(2.0),
                }),
                ..param(ParamType::List)
            },
        );

        ToolSpec {
            description: "search".to_string(),
            kind: None,
            required: BTreeSet::from(["query_text".to_string()]),
            parameters,
            index: Some("vector_index".to_string()),
            vector_path: None,
            projection: None,
            scope: Vec::new(),
            returns_description: String::new(),
        }
    }

    #[test]
    fn test_missing_required() {
        let err = validate(&search_spec(), &json!({"limit": 5})).unwrap_err();
        assert_eq!(err, ValidationError::missing("query_text"));
    }

    #[test]
    fn test_null_counts_as_missing() {
        let err = validate(&search_spec(), &json!({"query_text": null})).unwrap_err();
        assert_eq!(err.reason(), "missing");
    }

    #[test]
    fn test_default_substituted() {
        let params = validate(&search_spec(), &json!({"query_text": "beach house"})).unwrap();
        assert_eq!(params.i64("limit"), Some(10));
        assert_eq!(params.str("query_text"), Some("beach house"));
        assert!(!params.contains("min_score"));
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_numeric_string_coerced_to_int() {
        let params =
            validate(&search_spec(), &json!({"query_text": "x", "limit": "25"})).unwrap();
        assert_eq!(params.i64("limit"), Some(25));
    }

    #[test]
    fn test_whole_float_coerced_to_int() {
        let params = validate(&search_spec(), &json!({"query_text": "x", "limit": 7.0})).unwrap();
        assert_eq!(params.get("limit"), Some(&json!(7)));
    }

    #[test]
    fn test_float_beyond_i64_rejected() {
        // 2^63 is the first float above i64::MAX.
        let err = coerce("limit", ParamType::Int, &json!(9.223372036854776e18)).unwrap_err();
        assert_eq!(err.reason(), "type_mismatch");
        assert_eq!(
            coerce("limit", ParamType::Int, &json!(-9.223372036854776e18)).unwrap(),
            json!(i64::MIN)
        );
    }

    #[test]
    fn test_lossy_coercions_rejected() {
        for bad in [json!("ten"), json!(2.5), json!(true), json!([1])] {
            let err =
                validate(&search_spec(), &json!({"query_text": "x", "limit": bad})).unwrap_err();
            assert_eq!(err.reason(), "type_mismatch", "value {:?}", err);
            assert_eq!(err.param(), "limit");
        }
    }

    #[test]
    fn test_bool_and_string_coercions() {
        let params = validate(
            &search_spec(),
            &json!({"query_text": 42, "exact": "TRUE", "min_score": "0.75"}),
        )
        .unwrap();
        assert_eq!(params.str("query_text"), Some("42"));
        assert_eq!(params.get("exact"), Some(&json!(true)));
        assert_eq!(params.f64("min_score"), Some(0.75));
    }

    #[test]
    fn test_out_of_range_rejected_not_clamped() {
        let err = validate(&search_spec(), &json!({"query_text": "x", "limit": 51})).unwrap_err();
        assert_eq!(err, ValidationError::out_of_range("limit", "between 1 and 50"));

        let err = validate(&search_spec(), &json!({"query_text": "x", "limit": 0})).unwrap_err();
        assert_eq!(err.reason(), "out_of_range");
    }

    #[test]
    fn test_list_size_constraint() {
        let err = validate(
            &search_spec(),
            &json!({"query_text": "x", "filters": [["a", 1], ["b", 2], ["c", 3]]}),
        )
        .unwrap_err();
        assert_eq!(err, ValidationError::out_of_range("filters", "at most 2"));
    }

    #[test]
    fn test_unknown_param_rejected() {
        let err = validate(&search_spec(), &json!({"query_text": "x", "$where": "1"})).unwrap_err();
        assert_eq!(err, ValidationError::unknown_param("$where"));
    }

    #[test]
    fn test_non_object_params_rejected() {
        let err = validate(&search_spec(), &json!(["query_text"])).unwrap_err();
        assert_eq!(err.param(), "params");
    }

    #[test]
    fn test_digest_is_order_independent() {
        let a = validate(&search_spec(), &json!({"query_text": "x", "limit": 3})).unwrap();
        let b = validate(&search_spec(), &json!({"limit": 3, "query_text": "x"})).unwrap();
        assert_eq!(a.digest(), b.digest());
        assert_eq!(a.digest().len(), 64);

        let c = validate(&search_spec(), &json!({"query_text": "y", "limit": 3})).unwrap();
        assert_ne!(a.digest(), c.digest());
    }

    proptest! {
        #[test]
        fn prop_limit_in_range_accepted(limit in 1i64..=50) {
            let params = validate(&search_spec(), &json!({"query_text": "x", "limit": limit})).unwrap();
            prop_assert_eq!(params.i64("limit"), Some(limit));
        }

        #[test]
        fn prop_limit_out_of_range_rejected(limit in prop_oneof![i64::MIN..1i64, 51i64..i64::MAX]) {
            let err = validate(&search_spec(), &json!({"query_text": "x", "limit": limit})).unwrap_err();
            prop_assert_eq!(err.reason(), "out_of_range");
        }

        #[test]
        fn prop_non_numeric_strings_never_become_ints(s in "[a-zA-Z]{1,12}") {
            let err = validate(&search_spec(), &json!({"query_text": "x", "limit": s})).unwrap_err();
            prop_assert_eq!(err.reason(), "type_mismatch");
        }
    }
}
