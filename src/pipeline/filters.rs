//! Caller-supplied filters and field paths.
//!
//! Both end up verbatim inside backing-store queries, so only plain
//! equality on well-formed field paths is accepted. Operator documents
//! (`{"$ne": ...}`) and `$`-prefixed paths never get through.

use crate::types::ValidationError;
use serde_json::{json, Map, Value};

const FIELD_PATH_RULE: &str = "dot-separated names of letters, digits and underscores";

/// Check a dot-path such as `address.country_code`.
pub fn check_field_path(param: &str, path: &str) -> Result<(), ValidationError> {
    let well_formed = !path.is_empty()
        && path.split('.').all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_')
        });
    if well_formed {
        Ok(())
    } else {
        Err(ValidationError::out_of_range(param, FIELD_PATH_RULE))
    }
}

/// Compile the `filters` parameter into an equality filter document.
///
/// Accepted shapes: `[[field, value], ...]`, `[{"field": f, "value": v}, ...]`
/// or `{field: value, ...}`. One pair yields `{field: value}`; several
/// yield `{"$and": [...]}`. An empty or absent filter yields `None`.
pub fn equality_filter(param: &str, raw: Option<&Value>) -> Result<Option<Value>, ValidationError> {
    let pairs = match raw {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| pair_from_item(param, item))
            .collect::<Result<Vec<_>, _>>()?,
        Some(Value::Object(map)) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        Some(_) => {
            return Err(ValidationError::type_mismatch(
                param,
                "expected a list of [field, value] pairs or an object",
            ))
        }
    };

    for (field, value) in &pairs {
        check_field_path(param, field)?;
        if value.is_object() || value.is_array() {
            return Err(ValidationError::type_mismatch(
                param,
                format!("value for '{}' must be a string, number, boolean or null", field),
            ));
        }
    }

    let mut clauses: Vec<Value> = pairs
        .into_iter()
        .map(|(field, value)| {
            let mut clause = Map::new();
            clause.insert(field, value);
            Value::Object(clause)
        })
        .collect();

    Ok(match clauses.len() {
        0 => None,
        1 => clauses.pop(),
        _ => Some(json!({ "$and": clauses })),
    })
}

fn pair_from_item(param: &str, item: &Value) -> Result<(String, Value), ValidationError> {
    let pair = match item {
        Value::Array(pair) if pair.len() == 2 => {
            pair[0].as_str().map(|f| (f.to_string(), pair[1].clone()))
        }
        Value::Object(obj) => match (obj.get("field").and_then(Value::as_str), obj.get("value")) {
            (Some(f), Some(v)) if obj.len() == 2 => Some((f.to_string(), v.clone())),
            _ => None,
        },
        _ => None,
    };
    pair.ok_or_else(|| {
        ValidationError::type_mismatch(
            param,
            "each filter must be [field, value] or {\"field\": ..., \"value\": ...}",
        )
    })
}
