//! Lenient accessors for JSON event payloads and requirement params.
//!
//! Payloads come from many producers, so identifiers show up both as numbers
//! and as strings. Every accessor returns `None` instead of failing; callers
//! treat a missing or malformed field as "condition not met".

use serde_json::{Map, Value};

/// Free-form event payload / params map.
pub type EventData = Map<String, Value>;

/// The object inside `value`; anything else yields an empty map.
pub fn object(value: Value) -> EventData {
    match value {
        Value::Object(map) => map,
        _ => EventData::new(),
    }
}

pub fn get_str<'a>(data: &'a EventData, key: &str) -> Option<&'a str> {
    data.get(key).and_then(Value::as_str)
}

/// Integer field, accepting numeric strings (`"12"`).
pub fn get_i64(data: &EventData, key: &str) -> Option<i64> {
    match data.get(key)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn get_bool(data: &EventData, key: &str) -> Option<bool> {
    match data.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// List of strings; a single string is treated as a one-element list and
/// non-string entries are skipped.
pub fn get_string_list(data: &EventData, key: &str) -> Vec<String> {
    match data.get(key) {
        Some(Value::Array(values)) => values
            .iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        Some(Value::String(s)) => vec![s.clone()],
        _ => Vec::new(),
    }
}

/// Identifier-style equality: `5`, `"5"` and `" 5 "` are all equal.
pub fn loose_eq(a: &Value, b: &Value) -> bool {
    match (scalar_text(a), scalar_text(b)) {
        (Some(a), Some(b)) => a == b,
        _ => a == b,
    }
}

/// Both keys present and loosely equal.
pub fn field_matches(
    params: &EventData,
    param_key: &str,
    data: &EventData,
    data_key: &str,
) -> bool {
    match (params.get(param_key), data.get(data_key)) {
        (Some(expected), Some(actual)) => loose_eq(expected, actual),
        _ => false,
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> EventData {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn numbers_and_strings_compare_loosely() {
        assert!(loose_eq(&json!(5), &json!("5")));
        assert!(loose_eq(&json!(" abc "), &json!("abc")));
        assert!(!loose_eq(&json!(5), &json!(6)));
        assert!(!loose_eq(&json!(null), &json!("null")));
    }

    #[test]
    fn integer_accessor_accepts_numeric_strings() {
        let data = map(json!({ "a": 3, "b": "12", "c": "x", "d": 2.9 }));
        assert_eq!(get_i64(&data, "a"), Some(3));
        assert_eq!(get_i64(&data, "b"), Some(12));
        assert_eq!(get_i64(&data, "c"), None);
        assert_eq!(get_i64(&data, "d"), Some(2));
        assert_eq!(get_i64(&data, "missing"), None);
    }

    #[test]
    fn string_list_tolerates_single_values() {
        let data = map(json!({ "tags": ["forest", 3, null], "one": "cave" }));
        assert_eq!(get_string_list(&data, "tags"), vec!["forest", "3"]);
        assert_eq!(get_string_list(&data, "one"), vec!["cave"]);
        assert!(get_string_list(&data, "none").is_empty());
    }

    #[test]
    fn object_ignores_non_objects() {
        assert_eq!(object(json!({ "a": 1 })).len(), 1);
        assert!(object(json!([1, 2])).is_empty());
    }

    #[test]
    fn field_matches_requires_both_sides() {
        let params = map(json!({ "location_id": 5 }));
        let data = map(json!({ "location_id": "5" }));
        assert!(field_matches(&params, "location_id", &data, "location_id"));
        assert!(!field_matches(
            &params,
            "location_id",
            &EventData::new(),
            "location_id"
        ));
    }
}
