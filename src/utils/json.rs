//! Helpers for untyped JSON API payloads.

use serde_json::{Map, Value};

use crate::error::{ApiError, Result};

/// Parses a response body into a JSON object.
///
/// # Errors
///
/// Returns an invalid response error when the body is not a JSON object.
pub fn convert_response_bytes_to_map(body: &[u8]) -> Result<Map<String, Value>> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| ApiError::invalid_response(e.to_string()))?;
    match value {
        Value::Object(map) => Ok(map),
        other => Err(ApiError::invalid_response(format!("expected a JSON object, got {other}")).into()),
    }
}

/// Removes the key at `path`, descending through nested objects.
pub fn delete_key_in_map(map: &mut Map<String, Value>, path: &[&str]) {
    match path {
        [] => {}
        [last] => {
            map.remove(*last);
        }
        [head, rest @ ..] => {
            if let Some(Value::Object(child)) = map.get_mut(*head) {
                delete_key_in_map(child, rest);
            }
        }
    }
}

/// Recursively drops nulls, empty arrays and empty objects, also inside
/// arrays of objects.
pub fn remove_empty_values_in_map(map: &mut Map<String, Value>) {
    map.retain(|_, value| {
        clean(value);
        !is_empty_value(value)
    });
}

fn clean(value: &mut Value) {
    match value {
        Value::Object(map) => remove_empty_values_in_map(map),
        Value::Array(items) => items.iter_mut().for_each(clean),
        _ => {}
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// String elements of the list under `key`; empty when absent.
#[must_use]
pub fn get_string_slice(map: &Map<String, Value>, key: &str) -> Vec<String> {
    map.get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Compares two JSON documents, optionally ignoring top level keys.
#[must_use]
pub fn json_semantic_equal(a: &str, b: &str, ignored_keys: &[&str]) -> bool {
    let parse = |text: &str| -> Option<Value> {
        let mut value: Value = serde_json::from_str(text).ok()?;
        if let Value::Object(map) = &mut value {
            for key in ignored_keys {
                map.remove(*key);
            }
        }
        Some(value)
    };
    match (parse(a), parse(b)) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_convert_response() {
        assert!(convert_response_bytes_to_map(br#"{"title": "x"}"#).is_ok());
        assert!(convert_response_bytes_to_map(br#"{"title": "x": 1}"#).is_err());
        assert!(convert_response_bytes_to_map(b"[1]").is_err());
    }

    #[test]
    fn test_delete_key_in_map() {
        let mut map = object(json!({"test": true, "field-two": false}));
        delete_key_in_map(&mut map, &["test"]);
        assert_eq!(Value::Object(map), json!({"field-two": false}));

        let mut map = object(json!({"test": {"nested": "field"}, "field-two": false}));
        delete_key_in_map(&mut map, &["test", "nested"]);
        assert_eq!(Value::Object(map), json!({"test": {}, "field-two": false}));
    }

    #[test]
    fn test_remove_empty_values() {
        let mut map = object(json!({
            "keep": {"nested_keep": "value", "nested_nil": null},
            "remove": {},
            "deep": {"deeper": {"empty_array": [], "keep_this": "value"}},
            "items": [
                {"keep": "value", "remove": null},
                {"empty_map": {}, "keep": "value2"}
            ],
            "number": 42
        }));
        remove_empty_values_in_map(&mut map);
        assert_eq!(
            Value::Object(map),
            json!({
                "keep": {"nested_keep": "value"},
                "deep": {"deeper": {"keep_this": "value"}},
                "items": [{"keep": "value"}, {"keep": "value2"}],
                "number": 42
            })
        );
    }

    #[test]
    fn test_get_string_slice() {
        assert!(get_string_slice(&Map::new(), "key").is_empty());
        let map = object(json!({"key": ["value1", "value2"], "otherKey": ["x"]}));
        assert_eq!(get_string_slice(&map, "key"), vec!["value1", "value2"]);
    }

    #[test]
    fn test_json_semantic_equal() {
        assert!(json_semantic_equal(r#"{"a":1,"id":"x"}"#, r#"{ "a": 1 }"#, &["id"]));
        assert!(!json_semantic_equal(r#"{"a":1}"#, r#"{"a":2}"#, &[]));
        assert!(!json_semantic_equal("not json", "not json", &[]));
    }
}
