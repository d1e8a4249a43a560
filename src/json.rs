//! JSON helpers shared by the tool parsers.
//!
//! `serde_json` is built with `preserve_order`, so every [`JsonObject`] keeps the
//! key order of the source text. That matters for the "raw JSON minus a few
//! keys" re-serialization the parsers use for their settings display.

use serde_json::{Map, Value};

/// An order-preserving JSON object.
pub type JsonObject = Map<String, Value>;

/// Parse `text` as a JSON object. Anything that is not an object yields `None`.
pub fn parse_object(text: &str) -> Option<JsonObject> {
    match serde_json::from_str::<Value>(text.trim()) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Parse the first JSON value at the start of `text`, ignoring whatever follows it.
///
/// Returns the object and the exact slice it was parsed from.
pub fn parse_object_prefix(text: &str) -> Option<(JsonObject, &str)> {
    let text = text.trim_start();
    let mut stream = serde_json::Deserializer::from_str(text).into_iter::<Value>();
    match stream.next() {
        Some(Ok(Value::Object(map))) => Some((map, &text[..stream.byte_offset()])),
        _ => None,
    }
}

/// Copy of `obj` without `keys`, keeping the remaining keys in order.
pub fn without_keys(obj: &JsonObject, keys: &[&str]) -> JsonObject {
    obj.iter()
        .filter(|(k, _)| !keys.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// String value of `key`, if present and a string.
pub fn str_field<'a>(obj: &'a JsonObject, key: &str) -> Option<&'a str> {
    obj.get(key).and_then(Value::as_str)
}

/// True for strings, numbers, booleans and null.
pub fn is_scalar(value: &Value) -> bool {
    !matches!(value, Value::Array(_) | Value::Object(_))
}

/// Render a value for display: strings as-is, everything else as compact JSON
/// with double quotes stripped.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string().replace('"', ""),
    }
}

/// MIME tag for a raw text blob.
pub fn mime_for(text: &str) -> &'static str {
    let trimmed = text.trim_start();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        "application/json"
    } else {
        "text/plain"
    }
}

/// Combine two objects. Keys only in one side are copied; on a collision the
/// values are collected into a list instead of overwriting: an existing list
/// gets the incoming value appended, otherwise the result is `[incoming, existing]`.
/// A `null` existing value counts as absent.
pub fn merge_dict(a: &JsonObject, b: &JsonObject) -> JsonObject {
    if a.is_empty() {
        return b.clone();
    }
    if b.is_empty() {
        return a.clone();
    }
    let mut out = a.clone();
    for (key, incoming) in b {
        match out.get_mut(key) {
            None | Some(Value::Null) => {
                out.insert(key.clone(), incoming.clone());
            }
            Some(existing) => {
                let merged = match existing.take() {
                    Value::Array(mut items) => {
                        items.push(incoming.clone());
                        Value::Array(items)
                    }
                    other => Value::Array(vec![incoming.clone(), other]),
                };
                *existing = merged;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: Value) -> JsonObject {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    // ── parse_object ─────────────────────────────────────────────────

    #[test]
    fn parse_object_accepts_padded_object() {
        let parsed = parse_object("  {\"a\": 1}\n").unwrap();
        assert_eq!(parsed.get("a"), Some(&json!(1)));
    }

    #[test]
    fn parse_object_rejects_arrays_and_garbage() {
        assert!(parse_object("[1, 2]").is_none());
        assert!(parse_object("not json").is_none());
        assert!(parse_object("").is_none());
    }

    #[test]
    fn parse_object_prefix_ignores_trailing_text() {
        let (parsed, slice) = parse_object_prefix("{\"nodes\": []} trailing words").unwrap();
        assert!(parsed.contains_key("nodes"));
        assert_eq!(slice, "{\"nodes\": []}");
    }

    // ── without_keys / display ───────────────────────────────────────

    #[test]
    fn without_keys_preserves_order() {
        let source = obj(json!({"z": 1, "prompt": "x", "a": 2, "m": 3}));
        let rest = without_keys(&source, &["prompt"]);
        let keys: Vec<&str> = rest.keys().map(String::as_str).collect();
        assert_eq!(keys, ["z", "a", "m"]);
    }

    #[test]
    fn display_value_strips_quotes_from_nested_values() {
        assert_eq!(display_value(&json!("euler")), "euler");
        assert_eq!(display_value(&json!(7.5)), "7.5");
        assert_eq!(display_value(&json!(["a", "b"])), "[a,b]");
    }

    #[test]
    fn mime_for_detects_json_like_text() {
        assert_eq!(mime_for("  {\"a\":1}"), "application/json");
        assert_eq!(mime_for("[1]"), "application/json");
        assert_eq!(mime_for("a cat"), "text/plain");
    }

    // ── merge_dict ───────────────────────────────────────────────────

    #[test]
    fn merge_dict_collects_collisions_into_list() {
        let a = obj(json!({"steps": 20, "cfg": 7}));
        let b = obj(json!({"steps": 30, "seed": 1}));
        let merged = merge_dict(&a, &b);
        assert_eq!(merged.get("steps"), Some(&json!([30, 20])));
        assert_eq!(merged.get("cfg"), Some(&json!(7)));
        assert_eq!(merged.get("seed"), Some(&json!(1)));
    }

    #[test]
    fn merge_dict_appends_to_existing_list() {
        let a = obj(json!({"steps": [30, 20]}));
        let b = obj(json!({"steps": 10}));
        let merged = merge_dict(&a, &b);
        assert_eq!(merged.get("steps"), Some(&json!([30, 20, 10])));
    }

    #[test]
    fn merge_dict_treats_null_as_absent() {
        let a = obj(json!({"seed": null}));
        let b = obj(json!({"seed": 5}));
        assert_eq!(merge_dict(&a, &b).get("seed"), Some(&json!(5)));
    }

    #[test]
    fn merge_dict_with_empty_side_returns_other() {
        let a = obj(json!({"x": 1}));
        assert_eq!(merge_dict(&a, &JsonObject::new()), a);
        assert_eq!(merge_dict(&JsonObject::new(), &a), a);
    }
}
