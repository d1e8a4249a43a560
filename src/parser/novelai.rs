//! NovelAI, in both of its forms.
//!
//! Legacy images carry `Software: NovelAI`, the prompt in `Description` (or
//! EXIF `ImageDescription`) and a JSON `Comment` whose `uc` is the negative
//! prompt. Newer images hide the same JSON in the alpha channel (see
//! [`crate::stealth`]), with the settings nested as a JSON string under
//! `Comment`.

use serde_json::Value;

use super::ToolOutput;
use crate::json::{self, JsonObject};
use crate::result::{RawBlob, SettingEntry, Settings, join_nonblank};

pub const TOOL_LABEL: &str = "NovelAI";
/// The `Software` value legacy images carry.
pub const SOFTWARE_LABEL: &str = "NovelAI";

pub fn parse_legacy(description: &str, comment: &str) -> Option<ToolOutput> {
    let data = json::parse_object(comment)?;
    let positive = description.trim();
    let negative = json::str_field(&data, "uc").unwrap_or_default().trim();
    let rest = json::without_keys(&data, &["uc"]);
    let dumped = Value::Object(data.clone()).to_string();

    Some(ToolOutput {
        tool: TOOL_LABEL.to_string(),
        positive: positive.to_string(),
        negative: negative.to_string(),
        settings: settings_from(rest),
        raw: join_nonblank(&[positive, negative, &dumped]),
        blobs: Vec::new(),
        sdxl: None,
    })
}

pub fn parse_stealth(payload: &JsonObject) -> ToolOutput {
    let merged = overlay_comment(payload);

    let positive = json::str_field(&merged, "prompt")
        .or_else(|| json::str_field(&merged, "Description"))
        .unwrap_or_default()
        .trim();
    let negative = json::str_field(&merged, "uc").unwrap_or_default().trim();
    let rest = json::without_keys(&merged, &["prompt", "uc", "Description"]);
    let dumped = Value::Object(merged.clone()).to_string();

    ToolOutput {
        tool: TOOL_LABEL.to_string(),
        positive: positive.to_string(),
        negative: negative.to_string(),
        settings: settings_from(rest),
        raw: join_nonblank(&[positive, negative, &dumped]),
        blobs: vec![RawBlob::new("stealth", Value::Object(payload.clone()).to_string())],
        sdxl: None,
    }
}

/// Lay the keys of the nested `Comment` object over the payload, one level
/// deep, then drop `Comment`. A `Comment` that is not an object is dropped as is.
fn overlay_comment(payload: &JsonObject) -> JsonObject {
    let mut merged = payload.clone();
    let nested = match payload.get("Comment") {
        Some(Value::String(s)) => json::parse_object(s),
        Some(Value::Object(obj)) => Some(obj.clone()),
        _ => None,
    };
    if let Some(nested) = nested {
        for (k, v) in nested {
            merged.insert(k, v);
        }
    }
    json::without_keys(&merged, &["Comment"])
}

fn settings_from(rest: JsonObject) -> Settings {
    let entries = rest
        .iter()
        .map(|(k, v)| SettingEntry::new(k.as_str(), json::display_value(v)))
        .collect();
    Settings::from_entries(entries, Value::Object(rest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: Value) -> JsonObject {
        value.as_object().cloned().unwrap()
    }

    // ── legacy ───────────────────────────────────────────────────────

    #[test]
    fn legacy_uses_description_and_uc() {
        let out = parse_legacy(" 1girl, smile ", r#"{"steps":28,"uc":"lowres","sampler":"k_euler"}"#).unwrap();
        assert_eq!(out.tool, "NovelAI");
        assert_eq!(out.positive, "1girl, smile");
        assert_eq!(out.negative, "lowres");
        assert_eq!(out.settings.display, "steps: 28, sampler: k_euler");
    }

    #[test]
    fn legacy_with_bad_comment_is_not_parsed() {
        assert!(parse_legacy("1girl", "not json").is_none());
    }

    // ── stealth ──────────────────────────────────────────────────────

    #[test]
    fn stealth_overlays_nested_comment_one_level() {
        let payload = obj(json!({
            "Description": "fallback",
            "Software": "NovelAI",
            "Comment": "{\"prompt\":\"a fox\",\"uc\":\"blurry\",\"steps\":28,\"Software\":\"override\",\"v4\":{\"x\":1}}"
        }));
        let out = parse_stealth(&payload);
        assert_eq!(out.positive, "a fox");
        assert_eq!(out.negative, "blurry");
        let detail = out.settings.detail.as_object().unwrap();
        assert!(!detail.contains_key("Comment"));
        assert_eq!(detail.get("Software"), Some(&json!("override")));
        assert_eq!(detail.get("v4"), Some(&json!({"x": 1})));
        assert_eq!(out.blobs[0].label, "stealth");
        assert_eq!(out.blobs[0].mime, "application/json");
    }

    #[test]
    fn stealth_falls_back_to_description() {
        let out = parse_stealth(&obj(json!({"Description": "a cat", "Comment": "not json"})));
        assert_eq!(out.positive, "a cat");
        assert!(!out.settings.detail.as_object().unwrap().contains_key("Comment"));
    }

    #[test]
    fn stealth_empty_object() {
        let out = parse_stealth(&JsonObject::new());
        assert!(out.positive.is_empty());
        assert_eq!(out.raw, "{}");
        assert!(out.settings.entries.is_empty());
    }
}
