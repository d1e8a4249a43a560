//! Fooocus: a JSON object in the `Comment` chunk or the EXIF user comment.

use serde_json::Value;

use super::ToolOutput;
use crate::json::{self, JsonObject};
use crate::result::{SettingEntry, Settings, join_nonblank};

pub const TOOL_LABEL: &str = "Fooocus";

/// Optional settings, in display order: accepted source keys and the label.
const FIELDS: &[(&[&str], &str)] = &[
    (&["steps"], "Steps"),
    (&["sampler", "sampler_name"], "Sampler"),
    (&["cfg_scale", "guidance_scale"], "CFG scale"),
    (&["seed"], "Seed"),
];
const TRAILING_FIELDS: &[(&[&str], &str)] = &[
    (&["performance"], "Performance"),
    (&["sharpness"], "Sharpness"),
];

/// A JSON object with `negative_prompt` plus one of `prompt`, `styles`, `performance`.
pub fn looks_like(comment: &str) -> bool {
    if !comment.trim_start().starts_with('{') {
        return false;
    }
    let Some(obj) = json::parse_object(comment) else {
        return false;
    };
    obj.contains_key("negative_prompt")
        && ["prompt", "styles", "performance"]
            .iter()
            .any(|k| obj.contains_key(*k))
}

pub fn parse(text: &str) -> Option<ToolOutput> {
    let data = json::parse_object(text)?;
    let positive = json::str_field(&data, "prompt").unwrap_or_default().trim();
    let negative = json::str_field(&data, "negative_prompt").unwrap_or_default().trim();

    let mut entries = collect(&data, FIELDS);
    if let (Some(w), Some(h)) = (present(&data, "width"), present(&data, "height")) {
        entries.push(SettingEntry::new(
            "Size",
            format!("{}x{}", json::display_value(w), json::display_value(h)),
        ));
    }
    entries.extend(collect(&data, TRAILING_FIELDS));

    let detail = json::without_keys(&data, &["prompt", "negative_prompt"]);
    let dumped = Value::Object(data.clone()).to_string();

    Some(ToolOutput {
        tool: TOOL_LABEL.to_string(),
        positive: positive.to_string(),
        negative: negative.to_string(),
        settings: Settings::from_entries(entries, Value::Object(detail)),
        raw: join_nonblank(&[positive, negative, &dumped]),
        blobs: Vec::new(),
        sdxl: None,
    })
}

fn present<'a>(data: &'a JsonObject, key: &str) -> Option<&'a Value> {
    data.get(key).filter(|v| !v.is_null())
}

fn collect(data: &JsonObject, fields: &[(&[&str], &str)]) -> Vec<SettingEntry> {
    fields
        .iter()
        .filter_map(|(keys, label)| {
            let value = keys.iter().find_map(|k| present(data, k))?;
            Some(SettingEntry::new(*label, json::display_value(value)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn looks_like_requires_negative_and_one_marker() {
        assert!(looks_like(r#"{"negative_prompt":"","styles":[]}"#));
        assert!(looks_like(r#" {"negative_prompt":"","performance":"Speed"}"#));
        assert!(!looks_like(r#"{"prompt":"x"}"#));
        assert!(!looks_like(r#"{"negative_prompt":"y"}"#));
        assert!(!looks_like("prompt: x negative_prompt: y"));
        assert!(!looks_like(r#"{"negative_prompt": broken"#));
    }

    #[test]
    fn parses_prompts_and_performance() {
        let out = parse(r#"{"prompt":"x","negative_prompt":"y","performance":"Quality"}"#).unwrap();
        assert_eq!(out.tool, "Fooocus");
        assert_eq!(out.positive, "x");
        assert_eq!(out.negative, "y");
        assert_eq!(out.settings.display, "Performance: Quality");
    }

    #[test]
    fn settings_follow_fixed_order_and_skip_missing() {
        let out = parse(
            r#"{"sharpness":2,"seed":42,"prompt":"p","negative_prompt":"n",
                "width":1024,"height":768,"steps":30,"sampler":"dpmpp_2m","guidance_scale":4}"#,
        )
        .unwrap();
        assert_eq!(
            out.settings.display,
            "Steps: 30, Sampler: dpmpp_2m, CFG scale: 4, Seed: 42, Size: 1024x768, Sharpness: 2"
        );
    }

    #[test]
    fn size_needs_both_dimensions() {
        let out = parse(r#"{"prompt":"p","negative_prompt":"n","width":512}"#).unwrap();
        assert!(out.settings.entries.is_empty());
    }

    #[test]
    fn detail_drops_prompt_keys() {
        let out = parse(r#"{"prompt":"p","negative_prompt":"n","styles":["Fooocus V2"]}"#).unwrap();
        let detail = out.settings.detail.as_object().unwrap();
        assert!(!detail.contains_key("prompt"));
        assert!(detail.contains_key("styles"));
        assert!(out.raw.starts_with("p\nn\n{"));
    }

    #[test]
    fn invalid_json_is_not_parsed() {
        assert!(parse("{oops").is_none());
    }
}
