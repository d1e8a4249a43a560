//! StableSwarmUI: a JSON document whose `sui_image_params` object holds the prompts.

use serde_json::Value;

use super::ToolOutput;
use crate::json;
use crate::result::{SettingEntry, Settings, join_nonblank};

pub const TOOL_LABEL: &str = "StableSwarmUI";
pub const MARKER: &str = "sui_image_params";

pub fn parse(text: &str) -> Option<ToolOutput> {
    let root = json::parse_object(text)
        .or_else(|| json::parse_object_prefix(&text[text.find('{')?..]).map(|(obj, _)| obj))?;
    let params = root
        .get(MARKER)
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    let positive = json::str_field(&params, "prompt").unwrap_or_default().trim();
    let negative = json::str_field(&params, "negativeprompt").unwrap_or_default().trim();

    let rest = json::without_keys(&params, &["prompt", "negativeprompt"]);
    let entries = rest
        .iter()
        .filter(|(_, v)| json::is_scalar(v))
        .map(|(k, v)| SettingEntry::new(k.as_str(), json::display_value(v)))
        .collect();
    let dumped = Value::Object(params.clone()).to_string();

    Some(ToolOutput {
        tool: TOOL_LABEL.to_string(),
        positive: positive.to_string(),
        negative: negative.to_string(),
        settings: Settings::from_entries(entries, Value::Object(rest)),
        raw: join_nonblank(&[positive, negative, &dumped]),
        blobs: Vec::new(),
        sdxl: None,
    })
}
