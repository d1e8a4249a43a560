//! AUTOMATIC1111-style plain-text parameters.
//!
//! ```text
//! <positive prompt>
//! Negative prompt: <negative prompt>
//! Steps: 20, Sampler: Euler a, CFG scale: 7, Seed: 1, Size: 512x512
//! ```

use super::ToolOutput;
use crate::result::{SettingEntry, Settings};

pub const TOOL_LABEL: &str = "A1111 webUI";
/// Used when a ComfyUI `prompt` field sits next to A1111-style parameters.
pub const COMFY_COMPATIBLE_LABEL: &str = "ComfyUI (A1111 compatible)";

pub const NEGATIVE_MARKER: &str = "\nNegative prompt:";
pub const STEPS_MARKER: &str = "\nSteps:";

/// The three sections of a parameters blob, each trimmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sections<'a> {
    pub positive: &'a str,
    pub negative: &'a str,
    pub settings: &'a str,
}

/// Split on the first negative and steps markers.
///
/// The positive prompt ends at the negative marker, or at the steps marker
/// when there is no negative marker. The negative prompt runs to a following
/// steps marker, otherwise to the end. The settings line always runs from the
/// steps marker to the end, so a negative marker after it stays in both.
pub fn split(raw: &str) -> Sections<'_> {
    let neg = raw.find(NEGATIVE_MARKER);
    let steps = raw.find(STEPS_MARKER);

    let positive_end = neg.or(steps).unwrap_or(raw.len());

    let negative = match neg {
        Some(n) => {
            let start = n + NEGATIVE_MARKER.len();
            let end = steps.filter(|&s| s > n).unwrap_or(raw.len());
            &raw[start..end]
        }
        None => "",
    };

    let settings = match steps {
        // Skip the leading newline but keep "Steps:".
        Some(s) => &raw[s + 1..],
        None => "",
    };

    Sections {
        positive: raw[..positive_end].trim(),
        negative: negative.trim(),
        settings: settings.trim(),
    }
}

/// Split a settings line into `Key: value` entries.
///
/// Fields are separated by commas outside double quotes; a field without a
/// colon is ignored.
pub fn parse_settings_line(line: &str) -> Vec<SettingEntry> {
    let mut fields = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (i, c) in line.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                fields.push(&line[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    fields.push(&line[start..]);

    fields
        .into_iter()
        .filter_map(|field| {
            let (key, value) = field.split_once(':')?;
            let key = key.trim();
            (!key.is_empty()).then(|| SettingEntry::new(key, value.trim()))
        })
        .collect()
}

/// Parse an A1111 parameters blob. The settings display keeps the line verbatim.
pub fn parse(raw: &str, tool: &str) -> ToolOutput {
    let sections = split(raw);
    ToolOutput {
        tool: tool.to_string(),
        positive: sections.positive.to_string(),
        negative: sections.negative.to_string(),
        settings: Settings::verbatim(sections.settings, parse_settings_line(sections.settings)),
        raw: raw.trim().to_string(),
        blobs: Vec::new(),
        sdxl: None,
    }
}
