use serde::Serialize;
use serde_json::Value;

use crate::extract::RawMetadataBag;
use crate::json;
use crate::parser::ToolOutput;
use crate::pipeline::ContainerFormat;

/// Raw text used when a file carries nothing that can be dumped.
pub const NO_METADATA: &str = "No readable metadata";
/// Raw text for files whose container is not recognized.
pub const UNSUPPORTED_FILE: &str = "Unsupported file";

/// One generation parameter, in first-seen order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettingEntry {
    pub key: String,
    pub value: String,
}

impl SettingEntry {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Generation settings in three shapes.
///
/// `entries` is authoritative. `display` is the flattened one-line form and
/// `detail` keeps the structured source (usually the tool's JSON minus the
/// prompt keys).
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Settings {
    pub display: String,
    pub entries: Vec<SettingEntry>,
    pub detail: Value,
}

impl Settings {
    /// Settings whose display line is derived from the entries as `key: value, ...`.
    pub fn from_entries(entries: Vec<SettingEntry>, detail: Value) -> Self {
        Self {
            display: flatten(&entries),
            entries,
            detail,
        }
    }

    /// Settings with a display line taken verbatim from the source.
    pub fn verbatim(display: impl Into<String>, entries: Vec<SettingEntry>) -> Self {
        Self {
            display: display.into(),
            entries,
            detail: Value::Null,
        }
    }
}

fn flatten(entries: &[SettingEntry]) -> String {
    entries
        .iter()
        .map(|e| format!("{}: {}", e.key, e.value))
        .collect::<Vec<_>>()
        .join(", ")
}

/// The separate text inputs of SDXL encoders for one side of the prompt.
///
/// `clip_g` and `clip_l` come from a `CLIPTextEncodeSDXL` node, `refiner` from
/// a `CLIPTextEncodeSDXLRefiner` node.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct SdxlPrompt {
    #[serde(rename = "Clip G", skip_serializing_if = "Option::is_none")]
    pub clip_g: Option<String>,
    #[serde(rename = "Clip L", skip_serializing_if = "Option::is_none")]
    pub clip_l: Option<String>,
    #[serde(rename = "Refiner", skip_serializing_if = "Option::is_none")]
    pub refiner: Option<String>,
}

impl SdxlPrompt {
    pub fn is_empty(&self) -> bool {
        self.clip_g.is_none() && self.clip_l.is_none() && self.refiner.is_none()
    }

    /// Labeled texts that are present, in `Clip G`, `Clip L`, `Refiner` order.
    pub fn labeled(&self) -> Vec<(&'static str, &str)> {
        [
            ("Clip G", &self.clip_g),
            ("Clip L", &self.clip_l),
            ("Refiner", &self.refiner),
        ]
        .into_iter()
        .filter_map(|(label, text)| text.as_deref().map(|t| (label, t)))
        .collect()
    }
}

/// Both sides of an SDXL prompt.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SdxlPrompts {
    pub positive: SdxlPrompt,
    pub negative: SdxlPrompt,
}

/// A labeled, MIME-tagged piece of raw metadata kept as evidence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RawBlob {
    pub label: String,
    pub mime: &'static str,
    pub text: String,
}

impl RawBlob {
    pub fn new(label: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            label: label.into(),
            mime: json::mime_for(&text),
            text,
        }
    }
}

/// One step of the diagnostic trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EvidenceEntry {
    pub stage: &'static str,
    pub detail: String,
}

/// Append-only log of the sniff/extract/parse steps that ran.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(transparent)]
pub struct ParseEvidence {
    entries: Vec<EvidenceEntry>,
}

impl ParseEvidence {
    pub fn push(&mut self, stage: &'static str, detail: impl Into<String>) {
        let detail = detail.into();
        log::debug!("[{stage}] {detail}");
        self.entries.push(EvidenceEntry { stage, detail });
    }

    pub fn entries(&self) -> &[EvidenceEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True if any entry of `stage` contains `needle`.
    pub fn mentions(&self, stage: &str, needle: &str) -> bool {
        self.entries
            .iter()
            .any(|e| e.stage == stage && e.detail.contains(needle))
    }
}

/// The final, immutable outcome of reading one image.
///
/// `raw` is never empty: it holds the prompts and source text the winning
/// parser saw, the dumped metadata bag, or a literal fallback string.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParseResult {
    pub tool: String,
    pub format: ContainerFormat,
    pub positive: String,
    pub negative: String,
    /// Set when the prompts came from SDXL encoders.
    pub is_sdxl: bool,
    pub positive_sdxl: SdxlPrompt,
    pub negative_sdxl: SdxlPrompt,
    pub setting: String,
    pub setting_entries: Vec<SettingEntry>,
    pub setting_detail: Value,
    pub raw: String,
    pub raw_blobs: Vec<RawBlob>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub detection_path: String,
    pub evidence: ParseEvidence,
}

impl ParseResult {
    /// Assemble the result from the cascade output and everything the
    /// extractor saw.
    pub(crate) fn assemble(
        format: ContainerFormat,
        bag: &RawMetadataBag,
        output: ToolOutput,
        detection_path: String,
        dimensions: Option<(u32, u32)>,
        mut evidence: ParseEvidence,
    ) -> Self {
        let raw = if output.raw.trim().is_empty() {
            fallback_raw(&output.positive, &output.negative, bag)
        } else {
            output.raw
        };

        let mut raw_blobs: Vec<RawBlob> = bag.iter().map(|(k, v)| RawBlob::new(k, v)).collect();
        raw_blobs.extend(output.blobs);

        evidence.push("result", format!("{} via {detection_path}", output.tool));

        let is_sdxl = output.sdxl.is_some();
        let sdxl = output.sdxl.unwrap_or_default();

        Self {
            tool: output.tool,
            format,
            positive: output.positive,
            negative: output.negative,
            is_sdxl,
            positive_sdxl: sdxl.positive,
            negative_sdxl: sdxl.negative,
            setting: output.settings.display,
            setting_entries: output.settings.entries,
            setting_detail: output.settings.detail,
            raw,
            raw_blobs,
            width: dimensions.map(|(w, _)| w),
            height: dimensions.map(|(_, h)| h),
            detection_path,
            evidence,
        }
    }

    /// Terminal result for a stream whose container was not recognized.
    pub(crate) fn unsupported(mut evidence: ParseEvidence) -> Self {
        evidence.push("result", "Unknown via unsupported container");
        Self {
            tool: ToolOutput::UNKNOWN.to_string(),
            format: ContainerFormat::Unknown,
            positive: String::new(),
            negative: String::new(),
            is_sdxl: false,
            positive_sdxl: SdxlPrompt::default(),
            negative_sdxl: SdxlPrompt::default(),
            setting: String::new(),
            setting_entries: Vec::new(),
            setting_detail: Value::Null,
            raw: UNSUPPORTED_FILE.to_string(),
            raw_blobs: Vec::new(),
            width: None,
            height: None,
            detection_path: ToolOutput::UNKNOWN.to_string(),
            evidence,
        }
    }

    /// Look up a setting by key, case-insensitively.
    pub fn setting(&self, key: &str) -> Option<&str> {
        self.setting_entries
            .iter()
            .find(|e| e.key.eq_ignore_ascii_case(key))
            .map(|e| e.value.as_str())
    }

    pub fn is_unknown(&self) -> bool {
        self.tool == ToolOutput::UNKNOWN
    }
}

fn fallback_raw(positive: &str, negative: &str, bag: &RawMetadataBag) -> String {
    let prompts = join_nonblank(&[positive, negative]);
    if !prompts.is_empty() {
        prompts
    } else if !bag.is_empty() {
        bag.dump()
    } else {
        NO_METADATA.to_string()
    }
}

/// Join the non-blank parts with newlines.
pub(crate) fn join_nonblank(parts: &[&str]) -> String {
    parts
        .iter()
        .filter(|p| !p.trim().is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("\n")
}
