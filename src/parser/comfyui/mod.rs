//! ComfyUI node graphs.
//!
//! ComfyUI stores the executed node graph as JSON in the `prompt` chunk and
//! the editor layout in `workflow`. Either may be alone; some front-ends also
//! paste the workflow JSON into a free-text field. All three end in the same
//! summary: find the end node whose upstream traversal covers the most nodes
//! and read prompts and sampler settings off that traversal.

pub mod graph;
pub mod workflow;

pub use graph::{
    InputValue, Node, NodeGraph, NodeKind, NodeTypes, Traversal, best_traversal, traverse,
};

use serde_json::Value;

use super::ToolOutput;
use crate::json::{self, JsonObject};
use crate::result::{RawBlob, SdxlPrompts, SettingEntry, Settings, join_nonblank};

pub const TOOL_LABEL: &str = "ComfyUI";

/// Inputs shared by every graph parse.
#[derive(Debug, Clone, Copy)]
pub struct GraphOptions<'a> {
    pub types: &'a NodeTypes,
    /// Pixel size of the image, shown as the `Size` setting.
    pub dimensions: Option<(u32, u32)>,
}

/// Parse a prompt graph. `workflow` is only carried into the raw text.
pub fn parse_prompt(
    prompt_text: &str,
    workflow: Option<&str>,
    opts: &GraphOptions<'_>,
) -> Option<ToolOutput> {
    let prompt = json::parse_object(prompt_text)?;
    let graph = NodeGraph::from_prompt(&prompt);
    let dumped = Value::Object(prompt).to_string();
    let sources = [dumped.as_str(), workflow.unwrap_or_default()];
    Some(summarize(&graph, opts, &sources, Vec::new()))
}

/// Parse a UI workflow when no prompt graph is available.
pub fn parse_workflow(workflow_text: &str, opts: &GraphOptions<'_>) -> Option<ToolOutput> {
    let doc = json::parse_object(workflow_text)?;
    let graph = workflow::graph_from_workflow(&doc)?;
    Some(summarize(&graph, opts, &[workflow_text.trim()], Vec::new()))
}

/// Parse workflow JSON embedded in free text (`parameters`, EXIF user comment).
pub fn parse_embedded_workflow(text: &str, opts: &GraphOptions<'_>) -> Option<ToolOutput> {
    let (doc, json_text) = extract_workflow_json(text)?;
    let graph = workflow::graph_from_workflow(&doc)?;
    let blobs = vec![RawBlob::new("workflow", json_text)];
    Some(summarize(&graph, opts, &[json_text], blobs))
}

/// The JSON object starting at the first `{` of `text`, if it has `nodes`
/// and `links` arrays. Returns the object and its source slice.
pub fn extract_workflow_json(text: &str) -> Option<(JsonObject, &str)> {
    let start = text.find('{')?;
    let (doc, slice) = json::parse_object_prefix(&text[start..])?;
    let is_workflow = doc.get("nodes").is_some_and(Value::is_array)
        && doc.get("links").is_some_and(Value::is_array);
    is_workflow.then_some((doc, slice))
}

fn summarize(
    graph: &NodeGraph,
    opts: &GraphOptions<'_>,
    sources: &[&str],
    blobs: Vec<RawBlob>,
) -> ToolOutput {
    let best = best_traversal(graph, opts.types);
    if let Some((end, t)) = &best {
        log::debug!(
            "comfyui: best end node {end} ({}) expanded {} of {} nodes",
            graph.node(end).map(|n| n.class_type.as_str()).unwrap_or_default(),
            t.visited.len(),
            graph.len()
        );
    }

    let (positive, negative, settings) = match &best {
        Some((_, t)) => (
            t.positive.as_deref().unwrap_or_default().trim(),
            t.negative.as_deref().unwrap_or_default().trim(),
            build_settings(t, opts.dimensions),
        ),
        None => ("", "", Settings::default()),
    };

    let sdxl = best.as_ref().and_then(|(_, t)| {
        let found = !t.positive_sdxl.is_empty() || !t.negative_sdxl.is_empty();
        found.then(|| SdxlPrompts {
            positive: t.positive_sdxl.clone(),
            negative: t.negative_sdxl.clone(),
        })
    });

    let mut parts = vec![positive, negative];
    parts.extend_from_slice(sources);
    ToolOutput {
        tool: TOOL_LABEL.to_string(),
        positive: positive.to_string(),
        negative: negative.to_string(),
        settings,
        raw: join_nonblank(&parts),
        blobs,
        sdxl,
    }
}

fn build_settings(t: &Traversal, dimensions: Option<(u32, u32)>) -> Settings {
    let flow = &t.flow;
    let size = dimensions.map(|(w, h)| Value::String(format!("{w}x{h}")));
    let fields = [
        ("Steps", flow.get("steps")),
        ("Sampler", flow.get("sampler_name")),
        ("CFG scale", flow.get("cfg")),
        ("Seed", flow.get("seed").or_else(|| flow.get("noise_seed"))),
        ("Size", size.as_ref()),
        ("Model", flow.get("ckpt_name")),
    ];
    let entries = fields
        .into_iter()
        .filter_map(|(label, value)| {
            let value = value.filter(|v| !v.is_null())?;
            Some(SettingEntry::new(label, clean(value)))
        })
        .collect();
    Settings::from_entries(entries, Value::Object(t.detail.clone()))
}

fn clean(value: &Value) -> String {
    json::display_value(value)
        .trim_matches(|c| c == '"' || c == '\'')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROMPT: &str = r#"{
        "4": {"class_type": "CheckpointLoaderSimple", "inputs": {"ckpt_name": "sd15.safetensors"}},
        "6": {"class_type": "CLIPTextEncode", "inputs": {"text": " a castle ", "clip": ["4", 1]}},
        "7": {"class_type": "CLIPTextEncode", "inputs": {"text": "fog", "clip": ["4", 1]}},
        "3": {"class_type": "KSampler", "inputs": {
            "seed": 42, "steps": 20, "cfg": 7.5, "sampler_name": "euler", "scheduler": "normal",
            "model": ["4", 0], "positive": ["6", 0], "negative": ["7", 0]
        }},
        "8": {"class_type": "VAEDecode", "inputs": {"samples": ["3", 0], "vae": ["4", 2]}},
        "9": {"class_type": "SaveImage", "inputs": {"images": ["8", 0]}}
    }"#;

    fn opts(types: &NodeTypes) -> GraphOptions<'_> {
        GraphOptions { types, dimensions: Some((512, 768)) }
    }

    // ── prompt graphs ────────────────────────────────────────────────

    #[test]
    fn prompt_graph_summary() {
        let types = NodeTypes::default();
        let out = parse_prompt(PROMPT, None, &opts(&types)).unwrap();
        assert_eq!(out.tool, "ComfyUI");
        assert_eq!(out.positive, "a castle");
        assert_eq!(out.negative, "fog");
        assert_eq!(
            out.settings.display,
            "Steps: 20, Sampler: euler, CFG scale: 7.5, Seed: 42, Size: 512x768, Model: sd15.safetensors"
        );
        let detail = out.settings.detail.as_object().unwrap();
        assert_eq!(detail.get("scheduler"), Some(&Value::from("normal")));
        assert!(out.raw.starts_with("a castle\nfog\n{"));
        assert_eq!(out.sdxl, None);
    }

    #[test]
    fn sdxl_prompt_graph_carries_per_clip_texts() {
        let prompt = r#"{
            "6": {"class_type": "CLIPTextEncodeSDXL", "inputs": {"text_g": "a fox", "text_l": "fox"}},
            "7": {"class_type": "CLIPTextEncodeSDXL", "inputs": {"text_g": "blurry", "text_l": "bad"}},
            "3": {"class_type": "KSampler", "inputs": {"steps": 30, "positive": ["6", 0], "negative": ["7", 0]}}
        }"#;
        let types = NodeTypes::default();
        let out = parse_prompt(prompt, None, &opts(&types)).unwrap();
        assert_eq!(out.positive, "a fox");
        let sdxl = out.sdxl.unwrap();
        assert_eq!(sdxl.positive.labeled(), [("Clip G", "a fox"), ("Clip L", "fox")]);
        assert_eq!(sdxl.negative.clip_l.as_deref(), Some("bad"));
        assert_eq!(sdxl.negative.refiner, None);
    }

    #[test]
    fn workflow_text_joins_raw() {
        let types = NodeTypes::default();
        let out = parse_prompt(PROMPT, Some("{\"nodes\":[]}"), &opts(&types)).unwrap();
        assert!(out.raw.ends_with("{\"nodes\":[]}"));
    }

    #[test]
    fn prompt_without_end_nodes_still_parses() {
        let types = NodeTypes::default();
        let prompt = r#"{"1": {"class_type": "LoadImage", "inputs": {}}}"#;
        let out = parse_prompt(prompt, None, &opts(&types)).unwrap();
        assert!(out.positive.is_empty());
        assert!(out.settings.entries.is_empty());
        assert!(out.raw.starts_with('{'));
    }

    #[test]
    fn invalid_prompt_is_not_parsed() {
        let types = NodeTypes::default();
        assert!(parse_prompt("{oops", None, &opts(&types)).is_none());
        assert!(parse_prompt("[1, 2]", None, &opts(&types)).is_none());
    }

    #[test]
    fn noise_seed_stands_in_for_seed() {
        let types = NodeTypes::default();
        let out = parse_prompt(
            r#"{"1": {"class_type": "KSamplerAdvanced", "inputs": {"noise_seed": 9}}}"#,
            None,
            &GraphOptions { types: &types, dimensions: None },
        )
        .unwrap();
        assert_eq!(out.settings.display, "Seed: 9");
    }

    // ── workflows ────────────────────────────────────────────────────

    #[test]
    fn empty_workflow_parses() {
        let types = NodeTypes::default();
        let out = parse_workflow(r#"{"nodes": [], "links": []}"#, &opts(&types)).unwrap();
        assert_eq!(out.tool, "ComfyUI");
        assert_eq!(out.raw, r#"{"nodes": [], "links": []}"#);
    }

    #[test]
    fn embedded_workflow_is_found_after_prefix_text() {
        let text = r#"Workflow: {"nodes": [{"id": 1, "type": "CLIPTextEncode", "widgets_values": ["hi"]},
            {"id": 2, "type": "KSampler", "inputs": [{"name": "positive", "link": 1}], "widgets_values": [5, "fixed", 12]}],
            "links": [[1, 1, 0, 2, 1, "CONDITIONING"]]} trailing"#;
        let types = NodeTypes::default();
        let out = parse_embedded_workflow(text, &opts(&types)).unwrap();
        assert_eq!(out.positive, "hi");
        assert!(out.settings.display.starts_with("Steps: 12, Seed: 5"));
        assert_eq!(out.blobs[0].label, "workflow");
        assert!(out.blobs[0].text.ends_with("]]}"));
    }

    #[test]
    fn embedded_json_without_graph_keys_is_rejected() {
        let types = NodeTypes::default();
        assert!(parse_embedded_workflow(r#"{"prompt": "x"}"#, &opts(&types)).is_none());
        assert!(parse_embedded_workflow("a cat\nSteps: 20", &opts(&types)).is_none());
    }
}
