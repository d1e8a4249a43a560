//! ComfyUI's UI workflow format (`{"nodes": [..], "links": [..]}`) converted
//! into the prompt-graph model.
//!
//! UI nodes keep widget values positionally in `widgets_values`; the names of
//! those positions live in the node definitions, which are not in the file. A
//! small table covers the common nodes. Other nodes get `widget_<n>` names.
//! An input that is linked wins over a widget of the same name.

use std::collections::HashMap;

use serde_json::Value;

use super::graph::{InputValue, Node, NodeGraph, node_id};
use crate::json::{self, JsonObject};

const WIDGET_NAMES: &[(&str, &[&str])] = &[
    (
        "KSampler",
        &["seed", "control_after_generate", "steps", "cfg", "sampler_name", "scheduler", "denoise"],
    ),
    (
        "KSamplerAdvanced",
        &[
            "add_noise",
            "noise_seed",
            "control_after_generate",
            "steps",
            "cfg",
            "sampler_name",
            "scheduler",
            "start_at_step",
            "end_at_step",
            "return_with_leftover_noise",
        ],
    ),
    ("CLIPTextEncode", &["text"]),
    (
        "CLIPTextEncodeSDXL",
        &[
            "width",
            "height",
            "crop_w",
            "crop_h",
            "target_width",
            "target_height",
            "text_g",
            "text_l",
        ],
    ),
    ("CLIPTextEncodeSDXLRefiner", &["ascore", "width", "height", "text"]),
    ("CheckpointLoaderSimple", &["ckpt_name"]),
    ("EmptyLatentImage", &["width", "height", "batch_size"]),
    ("LoraLoader", &["lora_name", "strength_model", "strength_clip"]),
    ("SaveImage", &["filename_prefix"]),
    ("PrimitiveNode", &["string"]),
];

fn widget_names(class_type: &str) -> &'static [&'static str] {
    WIDGET_NAMES
        .iter()
        .find(|(t, _)| *t == class_type)
        .map(|(_, names)| *names)
        .unwrap_or(&[])
}

/// Link id to (origin node, origin slot).
type LinkTable = HashMap<String, (String, u64)>;

/// Array links are `[id, origin, origin_slot, target, target_slot, type]`;
/// newer files use objects with the same fields named.
fn parse_link(link: &Value) -> Option<(String, (String, u64))> {
    match link {
        Value::Array(items) => {
            let id = node_id(items.first()?)?;
            let origin = node_id(items.get(1)?)?;
            let slot = items.get(2)?.as_u64()?;
            Some((id, (origin, slot)))
        }
        Value::Object(obj) => {
            let id = node_id(obj.get("id")?)?;
            let origin = node_id(obj.get("origin_id")?)?;
            let slot = obj.get("origin_slot")?.as_u64()?;
            Some((id, (origin, slot)))
        }
        _ => None,
    }
}

/// Convert a workflow document. `None` unless both `nodes` and `links` are arrays.
pub fn graph_from_workflow(workflow: &JsonObject) -> Option<NodeGraph> {
    let nodes = workflow.get("nodes")?.as_array()?;
    let links: LinkTable = workflow
        .get("links")?
        .as_array()?
        .iter()
        .filter_map(parse_link)
        .collect();

    let mut graph = NodeGraph::default();
    for node in nodes.iter().filter_map(Value::as_object) {
        let Some(id) = node.get("id").and_then(node_id) else {
            continue;
        };
        graph.insert(id, convert_node(node, &links));
    }
    Some(graph)
}

fn convert_node(node: &JsonObject, links: &LinkTable) -> Node {
    let class_type = json::str_field(node, "type").unwrap_or_default().to_string();
    let mut inputs: Vec<(String, InputValue)> = Vec::new();

    for input in node
        .get("inputs")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_object)
    {
        let Some(name) = json::str_field(input, "name") else {
            continue;
        };
        let Some((producer, output)) = input
            .get("link")
            .and_then(node_id)
            .and_then(|link| links.get(&link))
        else {
            continue;
        };
        inputs.push((
            name.to_string(),
            InputValue::Link {
                producer: producer.clone(),
                output: *output,
            },
        ));
    }

    let names = widget_names(&class_type);
    let widgets: Vec<(String, &Value)> = match node.get("widgets_values") {
        Some(Value::Array(values)) => values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let name = names.get(i).map_or_else(|| format!("widget_{i}"), |n| n.to_string());
                (name, v)
            })
            .collect(),
        Some(Value::Object(values)) => values.iter().map(|(k, v)| (k.clone(), v)).collect(),
        _ => Vec::new(),
    };
    for (name, value) in widgets {
        if inputs.iter().any(|(n, _)| *n == name) {
            continue;
        }
        inputs.push((name, InputValue::Literal(value.clone())));
    }

    Node { class_type, inputs }
}
