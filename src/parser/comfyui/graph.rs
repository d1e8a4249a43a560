//! ComfyUI node graphs and the upstream traversal that recovers prompts from them.
//!
//! Graphs are user-authored and may contain cycles, so the traversal never
//! recurses: it runs an explicit stack of [`Step`]s, and a node is expanded at
//! most once per traversal. Text resolution chains keep their own seen-sets.

use std::collections::{HashMap, HashSet};

use serde_json::Value;

use crate::json::{self, JsonObject};
use crate::result::SdxlPrompt;

pub const SAMPLER_TYPES: &[&str] =
    &["KSampler", "KSamplerAdvanced", "KSampler (Efficient)", "SamplerCustom"];
pub const SAVE_IMAGE_TYPES: &[&str] =
    &["SaveImage", "Image Save", "SDPromptSaver", "PreviewImage"];
pub const TEXT_ENCODER_TYPES: &[&str] = &["CLIPTextEncode", SDXL_ENCODER, SDXL_REFINER_ENCODER];

const SDXL_ENCODER: &str = "CLIPTextEncodeSDXL";
const SDXL_REFINER_ENCODER: &str = "CLIPTextEncodeSDXLRefiner";

/// Text inputs of a recognized encoder, in preference order.
const ENCODER_TEXT_INPUTS: &[&str] = &["text", "text_g", "text_l"];
/// Literal inputs that may hold prompt text on any other node.
const TEXT_CANDIDATES: &[&str] = &["text", "positive", "prompt", "string"];

/// How the traversal treats a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    SaveImage,
    Sampler,
    Other,
}

/// The node-type allow-lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeTypes {
    pub samplers: Vec<String>,
    pub save_images: Vec<String>,
    pub text_encoders: Vec<String>,
}

impl Default for NodeTypes {
    fn default() -> Self {
        let owned = |types: &[&str]| types.iter().map(|t| t.to_string()).collect();
        Self {
            samplers: owned(SAMPLER_TYPES),
            save_images: owned(SAVE_IMAGE_TYPES),
            text_encoders: owned(TEXT_ENCODER_TYPES),
        }
    }
}

impl NodeTypes {
    /// The built-in lists extended with extra type names.
    pub fn with_extra(
        samplers: &[String],
        save_images: &[String],
        text_encoders: &[String],
    ) -> Self {
        let mut types = Self::default();
        extend_unique(&mut types.samplers, samplers);
        extend_unique(&mut types.save_images, save_images);
        extend_unique(&mut types.text_encoders, text_encoders);
        types
    }

    pub fn kind(&self, class_type: &str) -> NodeKind {
        if self.save_images.iter().any(|t| t == class_type) {
            NodeKind::SaveImage
        } else if self.samplers.iter().any(|t| t == class_type) {
            NodeKind::Sampler
        } else {
            NodeKind::Other
        }
    }

    pub fn is_text_encoder(&self, class_type: &str) -> bool {
        self.text_encoders.iter().any(|t| t == class_type)
    }
}

fn extend_unique(list: &mut Vec<String>, extra: &[String]) {
    for t in extra {
        if !list.contains(t) {
            list.push(t.clone());
        }
    }
}

/// A node input: a literal value or a link to another node's output.
#[derive(Debug, Clone, PartialEq)]
pub enum InputValue {
    Literal(Value),
    Link { producer: String, output: u64 },
}

impl InputValue {
    /// Prompt-format input: `["<id>", <slot>]` is a link, anything else a literal.
    pub fn from_json(value: &Value) -> Self {
        if let Value::Array(items) = value {
            if let [id, Value::Number(slot)] = items.as_slice() {
                if let (Some(producer), Some(output)) = (node_id(id), slot.as_u64()) {
                    return Self::Link { producer, output };
                }
            }
        }
        Self::Literal(value.clone())
    }

    pub fn producer(&self) -> Option<&str> {
        match self {
            Self::Link { producer, .. } => Some(producer),
            Self::Literal(_) => None,
        }
    }
}

/// Node ids are strings in prompt graphs and numbers in UI workflows.
pub(crate) fn node_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub class_type: String,
    /// Inputs in source order.
    pub inputs: Vec<(String, InputValue)>,
}

impl Node {
    pub fn input(&self, name: &str) -> Option<&InputValue> {
        self.inputs.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Producer id of the named input, if it is a link.
    pub fn link(&self, name: &str) -> Option<&str> {
        self.input(name).and_then(InputValue::producer)
    }

    /// Producer id of the first linked input.
    pub fn first_link(&self) -> Option<&str> {
        self.inputs.iter().find_map(|(_, v)| v.producer())
    }

    fn literal_str(&self, name: &str) -> Option<&str> {
        match self.input(name)? {
            InputValue::Literal(Value::String(s)) => Some(s),
            _ => None,
        }
    }
}

/// Id-keyed node arena, in source order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeGraph {
    nodes: Vec<(String, Node)>,
    index: HashMap<String, usize>,
}

impl NodeGraph {
    /// Build from a prompt graph: `{"<id>": {"class_type": .., "inputs": {..}}}`.
    pub fn from_prompt(prompt: &JsonObject) -> Self {
        let mut graph = Self::default();
        for (id, node) in prompt {
            let Some(node) = node.as_object() else {
                continue;
            };
            let class_type = json::str_field(node, "class_type").unwrap_or_default().to_string();
            let inputs = node
                .get("inputs")
                .and_then(Value::as_object)
                .map(|inputs| {
                    inputs
                        .iter()
                        .map(|(name, value)| (name.clone(), InputValue::from_json(value)))
                        .collect()
                })
                .unwrap_or_default();
            graph.insert(id.clone(), Node { class_type, inputs });
        }
        graph
    }

    /// Add a node; a repeated id keeps the first node.
    pub fn insert(&mut self, id: String, node: Node) {
        if self.index.contains_key(&id) {
            return;
        }
        self.index.insert(id.clone(), self.nodes.len());
        self.nodes.push((id, node));
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.index.get(id).map(|&i| &self.nodes[i].1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Node)> {
        self.nodes.iter().map(|(id, node)| (id.as_str(), node))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Save-image and sampler nodes, in source order.
    pub fn end_nodes<'g>(&'g self, types: &NodeTypes) -> Vec<&'g str> {
        self.iter()
            .filter(|(_, node)| types.kind(&node.class_type) != NodeKind::Other)
            .map(|(id, _)| id)
            .collect()
    }
}

/// What one traversal from an end node found.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Traversal {
    /// Expanded node ids, in visit order.
    pub visited: Vec<String>,
    pub positive: Option<String>,
    pub negative: Option<String>,
    /// Texts of the SDXL encoders met while resolving each side.
    pub positive_sdxl: SdxlPrompt,
    pub negative_sdxl: SdxlPrompt,
    /// Sampler settings, last write wins.
    pub flow: JsonObject,
    /// Every sampler's literal inputs combined with [`json::merge_dict`].
    pub detail: JsonObject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Positive,
    Negative,
}

impl Slot {
    fn from_input(name: &str) -> Option<Self> {
        match name {
            "positive" => Some(Self::Positive),
            "negative" => Some(Self::Negative),
            _ => None,
        }
    }
}

enum Step<'g> {
    /// Expand a node (no-op if already expanded).
    Visit(&'g str),
    /// Look for prompt text at `node`, continuing chain `chain`.
    Resolve { slot: Slot, node: &'g str, chain: usize },
    /// Record a sampler setting.
    Record(&'g str, &'g Value),
    /// Capture `ckpt_name` from the node feeding a sampler's `model`.
    Checkpoint(&'g str),
}

enum TextStep<'g> {
    Found(&'g str),
    Follow(&'g str),
    Dead,
}

struct Walker<'g> {
    graph: &'g NodeGraph,
    types: &'g NodeTypes,
    seen: HashSet<&'g str>,
    chains: Vec<HashSet<&'g str>>,
    out: Traversal,
}

/// Walk upstream from `start`.
///
/// Save-image nodes follow `images`. Samplers resolve `positive`/`negative`
/// to text, follow every other link and record literal inputs as settings.
/// Any other node follows its first linked input only. Steps run in the same
/// order a depth-first recursion would, so when several samplers are reached
/// the one expanded last decides the prompts.
pub fn traverse<'g>(graph: &'g NodeGraph, types: &'g NodeTypes, start: &'g str) -> Traversal {
    let mut walker = Walker {
        graph,
        types,
        seen: HashSet::new(),
        chains: Vec::new(),
        out: Traversal::default(),
    };
    let mut stack = vec![Step::Visit(start)];
    while let Some(step) = stack.pop() {
        walker.run(step, &mut stack);
    }
    walker.out
}

/// Traverse from every end node and keep the traversal that expanded the
/// most nodes (the first one on a tie).
pub fn best_traversal<'g>(
    graph: &'g NodeGraph,
    types: &'g NodeTypes,
) -> Option<(&'g str, Traversal)> {
    let mut best: Option<(&str, Traversal)> = None;
    for end in graph.end_nodes(types) {
        let candidate = traverse(graph, types, end);
        if best
            .as_ref()
            .is_none_or(|(_, b)| candidate.visited.len() > b.visited.len())
        {
            best = Some((end, candidate));
        }
    }
    best
}

impl<'g> Walker<'g> {
    fn run(&mut self, step: Step<'g>, stack: &mut Vec<Step<'g>>) {
        match step {
            Step::Visit(id) => self.visit(id, stack),
            Step::Resolve { slot, node, chain } => self.resolve(slot, node, chain, stack),
            Step::Record(key, value) => {
                self.out.flow.insert(key.to_string(), value.clone());
            }
            Step::Checkpoint(id) => {
                let ckpt = self
                    .graph
                    .node(id)
                    .and_then(|n| n.literal_str("ckpt_name"))
                    .filter(|s| !s.trim().is_empty());
                if let Some(ckpt) = ckpt {
                    self.out
                        .flow
                        .insert("ckpt_name".to_string(), Value::String(ckpt.to_string()));
                }
            }
        }
    }

    fn visit(&mut self, id: &'g str, stack: &mut Vec<Step<'g>>) {
        if !self.seen.insert(id) {
            return;
        }
        self.out.visited.push(id.to_string());
        let Some(node) = self.graph.node(id) else {
            return;
        };

        let mut next = Vec::new();
        match self.types.kind(&node.class_type) {
            NodeKind::SaveImage => next.extend(node.link("images").map(Step::Visit)),
            NodeKind::Sampler => {
                let mut literals = JsonObject::new();
                for (name, value) in &node.inputs {
                    match (value, Slot::from_input(name)) {
                        (InputValue::Link { producer, .. }, slot) => {
                            next.push(Step::Visit(producer.as_str()));
                            if let Some(slot) = slot {
                                self.chains.push(HashSet::new());
                                next.push(Step::Resolve {
                                    slot,
                                    node: producer.as_str(),
                                    chain: self.chains.len() - 1,
                                });
                            }
                        }
                        (InputValue::Literal(v), None) => {
                            next.push(Step::Record(name.as_str(), v));
                            literals.insert(name.clone(), v.clone());
                        }
                        (InputValue::Literal(_), Some(_)) => {}
                    }
                }
                next.extend(node.link("model").map(Step::Checkpoint));
                self.out.detail = json::merge_dict(&self.out.detail, &literals);
            }
            NodeKind::Other => next.extend(node.first_link().map(Step::Visit)),
        }
        stack.extend(next.into_iter().rev());
    }

    fn resolve(&mut self, slot: Slot, id: &'g str, chain: usize, stack: &mut Vec<Step<'g>>) {
        if !self.chains[chain].insert(id) {
            return;
        }
        let Some(node) = self.graph.node(id) else {
            return;
        };
        match text_step(node, self.types) {
            TextStep::Found(text) => {
                let (target, sdxl) = match slot {
                    Slot::Positive => (&mut self.out.positive, &mut self.out.positive_sdxl),
                    Slot::Negative => (&mut self.out.negative, &mut self.out.negative_sdxl),
                };
                *target = Some(text.to_string());
                record_sdxl(sdxl, node);
            }
            TextStep::Follow(next) => {
                stack.push(Step::Resolve { slot, node: next, chain });
                stack.push(Step::Visit(next));
            }
            TextStep::Dead => {}
        }
    }
}

/// Keep the literal texts of an SDXL encoder. Inputs that are absent or
/// linked leave earlier values in place.
fn record_sdxl(prompt: &mut SdxlPrompt, node: &Node) {
    let owned = |name: &str| node.literal_str(name).map(str::to_string);
    match node.class_type.as_str() {
        SDXL_ENCODER => {
            prompt.clip_g = owned("text_g").or(prompt.clip_g.take());
            prompt.clip_l = owned("text_l").or(prompt.clip_l.take());
        }
        SDXL_REFINER_ENCODER => prompt.refiner = owned("text").or(prompt.refiner.take()),
        _ => {}
    }
}

fn text_step<'g>(node: &'g Node, types: &NodeTypes) -> TextStep<'g> {
    if types.is_text_encoder(&node.class_type) {
        match ENCODER_TEXT_INPUTS.iter().find_map(|k| node.input(k)) {
            Some(InputValue::Literal(Value::String(s))) => return TextStep::Found(s),
            Some(InputValue::Link { producer, .. }) => return TextStep::Follow(producer),
            _ => {}
        }
    }
    if let Some(text) = TEXT_CANDIDATES.iter().find_map(|k| node.literal_str(k)) {
        return TextStep::Found(text);
    }
    match node.first_link() {
        Some(next) => TextStep::Follow(next),
        None => TextStep::Dead,
    }
}
