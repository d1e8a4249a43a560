//! The tool parser cascade.
//!
//! Generation tools each hide their metadata differently. The cascade is an
//! explicit, ordered table of [`Strategy`] rows per container family
//! ([`PNG_STRATEGIES`], [`EXIF_STRATEGIES`]). For each row a cheap predicate
//! over the [`RawMetadataBag`] decides whether the row applies; if it does, the
//! handler parses. A handler that cannot make sense of its input returns `None`
//! and the cascade moves on to the next row. The first handler to return an
//! output wins. When nothing matches the caller produces an "Unknown" result.
//!
//! The alpha-channel decoder is expensive, so it only runs when a row asks for
//! it through [`ParseContext::stealth`], and at most once per file.

pub mod a1111;
pub mod comfyui;
pub mod fooocus;
pub mod novelai;
pub mod swarmui;

use std::cell::OnceCell;

use crate::extract::RawMetadataBag;
use crate::extract::exif::{IMAGE_DESCRIPTION, SOFTWARE, USER_COMMENT};
use crate::json::JsonObject;
use crate::pipeline::ContainerFormat;
use crate::result::{ParseEvidence, RawBlob, SdxlPrompts, Settings};
use crate::stealth::StealthMiss;

use comfyui::{GraphOptions, NodeTypes};

/// What a tool parser recovered, before aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub tool: String,
    pub positive: String,
    pub negative: String,
    pub settings: Settings,
    /// Newline-joined prompts and source text, shown as the raw view.
    pub raw: String,
    /// Extra evidence beyond the bag fields (decoded payloads, embedded JSON).
    pub blobs: Vec<RawBlob>,
    /// Per-encoder texts, when the prompts came from SDXL encoders.
    pub sdxl: Option<SdxlPrompts>,
}

impl ToolOutput {
    pub const UNKNOWN: &'static str = "Unknown";

    /// An empty result labeled "Unknown" with the given raw text.
    pub fn unknown(raw: String) -> Self {
        Self {
            tool: Self::UNKNOWN.to_string(),
            positive: String::new(),
            negative: String::new(),
            settings: Settings::default(),
            raw,
            blobs: Vec::new(),
            sdxl: None,
        }
    }
}

type StealthSource<'a> = &'a dyn Fn() -> Result<JsonObject, StealthMiss>;

fn no_bitmap() -> Result<JsonObject, StealthMiss> {
    Err(StealthMiss::NoBitmap)
}

/// Everything a strategy may look at.
pub struct ParseContext<'a> {
    pub format: ContainerFormat,
    pub bag: &'a RawMetadataBag,
    pub node_types: &'a NodeTypes,
    pub dimensions: Option<(u32, u32)>,
    stealth_enabled: bool,
    stealth_source: StealthSource<'a>,
    stealth: OnceCell<Result<JsonObject, StealthMiss>>,
}

impl<'a> ParseContext<'a> {
    /// A context with no bitmap behind it; the stealth row never matches.
    pub fn new(
        format: ContainerFormat,
        bag: &'a RawMetadataBag,
        node_types: &'a NodeTypes,
    ) -> Self {
        Self {
            format,
            bag,
            node_types,
            dimensions: None,
            stealth_enabled: false,
            stealth_source: &no_bitmap,
            stealth: OnceCell::new(),
        }
    }

    pub fn with_dimensions(mut self, dimensions: Option<(u32, u32)>) -> Self {
        self.dimensions = dimensions;
        self
    }

    /// Attach the lazy alpha-channel decoder.
    pub fn with_stealth(mut self, source: StealthSource<'a>) -> Self {
        self.stealth_enabled = true;
        self.stealth_source = source;
        self
    }

    /// The decoded stealth payload, decoding on first use.
    pub fn stealth(&self) -> Option<&JsonObject> {
        if !self.stealth_enabled {
            return None;
        }
        self.stealth
            .get_or_init(|| (self.stealth_source)())
            .as_ref()
            .ok()
    }

    fn graph_options(&self) -> GraphOptions<'_> {
        GraphOptions {
            types: self.node_types,
            dimensions: self.dimensions,
        }
    }
}

/// One row of the cascade.
pub struct Strategy {
    /// Short identifier used in the evidence log.
    pub name: &'static str,
    /// Which parser and which field fired, for the detection path.
    pub source: &'static str,
    applies: fn(&ParseContext<'_>) -> bool,
    parse: fn(&ParseContext<'_>) -> Option<ToolOutput>,
}

impl Strategy {
    pub fn applies(&self, ctx: &ParseContext<'_>) -> bool {
        (self.applies)(ctx)
    }

    pub fn parse(&self, ctx: &ParseContext<'_>) -> Option<ToolOutput> {
        (self.parse)(ctx)
    }
}

/// Cascade for PNG textual chunks.
pub static PNG_STRATEGIES: &[Strategy] = &[
    Strategy {
        name: "swarmui",
        source: "SwarmUI(parameters:sui_image_params)",
        applies: |ctx| has_marker(ctx.bag.get("parameters")),
        parse: |ctx| swarmui::parse(ctx.bag.get("parameters")?),
    },
    Strategy {
        name: "novelai-legacy",
        source: "NovelAI(legacy:Software+Description+Comment)",
        applies: |ctx| {
            ctx.bag.get(SOFTWARE) == Some(novelai::SOFTWARE_LABEL)
                && ctx.bag.get_nonblank("Description").is_some()
                && ctx.bag.get_nonblank("Comment").is_some()
        },
        parse: |ctx| novelai::parse_legacy(ctx.bag.get("Description")?, ctx.bag.get("Comment")?),
    },
    Strategy {
        name: "fooocus",
        source: "Fooocus(Comment:json+negative_prompt)",
        applies: |ctx| ctx.bag.get_nonblank("Comment").is_some_and(fooocus::looks_like),
        parse: |ctx| fooocus::parse(ctx.bag.get("Comment")?),
    },
    Strategy {
        name: "comfyui-workflow",
        source: "ComfyUI(workflow)",
        applies: |ctx| {
            ctx.bag.get_nonblank("prompt").is_none() && ctx.bag.get_nonblank("workflow").is_some()
        },
        parse: |ctx| comfyui::parse_workflow(ctx.bag.get("workflow")?, &ctx.graph_options()),
    },
    Strategy {
        name: "comfyui",
        source: "ComfyUI(prompt)",
        applies: |ctx| ctx.bag.get_nonblank("prompt").is_some(),
        parse: |ctx| {
            comfyui::parse_prompt(
                ctx.bag.get("prompt")?,
                ctx.bag.get_nonblank("workflow"),
                &ctx.graph_options(),
            )
        },
    },
    Strategy {
        name: "comfyui-embedded",
        source: "ComfyUI(parameters:workflow-json)",
        applies: |ctx| ctx.bag.get_nonblank("parameters").is_some(),
        parse: |ctx| {
            comfyui::parse_embedded_workflow(ctx.bag.get("parameters")?, &ctx.graph_options())
        },
    },
    Strategy {
        name: "a1111",
        source: "A1111(parameters)",
        applies: |ctx| ctx.bag.get_nonblank("parameters").is_some(),
        parse: |ctx| {
            let tool = if ctx.bag.contains_key("prompt") {
                a1111::COMFY_COMPATIBLE_LABEL
            } else {
                a1111::TOOL_LABEL
            };
            Some(a1111::parse(ctx.bag.get("parameters")?, tool))
        },
    },
    Strategy {
        name: "novelai-stealth",
        source: "NovelAI(stealth:alpha-lsb)",
        applies: |ctx| ctx.stealth_enabled,
        parse: |ctx| ctx.stealth().map(novelai::parse_stealth),
    },
];

/// Cascade for JPEG and WebP EXIF tags.
pub static EXIF_STRATEGIES: &[Strategy] = &[
    Strategy {
        name: "swarmui",
        source: "SwarmUI(UserComment:sui_image_params)",
        applies: |ctx| has_marker(ctx.bag.get(USER_COMMENT)),
        parse: |ctx| swarmui::parse(ctx.bag.get(USER_COMMENT)?),
    },
    Strategy {
        name: "comfyui-embedded",
        source: "ComfyUI(UserComment:workflow-json)",
        applies: |ctx| ctx.bag.get_nonblank(USER_COMMENT).is_some(),
        parse: |ctx| {
            comfyui::parse_embedded_workflow(ctx.bag.get(USER_COMMENT)?, &ctx.graph_options())
        },
    },
    Strategy {
        name: "fooocus",
        source: "Fooocus(UserComment:json+negative_prompt)",
        applies: |ctx| ctx.bag.get_nonblank(USER_COMMENT).is_some_and(fooocus::looks_like),
        parse: |ctx| fooocus::parse(ctx.bag.get(USER_COMMENT)?),
    },
    Strategy {
        name: "a1111",
        source: "A1111(UserComment)",
        applies: |ctx| ctx.bag.get_nonblank(USER_COMMENT).is_some(),
        parse: |ctx| Some(a1111::parse(ctx.bag.get(USER_COMMENT)?, a1111::TOOL_LABEL)),
    },
    Strategy {
        name: "novelai-stealth",
        source: "NovelAI(stealth:alpha-lsb)",
        applies: |ctx| ctx.stealth_enabled,
        parse: |ctx| ctx.stealth().map(novelai::parse_stealth),
    },
    Strategy {
        name: "novelai-legacy",
        source: "NovelAI(legacy:Software+ImageDescription)",
        applies: |ctx| {
            ctx.bag.get(SOFTWARE) == Some(novelai::SOFTWARE_LABEL)
                && ctx.bag.get_nonblank(IMAGE_DESCRIPTION).is_some()
        },
        parse: |ctx| {
            let comment = ctx.bag.get_nonblank(USER_COMMENT).unwrap_or("{}");
            novelai::parse_legacy(ctx.bag.get(IMAGE_DESCRIPTION)?, comment)
        },
    },
];

fn has_marker(text: Option<&str>) -> bool {
    text.is_some_and(|t| t.contains(swarmui::MARKER))
}

/// The strategy table for a container, empty for unknown containers.
pub fn strategies_for(format: ContainerFormat) -> &'static [Strategy] {
    match format {
        ContainerFormat::Png => PNG_STRATEGIES,
        ContainerFormat::Jpeg | ContainerFormat::WebP => EXIF_STRATEGIES,
        ContainerFormat::Unknown => &[],
    }
}

/// Run `strategies` in order and return the first row that produced an output.
pub fn run_cascade(
    ctx: &ParseContext<'_>,
    strategies: &'static [Strategy],
    evidence: &mut ParseEvidence,
) -> Option<(&'static Strategy, ToolOutput)> {
    for strategy in strategies {
        if !strategy.applies(ctx) {
            evidence.push("cascade", format!("{}: not applicable", strategy.name));
            continue;
        }

        let attempted_stealth = ctx.stealth.get().is_some();
        let output = strategy.parse(ctx);
        if !attempted_stealth {
            match ctx.stealth.get() {
                Some(Ok(payload)) => {
                    evidence.push("stealth", format!("decoded payload with {} keys", payload.len()))
                }
                Some(Err(miss)) => evidence.push("stealth", miss.to_string()),
                None => {}
            }
        }

        match output {
            Some(output) => {
                evidence.push("cascade", format!("{}: matched", strategy.name));
                return Some((strategy, output));
            }
            None => evidence.push(
                "cascade",
                format!("{}: could not parse, falling through", strategy.name),
            ),
        }
    }
    None
}
