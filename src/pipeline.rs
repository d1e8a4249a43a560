use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::ReaderConfig;
use crate::extract::{self, NomExifReader, PNG_SIGNATURE, TagReader};
use crate::json::JsonObject;
use crate::parser::comfyui::NodeTypes;
use crate::parser::{ParseContext, ToolOutput, run_cascade, strategies_for};
use crate::result::{ParseEvidence, ParseResult};
use crate::stealth::{self, BitmapDecoder, ImageCrateDecoder, StealthMiss};

/// Supported image extensions.
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp"];

/// The container a stream was sniffed as.
///
/// Detection looks at the first [`ContainerFormat::HEADER_LEN`] bytes only and
/// matches signatures exactly.
///
/// # Example
///
/// ```rust
/// use prompt_reader::pipeline::ContainerFormat;
///
/// assert_eq!(ContainerFormat::sniff(b"\xFF\xD8\xFF\xE0"), ContainerFormat::Jpeg);
/// assert_eq!(ContainerFormat::sniff(b"GIF89a"), ContainerFormat::Unknown);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ContainerFormat {
    #[serde(rename = "PNG")]
    Png,
    #[serde(rename = "JPEG")]
    Jpeg,
    #[serde(rename = "WEBP")]
    WebP,
    Unknown,
}

impl ContainerFormat {
    /// Bytes of header the sniffer needs.
    pub const HEADER_LEN: usize = 16;

    pub fn sniff(header: &[u8]) -> Self {
        if header.starts_with(&PNG_SIGNATURE) {
            Self::Png
        } else if header.starts_with(&[0xFF, 0xD8]) {
            Self::Jpeg
        } else if header.len() >= 12 && header.starts_with(b"RIFF") && &header[8..12] == b"WEBP" {
            Self::WebP
        } else {
            Self::Unknown
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Png => "PNG",
            Self::Jpeg => "JPEG",
            Self::WebP => "WEBP",
            Self::Unknown => "Unknown",
        }
    }
}

/// Reads generation metadata out of image streams.
///
/// A reader holds only its configuration and collaborators; [`PromptReader::read`]
/// is a pure function of its input bytes, so one reader can be shared across
/// threads.
///
/// # Example
///
/// ```rust,no_run
/// use prompt_reader::config::ReaderConfig;
/// use prompt_reader::pipeline::PromptReader;
///
/// # fn example() -> anyhow::Result<()> {
/// let reader = PromptReader::new(ReaderConfig::default());
/// let result = reader.read_file("00042-1234.png".as_ref())?;
///
/// println!("{} via {}", result.tool, result.detection_path);
/// println!("Positive: {}", result.positive);
/// if let Some(seed) = result.setting("Seed") {
///     println!("Seed: {seed}");
/// }
/// # Ok(())
/// # }
/// ```
pub struct PromptReader {
    config: ReaderConfig,
    node_types: NodeTypes,
    bitmap: Box<dyn BitmapDecoder>,
    tags: Box<dyn TagReader>,
}

impl Default for PromptReader {
    fn default() -> Self {
        Self::new(ReaderConfig::default())
    }
}

impl PromptReader {
    /// A reader using the `image` crate for bitmaps and `nom-exif` for tags.
    pub fn new(config: ReaderConfig) -> Self {
        Self {
            node_types: config.node_types(),
            config,
            bitmap: Box::new(ImageCrateDecoder),
            tags: Box::new(NomExifReader),
        }
    }

    pub fn with_bitmap_decoder(mut self, decoder: impl BitmapDecoder + 'static) -> Self {
        self.bitmap = Box::new(decoder);
        self
    }

    pub fn with_tag_reader(mut self, reader: impl TagReader + 'static) -> Self {
        self.tags = Box::new(reader);
        self
    }

    /// Read one image file.
    pub fn read_file(&self, path: &Path) -> Result<ParseResult> {
        let bytes =
            std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        self.read(&bytes)
            .with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Read one image stream: sniff, extract, run the cascade, assemble.
    ///
    /// Unrecognized or empty input is not an error; it yields an "Unknown"
    /// result. The only error is a structurally broken PNG signature, which a
    /// sniffed stream never has.
    pub fn read(&self, bytes: &[u8]) -> Result<ParseResult> {
        let mut evidence = ParseEvidence::default();

        let header = &bytes[..bytes.len().min(ContainerFormat::HEADER_LEN)];
        let format = ContainerFormat::sniff(header);
        evidence.push("sniff", format!("{} ({} bytes)", format.label(), bytes.len()));
        if format == ContainerFormat::Unknown {
            return Ok(ParseResult::unsupported(evidence));
        }

        let (bag, channel) = match format {
            ContainerFormat::Png => (
                extract::read_text_chunks(bytes, self.config.max_inflate_bytes)
                    .context("Failed to read PNG text chunks")?,
                "tEXt",
            ),
            _ => (self.tags.read_tags(bytes, format).into_bag(), "EXIF"),
        };
        evidence.push("extract", format!("{channel}: {} field(s) [{}]", bag.len(), bag.key_list()));

        let dimensions = if self.config.include_dimensions {
            self.bitmap.dimensions(bytes)
        } else {
            None
        };

        let limits = self.config.stealth_limits();
        let decode_stealth = || -> Result<JsonObject, StealthMiss> {
            let grid = self.bitmap.decode_alpha(bytes).ok_or(StealthMiss::NoBitmap)?;
            stealth::decode(&grid, limits)
        };
        let mut ctx =
            ParseContext::new(format, &bag, &self.node_types).with_dimensions(dimensions);
        if self.config.decode_stealth {
            ctx = ctx.with_stealth(&decode_stealth);
        }

        let prefix = format!("{} -> {channel}({})", format.label(), bag.key_list());
        let (output, detection_path) =
            match run_cascade(&ctx, strategies_for(format), &mut evidence) {
                Some((strategy, output)) => (output, format!("{prefix} -> {}", strategy.source)),
                None => (
                    ToolOutput::unknown(String::new()),
                    format!("{prefix} -> {}", ToolOutput::UNKNOWN),
                ),
            };

        Ok(ParseResult::assemble(
            format,
            &bag,
            output,
            detection_path,
            dimensions,
            evidence,
        ))
    }
}

/// Collect supported image files from the given paths.
///
/// Accepts a mix of file paths and directory paths. Directories are walked
/// recursively (following symlinks). Only PNG, JPEG and WebP extensions are
/// included.
pub fn collect_images(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut images = Vec::new();

    for path in paths {
        if path.is_file() {
            if is_supported_image(path) {
                images.push(path.clone());
            } else {
                log::warn!("Skipping unsupported file: {}", path.display());
            }
        } else if path.is_dir() {
            for entry in WalkDir::new(path)
                .follow_links(true)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
            {
                let p = entry.path();
                if p.is_file() && is_supported_image(p) {
                    images.push(p.to_path_buf());
                }
            }
        } else {
            log::warn!("Path does not exist: {}", path.display());
        }
    }

    images
}

/// Check if a file has a supported image extension.
fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}
