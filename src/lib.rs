//! # prompt-reader
//!
//! Recover the prompts and sampler settings that AI image generators embed in
//! PNG, JPEG and WebP files: A1111 webUI, ComfyUI, Fooocus, NovelAI (legacy and
//! alpha-channel "stealth") and StableSwarmUI.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use prompt_reader::config::ReaderConfig;
//! use prompt_reader::pipeline::{PromptReader, collect_images};
//! use std::path::PathBuf;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = ReaderConfig::load(Some("prompt-reader.json".as_ref()))?;
//!     let reader = PromptReader::new(config);
//!
//!     for path in collect_images(&[PathBuf::from("./outputs")]) {
//!         let result = reader.read_file(&path)?;
//!         println!("{}: {} ({})", path.display(), result.tool, result.detection_path);
//!         println!("  + {}", result.positive);
//!         println!("  - {}", result.negative);
//!         println!("  {}", result.setting);
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## How a file is read
//!
//! 1. **Sniff** the container from its signature ([`pipeline::ContainerFormat`]).
//! 2. **Extract** a bag of raw text fields: PNG textual chunks
//!    ([`extract::png`]) or the `UserComment`, `Software` and
//!    `ImageDescription` EXIF tags ([`extract::exif`]).
//! 3. **Cascade** through an ordered table of tool heuristics ([`parser`]).
//!    The alpha-channel decoder ([`stealth`]) only runs if a row asks for it.
//! 4. **Assemble** a [`result::ParseResult`] with an evidence trail.
//!
//! ## Supported Sources
//!
//! | Tool | PNG | JPEG / WebP |
//! |------|-----|-------------|
//! | A1111 webUI | `parameters` | `UserComment` |
//! | ComfyUI | `prompt`, `workflow`, workflow JSON in `parameters` | workflow JSON in `UserComment` |
//! | Fooocus | `Comment` | `UserComment` |
//! | NovelAI | `Software` + `Description` + `Comment`, alpha channel | `Software` + `ImageDescription`, alpha channel |
//! | StableSwarmUI | `parameters` | `UserComment` |
//!
//! ## Modules
//!
//! - [`config`]: Reader configuration and loading/saving
//! - [`extract`]: PNG chunk and EXIF tag extraction
//! - [`json`]: Order-preserving JSON helpers
//! - [`parser`]: The tool cascade and per-tool parsers
//! - [`pipeline`]: Format sniffing, the reader, image collection
//! - [`result`]: The result and evidence types
//! - [`stealth`]: Alpha-channel LSB payload decoder

pub mod config;
pub mod extract;
pub mod json;
pub mod parser;
pub mod pipeline;
pub mod result;
pub mod stealth;

pub use pipeline::{ContainerFormat, PromptReader};
pub use result::ParseResult;
