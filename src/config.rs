use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::parser::comfyui::NodeTypes;
use crate::stealth::{DEFAULT_MAX_PAYLOAD_BYTES, StealthLimits};

/// File name looked up next to the executable.
pub const CONFIG_FILE_NAME: &str = "prompt-reader.json";

/// Default cap on inflated `zTXt` / `iTXt` / stealth payload text.
pub const DEFAULT_MAX_INFLATE_BYTES: usize = 64 * 1024 * 1024;

/// Reader configuration.
///
/// Every field has a default, so a config file only needs the keys it changes.
///
/// # Loading
///
/// ```rust,no_run
/// use prompt_reader::config::ReaderConfig;
///
/// // From a JSON file
/// let config = ReaderConfig::load(Some("prompt-reader.json".as_ref())).unwrap();
///
/// // Or use defaults and customize
/// let mut config = ReaderConfig::default();
/// config.decode_stealth = false;
/// config.extra_sampler_types.push("KSampler //Inspire".into());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Allow the cascade to decode the bitmap and look for alpha-channel metadata.
    pub decode_stealth: bool,
    /// Largest declared alpha-channel payload accepted, in bytes.
    pub stealth_max_bytes: u32,
    /// Largest inflated text accepted from a compressed chunk or payload.
    pub max_inflate_bytes: usize,
    /// ComfyUI node types treated as samplers, on top of the built-in list.
    pub extra_sampler_types: Vec<String>,
    /// ComfyUI node types treated as save-image end nodes.
    pub extra_save_image_types: Vec<String>,
    /// ComfyUI node types treated as text encoders.
    pub extra_text_encoder_types: Vec<String>,
    /// Read image dimensions and report them (and a `Size` setting for ComfyUI).
    pub include_dimensions: bool,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            decode_stealth: true,
            stealth_max_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            max_inflate_bytes: DEFAULT_MAX_INFLATE_BYTES,
            extra_sampler_types: Vec::new(),
            extra_save_image_types: Vec::new(),
            extra_text_encoder_types: Vec::new(),
            include_dimensions: true,
        }
    }
}

impl ReaderConfig {
    /// Default config location: `prompt-reader.json` beside the executable.
    pub fn config_path() -> Result<PathBuf> {
        let exe = std::env::current_exe().context("Cannot locate the running executable")?;
        let dir = exe
            .parent()
            .context("Executable path has no parent directory")?;
        Ok(dir.join(CONFIG_FILE_NAME))
    }

    fn resolve(path: Option<&Path>) -> Result<PathBuf> {
        path.map_or_else(Self::config_path, |p| Ok(p.to_path_buf()))
    }

    /// Load reader settings from `path`, or from [`Self::config_path`].
    ///
    /// A missing file is not an error: the built-in settings are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = Self::resolve(path)?;
        if !path.exists() {
            log::warn!(
                "No prompt-reader settings at {}, using built-in settings",
                path.display()
            );
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read reader settings {}", path.display()))?;
        let config = serde_json::from_str(&text)
            .with_context(|| format!("Invalid reader settings in {}", path.display()))?;
        log::debug!("Loaded reader settings from {}", path.display());
        Ok(config)
    }

    /// Write these settings as pretty JSON to `path`, or to [`Self::config_path`].
    pub fn save(&self, path: Option<&Path>) -> Result<PathBuf> {
        let path = Self::resolve(path)?;
        let text =
            serde_json::to_string_pretty(self).context("Failed to serialize reader settings")?;
        std::fs::write(&path, text)
            .with_context(|| format!("Failed to write reader settings {}", path.display()))?;
        log::info!("Reader settings saved to {}", path.display());
        Ok(path)
    }

    /// The ComfyUI allow-lists with this config's extra types added.
    pub fn node_types(&self) -> NodeTypes {
        NodeTypes::with_extra(
            &self.extra_sampler_types,
            &self.extra_save_image_types,
            &self.extra_text_encoder_types,
        )
    }

    pub fn stealth_limits(&self) -> StealthLimits {
        StealthLimits {
            max_payload_bytes: self.stealth_max_bytes,
            max_inflate_bytes: self.max_inflate_bytes,
        }
    }
}
