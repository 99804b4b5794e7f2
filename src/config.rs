//! Collage configuration module.
//!
//! Handles loading, validating, and merging `config.toml`. Stock defaults are
//! the base layer; a user `config.toml` in the config directory overrides any
//! subset of keys.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [canvas]
//! size = 1000               # Edge length of square collages (px)
//! padding = 10              # Gutter between cells and canvas edge (px)
//! background = "#ffffff"
//! cell_background = "#f0f0f0"
//! allow_upscale = true      # Enlarge images smaller than their cell
//! template = "grid2x2"
//!
//! [watermark]
//! enabled = true
//! text = "Sona One - Collage"
//! color = "#222222"
//! scale = 0.035             # Font size as a fraction of canvas size
//!
//! [tiles]
//! tile_size = 300           # classic / polaroid tile edge (px)
//!
//! [loading]
//! max_concurrent = 6        # Image fetches in flight at once
//! timeout_secs = 30
//! policy = "fail-fast"      # or "tolerant"
//! memoize = true            # Reuse decoded images across runs
//! cache_capacity = 24       # Decoded images kept while memoizing
//! max_source_megapixels = 100  # Larger images are refused before decoding
//! # app_origin = "https://gallery.example.com"
//!
//! [export]
//! output_dir = "."
//! collage_basename = "Sona-One-Collage"
//! archive_filename = "images.zip"
//! jpeg_quality = 90
//! share_title = "Sona One Collage"
//! share_text = "Made with Sona One Gallery"
//! # share_command = ["xdg-open"]
//!
//! [gallery]
//! api_url = "http://localhost:4000/api/galleryupload"
//! asset_base_url = "http://localhost:4000"
//! page_size = 12
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::imaging::Color;
use crate::layout::{MAX_CANVAS_EDGE, Template};
use crate::loader::LoadPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Most tracks any square template has on one axis (`stripH`, `stripV`).
const MAX_TRACKS: u32 = 4;
/// Widest tile sheet (`polaroid`).
const MAX_TILE_COLUMNS: u32 = 3;

/// Configuration loaded from `config.toml`.
///
/// All fields have defaults. User config files need only specify the values
/// they want to override. Unknown keys are rejected.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CollageConfig {
    pub canvas: CanvasConfig,
    pub watermark: WatermarkConfig,
    pub tiles: TilesConfig,
    pub loading: LoadingConfig,
    pub export: ExportConfig,
    pub gallery: GalleryConfig,
}

impl CollageConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.canvas.size == 0 {
            return Err(ConfigError::Validation("canvas.size must be positive".into()));
        }
        if self.canvas.size > MAX_CANVAS_EDGE {
            return Err(ConfigError::Validation(format!(
                "canvas.size must be at most {MAX_CANVAS_EDGE}"
            )));
        }
        // stripH has the most tracks on one axis: 4 cells of at least 1px, 5 gutters.
        let needed = self
            .canvas
            .padding
            .saturating_mul(MAX_TRACKS + 1)
            .saturating_add(MAX_TRACKS);
        if needed > self.canvas.size {
            return Err(ConfigError::Validation(
                "canvas.padding leaves no room for cells".into(),
            ));
        }
        if !self.canvas.template.is_supported() {
            return Err(ConfigError::Validation(format!(
                "canvas.template '{}' has no layout algorithm",
                self.canvas.template
            )));
        }
        if !(self.watermark.scale > 0.0 && self.watermark.scale < 1.0) {
            return Err(ConfigError::Validation(
                "watermark.scale must be between 0 and 1".into(),
            ));
        }
        if self.tiles.tile_size == 0 {
            return Err(ConfigError::Validation("tiles.tile_size must be positive".into()));
        }
        if self.tiles.tile_size > MAX_CANVAS_EDGE / MAX_TILE_COLUMNS {
            return Err(ConfigError::Validation(format!(
                "tiles.tile_size must be at most {}",
                MAX_CANVAS_EDGE / MAX_TILE_COLUMNS
            )));
        }
        if self.loading.max_concurrent == 0 {
            return Err(ConfigError::Validation(
                "loading.max_concurrent must be at least 1".into(),
            ));
        }
        if self.loading.memoize && self.loading.cache_capacity == 0 {
            return Err(ConfigError::Validation(
                "loading.cache_capacity must be at least 1 when memoize is on".into(),
            ));
        }
        if self.loading.max_source_megapixels == 0 {
            return Err(ConfigError::Validation(
                "loading.max_source_megapixels must be positive".into(),
            ));
        }
        if self.loading.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "loading.timeout_secs must be positive".into(),
            ));
        }
        if self.export.jpeg_quality == 0 || self.export.jpeg_quality > 100 {
            return Err(ConfigError::Validation(
                "export.jpeg_quality must be 1-100".into(),
            ));
        }
        if self.export.collage_basename.trim().is_empty() {
            return Err(ConfigError::Validation(
                "export.collage_basename must not be empty".into(),
            ));
        }
        if self.export.share_command.as_ref().is_some_and(|c| c.is_empty()) {
            return Err(ConfigError::Validation(
                "export.share_command must name a program".into(),
            ));
        }
        if self.gallery.page_size == 0 {
            return Err(ConfigError::Validation(
                "gallery.page_size must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Square-canvas collage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CanvasConfig {
    /// Edge length of the square canvas in pixels.
    pub size: u32,
    /// Gutter between cells and around the canvas edge.
    pub padding: u32,
    pub background: Color,
    /// Fill behind each cell, visible where contain-fit letterboxes.
    pub cell_background: Color,
    /// When false, images smaller than their cell keep their natural size.
    pub allow_upscale: bool,
    /// Template used when none is given on the command line.
    pub template: Template,
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            size: 1000,
            padding: 10,
            background: Color::WHITE,
            cell_background: Color::rgb(0xf0, 0xf0, 0xf0),
            allow_upscale: true,
            template: Template::Grid2x2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WatermarkConfig {
    pub enabled: bool,
    pub text: String,
    pub color: Color,
    /// Font size as a fraction of the canvas edge.
    pub scale: f64,
}

impl Default for WatermarkConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            text: "Sona One - Collage".to_string(),
            color: Color::rgb(0x22, 0x22, 0x22),
            scale: 0.035,
        }
    }
}

/// Tile-sheet (classic / polaroid) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TilesConfig {
    pub tile_size: u32,
}

impl Default for TilesConfig {
    fn default() -> Self {
        Self { tile_size: 300 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoadingConfig {
    /// Maximum image fetches in flight.
    pub max_concurrent: usize,
    /// Per-request timeout.
    pub timeout_secs: u64,
    pub policy: LoadPolicy,
    /// Keep decoded images between runs of one session.
    pub memoize: bool,
    /// Most decoded images kept; the least recently used go first.
    pub cache_capacity: usize,
    /// Larger sources are refused from their header, before decoding.
    pub max_source_megapixels: u32,
    /// Origin the collage is composed on behalf of. When set, cross-origin
    /// images must grant CORS or the canvas is not exportable.
    pub app_origin: Option<String>,
}

impl Default for LoadingConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 6,
            timeout_secs: 30,
            policy: LoadPolicy::FailFast,
            memoize: true,
            cache_capacity: 24,
            max_source_megapixels: 100,
            app_origin: None,
        }
    }
}

impl LoadingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn max_source_pixels(&self) -> u64 {
        self.max_source_megapixels as u64 * 1_000_000
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExportConfig {
    /// Directory downloads are written into.
    pub output_dir: String,
    /// File name of a collage, without extension.
    pub collage_basename: String,
    pub archive_filename: String,
    /// Quality for JPEG tile sheets.
    pub jpeg_quality: u32,
    pub share_title: String,
    pub share_text: String,
    /// Program (plus leading arguments) that receives the exported file path.
    pub share_command: Option<Vec<String>>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_dir: ".".to_string(),
            collage_basename: "Sona-One-Collage".to_string(),
            archive_filename: "images.zip".to_string(),
            jpeg_quality: 90,
            share_title: "Sona One Collage".to_string(),
            share_text: "Made with Sona One Gallery".to_string(),
            share_command: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GalleryConfig {
    /// Gallery API endpoint (list and detail).
    pub api_url: String,
    /// Prefix for the relative `image` paths the API returns.
    pub asset_base_url: String,
    pub page_size: u32,
}

impl Default for GalleryConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:4000/api/galleryupload".to_string(),
            asset_base_url: "http://localhost:4000".to_string(),
            page_size: 12,
        }
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the canonical representation of all default values, used as the
/// base layer for merging user overrides on top.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(CollageConfig::default())?)
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a `config.toml` from a directory as a raw TOML value.
///
/// Returns `Ok(None)` if no `config.toml` exists in the directory.
/// Returns `Err` if the file exists but contains invalid TOML.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    let config_path = path.join("config.toml");
    if !config_path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&config_path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<CollageConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: CollageConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from `config.toml` in the given directory.
///
/// Merges user values on top of stock defaults, rejects unknown keys,
/// and validates the result.
pub fn load_config(dir: &Path) -> Result<CollageConfig, ConfigError> {
    let base = stock_defaults_value()?;
    let overlay = load_raw_config(dir)?;
    resolve_config(base, overlay)
}

/// Returns a fully-commented stock `config.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# Collagist Configuration
# =======================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
#
# Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Square collages (grid2x2, grid3x3, stripH, stripV)
# ---------------------------------------------------------------------------
[canvas]
# Edge length of the square canvas in pixels.
size = 1000

# Gutter between cells and around the canvas edge, in pixels.
padding = 10

background = "#ffffff"

# Fill behind each image, visible where an image is letterboxed.
cell_background = "#f0f0f0"

# Enlarge images that are smaller than their cell.
# false keeps them at natural size, centered.
allow_upscale = true

# Template used when none is given on the command line.
# One of: grid2x2, grid3x3, stripH, stripV, classic, polaroid
template = "grid2x2"

# ---------------------------------------------------------------------------
# Watermark (square collages only)
# ---------------------------------------------------------------------------
[watermark]
enabled = true
text = "Sona One - Collage"
color = "#222222"

# Font size as a fraction of the canvas size (0.035 -> 35px on 1000px).
scale = 0.035

# ---------------------------------------------------------------------------
# Tile sheets (classic = 2 columns, polaroid = 3 columns)
# ---------------------------------------------------------------------------
[tiles]
# Edge length of one tile in pixels. Sheets grow downward with more images.
tile_size = 300

# ---------------------------------------------------------------------------
# Image loading
# ---------------------------------------------------------------------------
[loading]
# Maximum image fetches in flight at once.
max_concurrent = 6

# Per-request timeout in seconds.
timeout_secs = 30

# "fail-fast": any failed image aborts the collage.
# "tolerant":  failed images leave an empty cell and are reported.
policy = "fail-fast"

# Reuse decoded images when re-rendering with another template or size.
memoize = true

# Decoded images kept in memory while memoizing. The least recently used
# image is dropped first.
cache_capacity = 24

# Images over this many megapixels fail to load. Checked from the file
# header, before the image is decoded.
max_source_megapixels = 100

# Origin collages are composed for. When set, cross-origin images must be
# served with CORS headers granting this origin, or export is refused.
# app_origin = "https://gallery.example.com"

# ---------------------------------------------------------------------------
# Export
# ---------------------------------------------------------------------------
[export]
# Directory downloads are written into.
output_dir = "."

# Collage file name without extension (.png for square, .jpg for tile sheets).
collage_basename = "Sona-One-Collage"

archive_filename = "images.zip"

# JPEG quality for tile sheets (1-100).
jpeg_quality = 90

share_title = "Sona One Collage"
share_text = "Made with Sona One Gallery"

# Program that receives the exported file path when sharing.
# Without it, --share falls back to a plain download.
# share_command = ["xdg-open"]

# ---------------------------------------------------------------------------
# Gallery API
# ---------------------------------------------------------------------------
[gallery]
api_url = "http://localhost:4000/api/galleryupload"

# Prefix for the relative image paths returned by the API.
asset_base_url = "http://localhost:4000"

page_size = 12
"##
}
