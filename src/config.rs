//! Configuration and request types for a watermark run.
//!
//! Two kinds of input reach the pipeline:
//!
//! * [`WatermarkConfig`]: process-wide settings (where uploads live, which
//!   font to embed, preview cap, chunk size). Built once via
//!   [`WatermarkConfigBuilder`] and shared across runs.
//! * [`WatermarkSpec`]: what to stamp on one document: text, size, color,
//!   opacity and [`Layout`]. Usually produced from the loosely-typed
//!   [`WatermarkOptions`] a client sends.
//!
//! The library never reads environment variables itself; the CLI maps them
//! onto the builder.

use crate::error::WatermarkError;
use crate::pipeline::geometry::Layout;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default upload directory, relative to the working directory.
pub const DEFAULT_UPLOAD_DIR: &str = "public/uploads";

/// Default location of the bundled TrueType font.
pub const DEFAULT_FONT_PATH: &str = "fonts/watermark.ttf";

/// Pages processed by a preview run.
pub const DEFAULT_PREVIEW_PAGE_LIMIT: usize = 5;

/// Binary payloads are re-chunked into frames of at most this many bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Largest file accepted by [`crate::store::UploadStore::import`].
pub const DEFAULT_MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

/// Settings shared by every watermark run.
///
/// Built via [`WatermarkConfig::builder()`] or [`WatermarkConfig::default()`].
///
/// # Example
/// ```rust
/// use pdfstamp::WatermarkConfig;
///
/// let config = WatermarkConfig::builder()
///     .upload_dir("/srv/uploads")
///     .preview_page_limit(3)
///     .build()
///     .unwrap();
/// assert_eq!(config.preview_page_limit, 3);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatermarkConfig {
    /// Directory holding uploaded sources and watermarked outputs.
    pub upload_dir: PathBuf,

    /// TrueType/OpenType font to embed. `None` always uses Helvetica.
    ///
    /// A missing or unreadable file is not an error: the run falls back to
    /// Helvetica and logs a warning.
    pub font_path: Option<PathBuf>,

    /// How many leading pages a preview run stamps. Default: 5.
    pub preview_page_limit: usize,

    /// Maximum raw bytes per streamed `chunk` frame. Default: 1 MiB.
    pub chunk_size: usize,

    /// Largest upload accepted by the store, in bytes. Default: 50 MiB.
    pub max_file_size: u64,
}

impl Default for WatermarkConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from(DEFAULT_UPLOAD_DIR),
            font_path: Some(PathBuf::from(DEFAULT_FONT_PATH)),
            preview_page_limit: DEFAULT_PREVIEW_PAGE_LIMIT,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

impl WatermarkConfig {
    /// Create a new builder for `WatermarkConfig`.
    pub fn builder() -> WatermarkConfigBuilder {
        WatermarkConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`WatermarkConfig`].
#[derive(Debug)]
pub struct WatermarkConfigBuilder {
    config: WatermarkConfig,
}

impl WatermarkConfigBuilder {
    pub fn upload_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.upload_dir = dir.into();
        self
    }

    pub fn font_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.font_path = Some(path.into());
        self
    }

    /// Never embed a font; always draw with Helvetica.
    pub fn no_embedded_font(mut self) -> Self {
        self.config.font_path = None;
        self
    }

    pub fn preview_page_limit(mut self, pages: usize) -> Self {
        self.config.preview_page_limit = pages.max(1);
        self
    }

    pub fn chunk_size(mut self, bytes: usize) -> Self {
        self.config.chunk_size = bytes.max(1);
        self
    }

    pub fn max_file_size(mut self, bytes: u64) -> Self {
        self.config.max_file_size = bytes;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<WatermarkConfig, WatermarkError> {
        let c = &self.config;
        if c.upload_dir.as_os_str().is_empty() {
            return Err(WatermarkError::InvalidConfig(
                "upload directory must not be empty".into(),
            ));
        }
        if c.preview_page_limit == 0 {
            return Err(WatermarkError::InvalidConfig(
                "preview page limit must be ≥ 1".into(),
            ));
        }
        if c.chunk_size == 0 {
            return Err(WatermarkError::InvalidConfig(
                "chunk size must be ≥ 1".into(),
            ));
        }
        if c.max_file_size == 0 {
            return Err(WatermarkError::InvalidConfig(
                "max file size must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Watermark request ────────────────────────────────────────────────────

/// Whether a run stamps the whole document or only a short preview.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Every page; the output gets an identifier and is meant to be stored.
    #[default]
    Full,
    /// The first [`WatermarkConfig::preview_page_limit`] pages, bytes only.
    Preview,
}

/// An RGB color with each channel in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rgb {
    pub r: f64,
    pub g: f64,
    pub b: f64,
}

impl Rgb {
    pub const fn new(r: f64, g: f64, b: f64) -> Self {
        Self { r, g, b }
    }

    /// Parse a `#RRGGBB` hex string.
    pub fn from_hex(hex: &str) -> Result<Self, WatermarkError> {
        let digits = hex.strip_prefix('#').unwrap_or(hex);
        if digits.len() != 6 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(WatermarkError::InvalidOptions(format!(
                "color must be #RRGGBB, got '{hex}'"
            )));
        }
        let channel = |i: usize| -> Result<f64, WatermarkError> {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .map(|v| f64::from(v) / 255.0)
                .map_err(|e| WatermarkError::InvalidOptions(format!("color '{hex}': {e}")))
        };
        Ok(Self::new(channel(0)?, channel(2)?, channel(4)?))
    }
}

/// What to stamp on a document. Shared read-only by every page of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatermarkSpec {
    pub text: String,
    /// Font size in points, > 0.
    pub font_size: f64,
    /// Fill color. Assumed already normalized; not re-validated.
    pub color: Rgb,
    /// Fill/stroke alpha in `[0, 1]`.
    pub opacity: f64,
    pub layout: Layout,
}

impl WatermarkSpec {
    /// Construct a spec, checking the font size and opacity ranges.
    pub fn new(
        text: impl Into<String>,
        font_size: f64,
        color: Rgb,
        opacity: f64,
        layout: Layout,
    ) -> Result<Self, WatermarkError> {
        if !font_size.is_finite() || font_size <= 0.0 {
            return Err(WatermarkError::InvalidOptions(format!(
                "font size must be > 0, got {font_size}"
            )));
        }
        if !(0.0..=1.0).contains(&opacity) {
            return Err(WatermarkError::InvalidOptions(format!(
                "opacity must be within 0–1, got {opacity}"
            )));
        }
        Ok(Self {
            text: text.into(),
            font_size,
            color,
            opacity,
            layout,
        })
    }
}

const DEFAULT_TEXT: &str = "WATERMARK";
const DEFAULT_FONT_SIZE: f64 = 20.0;
const DEFAULT_FONT_COLOR: &str = "#8B4513";
const DEFAULT_OPACITY: u32 = 50;
const DEFAULT_POSITION: &str = "center";

/// Loosely-typed watermark options as a client submits them.
///
/// Every field has a default, so `{}` deserializes to the stock watermark:
/// "WATERMARK", 20 pt, `#8B4513`, 50 % opacity, centered. An empty or zero
/// field also means its default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WatermarkOptions {
    pub text: String,
    /// Truncated to whole points.
    pub font_size: f64,
    /// `#RRGGBB`.
    pub font_color: String,
    /// Percentage, 1–100. Values above 100 are clamped.
    pub opacity: u32,
    /// `center`, `diagonal` or `tile`, matched exactly. Anything else means
    /// `diagonal`.
    pub position: String,
}

impl Default for WatermarkOptions {
    fn default() -> Self {
        Self {
            text: DEFAULT_TEXT.to_string(),
            font_size: DEFAULT_FONT_SIZE,
            font_color: DEFAULT_FONT_COLOR.to_string(),
            opacity: DEFAULT_OPACITY,
            position: DEFAULT_POSITION.to_string(),
        }
    }
}

impl WatermarkOptions {
    /// Normalize into a [`WatermarkSpec`].
    ///
    /// A font size that truncates to 0 (or is not finite) and an opacity of 0
    /// fall back to the defaults. Negative sizes are rejected.
    pub fn into_spec(self) -> Result<WatermarkSpec, WatermarkError> {
        let or_default = |value: String, default: &str| {
            if value.is_empty() {
                default.to_string()
            } else {
                value
            }
        };
        let font_size = match self.font_size.trunc() {
            size if size.is_finite() && size != 0.0 => size,
            _ => DEFAULT_FONT_SIZE,
        };
        let opacity = match self.opacity {
            0 => DEFAULT_OPACITY,
            pct => pct.min(100),
        };
        let color = Rgb::from_hex(&or_default(self.font_color, DEFAULT_FONT_COLOR))?;
        let layout = Layout::from_position(&or_default(self.position, DEFAULT_POSITION));
        WatermarkSpec::new(
            or_default(self.text, DEFAULT_TEXT),
            font_size,
            color,
            f64::from(opacity) / 100.0,
            layout,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let c = WatermarkConfig::builder().build().unwrap();
        assert_eq!(c.preview_page_limit, 5);
        assert_eq!(c.chunk_size, 1024 * 1024);
        assert_eq!(c.upload_dir, PathBuf::from("public/uploads"));
        assert!(c.font_path.is_some());
    }

    #[test]
    fn builder_clamps_zero_limits() {
        let c = WatermarkConfig::builder()
            .preview_page_limit(0)
            .chunk_size(0)
            .no_embedded_font()
            .build()
            .unwrap();
        assert_eq!(c.preview_page_limit, 1);
        assert_eq!(c.chunk_size, 1);
        assert!(c.font_path.is_none());
    }

    #[test]
    fn builder_rejects_empty_upload_dir() {
        let err = WatermarkConfig::builder().upload_dir("").build().unwrap_err();
        assert!(matches!(err, WatermarkError::InvalidConfig(_)));
    }

    #[test]
    fn hex_color_parsing() {
        let c = Rgb::from_hex("#8B4513").unwrap();
        assert!((c.r - 139.0 / 255.0).abs() < 1e-12);
        assert!((c.g - 69.0 / 255.0).abs() < 1e-12);
        assert!((c.b - 19.0 / 255.0).abs() < 1e-12);

        assert_eq!(Rgb::from_hex("ffffff").unwrap(), Rgb::new(1.0, 1.0, 1.0));
        assert!(Rgb::from_hex("#fff").is_err());
        assert!(Rgb::from_hex("#gg0000").is_err());
    }

    #[test]
    fn options_defaults_from_empty_json() {
        let opts: WatermarkOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(opts, WatermarkOptions::default());

        let spec = opts.into_spec().unwrap();
        assert_eq!(spec.text, "WATERMARK");
        assert_eq!(spec.font_size, 20.0);
        assert_eq!(spec.opacity, 0.5);
        assert_eq!(spec.layout, Layout::Center);
    }

    #[test]
    fn options_camel_case_fields() {
        let opts: WatermarkOptions = serde_json::from_str(
            r##"{"text":"DRAFT","fontSize":36,"fontColor":"#000000","opacity":150,"position":"tile"}"##,
        )
        .unwrap();
        let spec = opts.into_spec().unwrap();
        assert_eq!(spec.font_size, 36.0);
        assert_eq!(spec.opacity, 1.0);
        assert_eq!(spec.layout, Layout::Tile);
        assert_eq!(spec.color, Rgb::new(0.0, 0.0, 0.0));
    }

    #[test]
    fn zero_and_empty_options_mean_defaults() {
        let opts: WatermarkOptions = serde_json::from_str(
            r#"{"text":"","fontSize":0,"fontColor":"","opacity":0,"position":""}"#,
        )
        .unwrap();
        let spec = opts.into_spec().unwrap();
        assert_eq!(spec.text, "WATERMARK");
        assert_eq!(spec.font_size, 20.0);
        assert_eq!(spec.opacity, 0.5);
        assert_eq!(spec.color, Rgb::from_hex("#8B4513").unwrap());
        assert_eq!(spec.layout, Layout::Center);
    }

    #[test]
    fn font_size_is_truncated_to_whole_points() {
        let size = |font_size: f64| {
            WatermarkOptions {
                font_size,
                ..Default::default()
            }
            .into_spec()
            .map(|s| s.font_size)
        };
        assert_eq!(size(36.9).unwrap(), 36.0);
        assert_eq!(size(0.0001).unwrap(), 20.0);
        assert_eq!(size(f64::INFINITY).unwrap(), 20.0);
        assert!(size(-4.0).is_err());
    }

    #[test]
    fn position_is_matched_exactly() {
        let layout = |position: &str| {
            WatermarkOptions {
                position: position.into(),
                ..Default::default()
            }
            .into_spec()
            .unwrap()
            .layout
        };
        assert_eq!(layout("tile"), Layout::Tile);
        assert_eq!(layout("CENTER"), Layout::Diagonal);
    }

    #[test]
    fn unknown_position_means_diagonal() {
        let opts = WatermarkOptions {
            position: "upside-down".into(),
            ..Default::default()
        };
        assert_eq!(opts.into_spec().unwrap().layout, Layout::Diagonal);
    }

    #[test]
    fn spec_rejects_bad_ranges() {
        let black = Rgb::new(0.0, 0.0, 0.0);
        assert!(WatermarkSpec::new("x", 0.0, black, 0.5, Layout::Center).is_err());
        assert!(WatermarkSpec::new("x", f64::NAN, black, 0.5, Layout::Center).is_err());
        assert!(WatermarkSpec::new("x", 12.0, black, 1.5, Layout::Center).is_err());
        assert!(WatermarkSpec::new("", 12.0, black, 0.0, Layout::Center).is_ok());
    }

    #[test]
    fn mode_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Mode::Preview).unwrap(), "\"preview\"");
    }
}
