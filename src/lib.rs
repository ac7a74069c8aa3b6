//! # pdfstamp
//!
//! Stamp a text watermark onto every page of a PDF, with live page-by-page
//! progress.
//!
//! ## Why this crate?
//!
//! Watermarking a long document is slow enough that a client wants to see it
//! happen. This crate pairs a small placement engine (centered, diagonal or
//! tiled text) with a progress protocol: every run reports `start`, one
//! `progress` per page, `saving` and a single terminal `complete` or `error`,
//! either to an in-process [`ProgressSink`] or as a framed stream ready to be
//! pushed to a browser.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF bytes
//!  │
//!  ├─ 1. Font      bundled TrueType face, or Helvetica if it can't be used
//!  ├─ 2. Load      parse with lopdf (spawn_blocking from here on)
//!  ├─ 3. Pages     for each page: place text (geometry) ─▶ draw (compose)
//!  │               ─▶ progress event
//!  ├─ 4. Save      serialize the modified document
//!  └─ 5. Output    bytes + output id; stored by `apply_watermark`
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdfstamp::{apply_watermark, UploadStore, WatermarkConfig, WatermarkOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = WatermarkConfig::default();
//!     let store = UploadStore::from_config(&config);
//!     let spec = WatermarkOptions {
//!         text: "CONFIDENTIAL".into(),
//!         position: "diagonal".into(),
//!         ..Default::default()
//!     }
//!     .into_spec()?;
//!
//!     let out = apply_watermark(&store, "report.pdf", &spec, &config, pdfstamp::progress::discard()).await?;
//!     println!("stored as {}", out.output_id.unwrap_or_default());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdfstamp` binary (clap + indicatif + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! pdfstamp = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod apply;
pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod store;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use apply::{
    apply_watermark, apply_watermark_sync, inspect, preview_watermark, summarize, watermark_bytes,
};
pub use config::{Mode, Rgb, WatermarkConfig, WatermarkConfigBuilder, WatermarkOptions, WatermarkSpec};
pub use error::{FontError, WatermarkError};
pub use output::{DocumentInfo, PageSize, RunSummary, WatermarkOutput};
pub use pipeline::font::FontChoice;
pub use pipeline::geometry::{GlyphPlacement, Layout, PageGeometry, TextMetrics};
pub use progress::{BufferedProgress, CompletionGate, ProgressEvent, ProgressHandle, ProgressSink};
pub use store::{display_name, StoredFile, UploadStore};
pub use stream::{apply_stream, preview_stream, reassemble_chunks, Frame, FrameStream, StreamingProgress};
