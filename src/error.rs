//! Error types for the pdfstamp library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`WatermarkError`]: **Fatal**: the run cannot produce an output
//!   (missing source, unparsable PDF, a page that could not be drawn on,
//!   a failed save). Returned as `Err(WatermarkError)` from every entry point
//!   and reported to streaming callers as a terminal `error` event.
//!
//! * [`FontError`]: **Recovered**: the bundled TrueType face could not be
//!   read or parsed. The pipeline logs it and falls back to Helvetica; it
//!   never reaches the caller.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the pdfstamp library.
#[derive(Debug, Error)]
pub enum WatermarkError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The source identifier has no backing bytes in the upload store.
    #[error("File not found: '{id}'")]
    NotFound { id: String },

    /// The bytes do not parse as a PDF, or the PDF has no pages.
    #[error("Invalid PDF document: {detail}")]
    InvalidDocument { detail: String },

    /// The upload store refused a file (wrong extension, too large).
    #[error("Upload rejected: {reason}")]
    Rejected { reason: String },

    // ── Processing errors ─────────────────────────────────────────────────
    /// Drawing the watermark onto a page failed.
    #[error("Failed to watermark page {page}: {detail}")]
    Compositing { page: usize, detail: String },

    /// Writing the modified document back to bytes failed.
    #[error("Failed to save watermarked PDF: {detail}")]
    Serialization { detail: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Reading, writing or deleting a file in the upload directory failed.
    #[error("Storage error at '{path}': {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Caller-supplied watermark options could not be normalized.
    #[error("Invalid watermark options: {0}")]
    InvalidOptions(String),

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl WatermarkError {
    /// `true` for errors that happen before any page is touched because the
    /// source could not be obtained.
    pub fn is_not_found(&self) -> bool {
        matches!(self, WatermarkError::NotFound { .. })
    }
}

/// Why the bundled font could not be used.
///
/// Only ever logged; the pipeline substitutes Helvetica.
#[derive(Debug, Error)]
pub enum FontError {
    /// No font path is configured.
    #[error("no embedded font configured")]
    NotConfigured,

    /// The font file could not be read.
    #[error("failed to read font '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The bytes are not a usable TrueType/OpenType face.
    #[error("failed to parse font '{path}': {detail}")]
    Parse { path: PathBuf, detail: String },
}
