//! Document pipeline: bytes in, watermarked bytes out, events along the way.
//!
//! ```text
//! resolve font (tokio::fs) ──▶ spawn_blocking {
//!     load ─▶ start ─▶ install font/gs ─▶ page 1..N: composite ─▶ progress
//!          ─▶ saving ─▶ serialize
//! } ──▶ complete | error
//! ```
//!
//! lopdf is synchronous and compositing is CPU-bound, so everything after the
//! font read runs on the blocking pool. The `Document` is owned by that task
//! and dropped when it ends, whether the run succeeded or not.
//!
//! Events are emitted in lifecycle order. Any failure produces exactly one
//! `error` event and no partial output.

use crate::config::{Mode, WatermarkConfig, WatermarkSpec};
use crate::error::WatermarkError;
use crate::output::{DocumentInfo, PageSize, WatermarkOutput};
use crate::pipeline::compose::{self, PageCompositor};
use crate::pipeline::font::{resolve_font, WatermarkFont};
use crate::progress::{ProgressEvent, ProgressHandle};
use lopdf::{Document, ObjectId};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Output identifier prefix for full runs.
pub const OUTPUT_PREFIX: &str = "watermarked-";

/// What the blocking half of a run hands back.
struct Rendered {
    bytes: Vec<u8>,
    pages_processed: usize,
    total_pages: usize,
}

/// Watermark `bytes` and report progress to `progress`.
///
/// In [`Mode::Full`] every page is stamped and the output carries an
/// identifier derived from `source_id`. In [`Mode::Preview`] only the first
/// [`WatermarkConfig::preview_page_limit`] pages are stamped; the remaining
/// pages are kept unchanged and no identifier is assigned.
pub async fn watermark_document(
    bytes: Vec<u8>,
    source_id: &str,
    spec: &WatermarkSpec,
    mode: Mode,
    config: &WatermarkConfig,
    progress: ProgressHandle,
) -> Result<WatermarkOutput, WatermarkError> {
    info!(
        "Watermarking '{}' ({} mode, {} layout, {} bytes)",
        source_id,
        match mode {
            Mode::Full => "full",
            Mode::Preview => "preview",
        },
        spec.layout,
        bytes.len()
    );

    let font = resolve_font(config.font_path.as_deref()).await;
    let choice = font.choice();

    let page_limit = match mode {
        Mode::Full => usize::MAX,
        Mode::Preview => config.preview_page_limit,
    };
    let task_spec = spec.clone();
    let task_progress = progress.clone();
    let joined = tokio::task::spawn_blocking(move || {
        render_blocking(&bytes, &font, &task_spec, page_limit, &task_progress)
    })
    .await
    .map_err(|e| WatermarkError::Internal(format!("Watermark task panicked: {e}")));

    let rendered = match joined.and_then(|r| r) {
        Ok(r) => r,
        Err(e) => {
            warn!("Watermarking '{}' failed: {}", source_id, e);
            progress.emit(ProgressEvent::Error {
                message: e.to_string(),
            });
            return Err(e);
        }
    };

    let output_id = match mode {
        Mode::Full => Some(output_id(source_id)),
        Mode::Preview => None,
    };
    info!(
        "Watermarked {}/{} pages of '{}' ({} bytes)",
        rendered.pages_processed,
        rendered.total_pages,
        source_id,
        rendered.bytes.len()
    );
    progress.emit(ProgressEvent::Complete {
        output_id: output_id.clone(),
    });

    Ok(WatermarkOutput {
        bytes: rendered.bytes,
        output_id,
        pages_processed: rendered.pages_processed,
        total_pages: rendered.total_pages,
        font: choice,
    })
}

fn render_blocking(
    bytes: &[u8],
    font: &WatermarkFont,
    spec: &WatermarkSpec,
    page_limit: usize,
    progress: &ProgressHandle,
) -> Result<Rendered, WatermarkError> {
    let mut doc = load(bytes)?;
    let pages = page_ids(&doc)?;
    let total_pages = pages.len();
    let to_process = total_pages.min(page_limit);

    progress.emit(ProgressEvent::Start {
        total_pages: to_process,
    });

    let compositor = PageCompositor::install(&mut doc, font, spec)
        .map_err(|detail| WatermarkError::Compositing { page: 1, detail })?;

    for (index, page_id) in pages.into_iter().take(to_process).enumerate() {
        let page = index + 1;
        let copies = compositor
            .composite(&mut doc, page_id)
            .map_err(|detail| WatermarkError::Compositing { page, detail })?;
        debug!("Page {}/{}: {} placement(s) drawn", page, to_process, copies);
        progress.emit(ProgressEvent::progress(page, to_process));
    }

    progress.emit(ProgressEvent::Saving);
    let mut out = Vec::with_capacity(bytes.len());
    doc.save_to(&mut out)
        .map_err(|e| WatermarkError::Serialization {
            detail: e.to_string(),
        })?;

    Ok(Rendered {
        bytes: out,
        pages_processed: to_process,
        total_pages,
    })
}

fn load(bytes: &[u8]) -> Result<Document, WatermarkError> {
    Document::load_mem(bytes).map_err(|e| WatermarkError::InvalidDocument {
        detail: e.to_string(),
    })
}

/// Page object ids in page order. Zero pages is an invalid document.
fn page_ids(doc: &Document) -> Result<Vec<ObjectId>, WatermarkError> {
    let pages: Vec<ObjectId> = doc.get_pages().into_values().collect();
    if pages.is_empty() {
        return Err(WatermarkError::InvalidDocument {
            detail: "document has no pages".into(),
        });
    }
    Ok(pages)
}

/// `watermarked-<unix-millis>-<source id>`.
pub fn output_id(source_id: &str) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    format!("{OUTPUT_PREFIX}{millis}-{source_id}")
}

/// Read page count, sizes and version without touching the document.
pub async fn inspect_bytes(bytes: Vec<u8>) -> Result<DocumentInfo, WatermarkError> {
    tokio::task::spawn_blocking(move || -> Result<DocumentInfo, WatermarkError> {
        let doc = load(&bytes)?;
        let pages = page_ids(&doc)?
            .into_iter()
            .enumerate()
            .map(|(index, id)| {
                compose::media_box(&doc, id)
                    .map(|[x1, y1, x2, y2]| PageSize {
                        width: (x2 - x1).abs(),
                        height: (y2 - y1).abs(),
                    })
                    .map_err(|detail| WatermarkError::InvalidDocument {
                        detail: format!("page {}: {detail}", index + 1),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(DocumentInfo {
            page_count: pages.len(),
            pages,
            pdf_version: doc.version.clone(),
        })
    })
    .await
    .map_err(|e| WatermarkError::Internal(format!("Inspect task panicked: {e}")))?
}
