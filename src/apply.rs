//! Eager entry points: wait for the whole run, then return.
//!
//! ## Why eager vs. streaming?
//!
//! These are the simpler API. Progress still flows to the supplied
//! [`ProgressHandle`], but the caller gets the finished [`WatermarkOutput`]
//! (or the error) as a plain `Result`. Use [`crate::stream`] when the events
//! have to reach a remote client as they happen.
//!
//! Every function here reports a failure to `progress` exactly once, including
//! failures that happen before the pipeline starts (an unknown source) or
//! after it ends (the output could not be stored).

use crate::config::{Mode, WatermarkConfig, WatermarkSpec};
use crate::error::WatermarkError;
use crate::output::{DocumentInfo, RunSummary, WatermarkOutput};
use crate::pipeline::document;
use crate::progress::{CompletionGate, ProgressEvent, ProgressHandle};
use crate::store::UploadStore;
use tracing::{info, warn};

/// Watermark PDF bytes already in memory. Nothing is read or stored.
///
/// # Example
/// ```rust,no_run
/// use pdfstamp::{watermark_bytes, Mode, WatermarkConfig, WatermarkOptions};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let bytes = std::fs::read("report.pdf")?;
/// let spec = WatermarkOptions::default().into_spec()?;
/// let out = watermark_bytes(
///     bytes,
///     "report.pdf",
///     &spec,
///     Mode::Full,
///     &WatermarkConfig::default(),
///     pdfstamp::progress::discard(),
/// )
/// .await?;
/// std::fs::write("report-stamped.pdf", &out.bytes)?;
/// # Ok(())
/// # }
/// ```
pub async fn watermark_bytes(
    bytes: Vec<u8>,
    source_id: &str,
    spec: &WatermarkSpec,
    mode: Mode,
    config: &WatermarkConfig,
    progress: ProgressHandle,
) -> Result<WatermarkOutput, WatermarkError> {
    document::watermark_document(bytes, source_id, spec, mode, config, progress).await
}

/// Watermark every page of a stored file and store the result under its
/// output identifier.
///
/// `complete` is only reported once the output has been written; if the
/// write fails the run ends with `error` instead.
pub async fn apply_watermark(
    store: &UploadStore,
    source_id: &str,
    spec: &WatermarkSpec,
    config: &WatermarkConfig,
    progress: ProgressHandle,
) -> Result<WatermarkOutput, WatermarkError> {
    let bytes = read_source(store, source_id, &progress).await?;

    let gate = CompletionGate::new(progress);
    let output =
        document::watermark_document(bytes, source_id, spec, Mode::Full, config, gate.clone())
            .await?;

    let Some(output_id) = output.output_id.as_deref() else {
        let err = WatermarkError::Internal("full run produced no output identifier".into());
        gate.fail(err.to_string());
        return Err(err);
    };
    if let Err(e) = store.write(output_id, &output.bytes).await {
        warn!("Failed to store '{}': {}", output_id, e);
        gate.fail(e.to_string());
        return Err(e);
    }

    info!("Stored '{}'", output_id);
    gate.release();
    Ok(output)
}

/// Watermark the first pages of a stored file. The result is returned, never
/// stored.
pub async fn preview_watermark(
    store: &UploadStore,
    source_id: &str,
    spec: &WatermarkSpec,
    config: &WatermarkConfig,
    progress: ProgressHandle,
) -> Result<WatermarkOutput, WatermarkError> {
    let bytes = read_source(store, source_id, &progress).await?;
    document::watermark_document(bytes, source_id, spec, Mode::Preview, config, progress).await
}

/// Synchronous wrapper around [`apply_watermark`].
///
/// Creates a new Tokio runtime internally. Do not call from within an
/// existing async context; use [`apply_watermark`] there.
pub fn apply_watermark_sync(
    store: &UploadStore,
    source_id: &str,
    spec: &WatermarkSpec,
    config: &WatermarkConfig,
    progress: ProgressHandle,
) -> Result<WatermarkOutput, WatermarkError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| WatermarkError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(apply_watermark(store, source_id, spec, config, progress))
}

/// Page count, page sizes and PDF version, without watermarking anything.
pub async fn inspect(bytes: Vec<u8>) -> Result<DocumentInfo, WatermarkError> {
    document::inspect_bytes(bytes).await
}

/// Collapse a run's outcome into the summary a buffered client receives.
pub fn summarize(result: &Result<WatermarkOutput, WatermarkError>) -> RunSummary {
    match result {
        Ok(output) => RunSummary::succeeded(output.output_id.clone()),
        Err(e) => RunSummary::failed(e.to_string()),
    }
}

async fn read_source(
    store: &UploadStore,
    source_id: &str,
    progress: &ProgressHandle,
) -> Result<Vec<u8>, WatermarkError> {
    store.read(source_id).await.map_err(|e| {
        warn!("Cannot read source '{}': {}", source_id, e);
        progress.emit(ProgressEvent::Error {
            message: e.to_string(),
        });
        e
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Rgb;
    use crate::pipeline::geometry::Layout;
    use crate::progress::ProgressSink;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Recorder(Mutex<Vec<ProgressEvent>>);

    impl ProgressSink for Recorder {
        fn emit(&self, event: ProgressEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    fn spec() -> WatermarkSpec {
        WatermarkSpec::new("DRAFT", 20.0, Rgb::new(0.0, 0.0, 0.0), 0.5, Layout::Center).unwrap()
    }

    #[tokio::test]
    async fn missing_source_reports_not_found_without_start() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::new(dir.path(), 1024);
        let config = WatermarkConfig::builder()
            .upload_dir(dir.path())
            .no_embedded_font()
            .build()
            .unwrap();
        let recorder = Arc::new(Recorder::default());

        let result = apply_watermark(&store, "ghost.pdf", &spec(), &config, recorder.clone()).await;
        assert!(result.as_ref().unwrap_err().is_not_found());

        let events = recorder.0.lock().unwrap().clone();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], ProgressEvent::Error { .. }));

        let summary = summarize(&result);
        assert!(!summary.success);
        assert!(summary.message.contains("ghost.pdf"));
    }

    #[test]
    fn sync_wrapper_reports_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::new(dir.path(), 1024);
        let config = WatermarkConfig::builder().no_embedded_font().build().unwrap();
        let err = apply_watermark_sync(
            &store,
            "ghost.pdf",
            &spec(),
            &config,
            crate::progress::discard(),
        )
        .unwrap_err();
        assert!(err.is_not_found());
    }
}
