//! Progress events for a watermark run, and the sink trait that receives them.
//!
//! Pass an [`Arc<dyn ProgressSink>`] to any entry point to observe a run as
//! it moves through its pages.
//!
//! # Why one `emit` method?
//!
//! A run has a fixed lifecycle (`start`, `progress`…, `saving`, then one
//! terminal `complete` or `error`) and every consumer so far either throws the
//! events away, forwards them verbatim as JSON, or drives a progress bar. A
//! single method taking a serializable [`ProgressEvent`] serves all three
//! without the library knowing how the host talks to its client. The trait is
//! `Send + Sync` because events are emitted from the blocking worker thread.
//!
//! # Example
//!
//! ```rust
//! use pdfstamp::{ProgressEvent, ProgressSink};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct PageCounter(AtomicUsize);
//!
//! impl ProgressSink for PageCounter {
//!     fn emit(&self, event: ProgressEvent) {
//!         if let ProgressEvent::Progress { .. } = event {
//!             self.0.fetch_add(1, Ordering::SeqCst);
//!         }
//!     }
//! }
//!
//! let counter = Arc::new(PageCounter(AtomicUsize::new(0)));
//! let handle: pdfstamp::ProgressHandle = counter.clone();
//! handle.emit(ProgressEvent::progress(1, 4));
//! assert_eq!(counter.0.load(Ordering::SeqCst), 1);
//! ```

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// One lifecycle notification of a run.
///
/// Serializes with a `type` discriminator and camelCase fields, e.g.
/// `{"type":"progress","currentPage":2,"totalPages":4,"percent":50}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ProgressEvent {
    /// The document is loaded; `total_pages` pages will be processed.
    Start { total_pages: usize },
    /// Page `current_page` (1-indexed) is done.
    Progress {
        current_page: usize,
        total_pages: usize,
        percent: u32,
    },
    /// All pages are done; the document is being serialized.
    Saving,
    /// Terminal success. Carries the output identifier in full mode.
    Complete {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output_id: Option<String>,
    },
    /// Terminal failure.
    Error { message: String },
}

impl ProgressEvent {
    /// A `progress` event with `percent = round(100 · current / total)`.
    pub fn progress(current_page: usize, total_pages: usize) -> Self {
        ProgressEvent::Progress {
            current_page,
            total_pages,
            percent: percent(current_page, total_pages),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressEvent::Complete { .. } | ProgressEvent::Error { .. })
    }
}

fn percent(current: usize, total: usize) -> u32 {
    if total == 0 {
        return 100;
    }
    (100.0 * current as f64 / total as f64).round() as u32
}

/// Receives the events of a run.
///
/// Implementations must be `Send + Sync`; `emit` is called from a blocking
/// worker thread, always sequentially and in lifecycle order.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Discards every event. Used by buffered callers that only want the result.
#[derive(Debug, Default, Clone, Copy)]
pub struct BufferedProgress;

impl ProgressSink for BufferedProgress {
    fn emit(&self, event: ProgressEvent) {
        let _ = event;
    }
}

/// Shared handle to a sink, as stored by the pipeline.
pub type ProgressHandle = Arc<dyn ProgressSink>;

/// A [`ProgressHandle`] that discards everything.
pub fn discard() -> ProgressHandle {
    Arc::new(BufferedProgress)
}

/// Holds back `complete` until the caller has persisted the output.
///
/// The pipeline finishes with `complete` as soon as the bytes are serialized,
/// but a full run is only complete once the output is written. Wrap the
/// caller's sink in a gate, run the pipeline against the gate, then call
/// [`CompletionGate::release`] after a successful write or
/// [`CompletionGate::fail`] if the write failed. Either way the inner sink
/// sees exactly one terminal event.
pub struct CompletionGate {
    inner: ProgressHandle,
    held: Mutex<Option<ProgressEvent>>,
}

impl CompletionGate {
    pub fn new(inner: ProgressHandle) -> Arc<Self> {
        Arc::new(Self {
            inner,
            held: Mutex::new(None),
        })
    }

    fn held(&self) -> MutexGuard<'_, Option<ProgressEvent>> {
        match self.held.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Forward the held `complete`, if any.
    pub fn release(&self) {
        let held = self.held().take();
        if let Some(event) = held {
            self.inner.emit(event);
        }
    }

    /// Drop the held `complete` and report `message` as the terminal error.
    ///
    /// Does nothing if no `complete` was held; the run already failed and
    /// its `error` went through.
    pub fn fail(&self, message: impl Into<String>) {
        let held = self.held().take();
        if held.is_some() {
            self.inner.emit(ProgressEvent::Error {
                message: message.into(),
            });
        }
    }
}

impl ProgressSink for CompletionGate {
    fn emit(&self, event: ProgressEvent) {
        if let ProgressEvent::Complete { .. } = event {
            debug!("Holding completion until output is persisted");
            *self.held() = Some(event);
        } else {
            self.inner.emit(event);
        }
    }
}
