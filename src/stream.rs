//! Streaming API: frame every event of a run for a push transport.
//!
//! ## Why stream?
//!
//! A large document takes a while to stamp. The eager entry points in
//! [`crate::apply`] return only once the output is ready; the functions here
//! return a [`FrameStream`] immediately and push one frame per lifecycle
//! event as the pages go by, so a client can draw a live progress bar.
//!
//! Each frame is one JSON object with a `type` discriminator, written as
//! `data: <json>\n\n` (the Server-Sent Events wire format). Besides the
//! [`ProgressEvent`]s, the transport adds its own [`Frame`]s:
//!
//! ```text
//! full:    init, start, progress…, saving, complete, result
//! preview: init, start, progress…, saving, complete,
//!          preview_complete, chunk…, end
//! failure: init, [start, progress…,] error
//! ```
//!
//! Preview bytes travel base64-encoded in `chunk` frames of at most
//! [`WatermarkConfig::chunk_size`] raw bytes; [`reassemble_chunks`] puts them
//! back together on the receiving side.
//!
//! A dropped receiver does not cancel the run. Further sends become no-ops
//! and the run finishes (and, in full mode, persists) as usual.

use crate::apply::{apply_watermark, preview_watermark};
use crate::config::{WatermarkConfig, WatermarkSpec};
use crate::error::WatermarkError;
use crate::output::RunSummary;
use crate::progress::{ProgressEvent, ProgressSink};
use crate::store::UploadStore;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::Stream;
use tracing::{debug, warn};

/// A boxed stream of `data: <json>\n\n` frames.
pub type FrameStream = Pin<Box<dyn Stream<Item = String> + Send>>;

/// Transport frames that are not lifecycle events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Frame {
    /// First frame on every stream.
    Init { message: String },
    /// The preview is ready; `buffer_length` bytes follow in `chunk` frames.
    PreviewComplete { buffer_length: usize },
    /// Base64 of the bytes starting at offset `index`.
    Chunk { data: String, index: usize },
    /// Last frame of a preview stream.
    End,
    /// Last frame of a successful full run.
    Result { data: RunSummary },
}

/// Wrap a serializable value as one `data: <json>\n\n` frame.
pub fn frame<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    Ok(format!("data: {}\n\n", serde_json::to_string(value)?))
}

/// A [`ProgressSink`] that forwards every event as a frame over a channel.
#[derive(Debug, Clone)]
pub struct StreamingProgress {
    tx: UnboundedSender<String>,
    chunk_size: usize,
}

impl StreamingProgress {
    /// A connected sink/stream pair.
    pub fn channel(chunk_size: usize) -> (Self, FrameStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = Self {
            tx,
            chunk_size: chunk_size.max(1),
        };
        (sink, Box::pin(UnboundedReceiverStream::new(rx)))
    }

    /// `true` once the receiving side is gone.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn send<T: Serialize>(&self, value: &T) {
        match frame(value) {
            Ok(text) => {
                // Receiver gone: the client disconnected, nothing to do.
                if self.tx.send(text).is_err() {
                    debug!("Frame dropped: stream receiver closed");
                }
            }
            Err(e) => warn!("Failed to serialize frame: {}", e),
        }
    }

    pub fn send_frame(&self, frame: &Frame) {
        self.send(frame);
    }

    /// Send `bytes` as `preview_complete`, then `chunk`s, then `end`.
    pub fn send_buffer(&self, bytes: &[u8]) {
        self.send_frame(&Frame::PreviewComplete {
            buffer_length: bytes.len(),
        });
        for (n, chunk) in bytes.chunks(self.chunk_size).enumerate() {
            if self.is_closed() {
                debug!("Receiver closed; stopping chunk transfer");
                return;
            }
            self.send_frame(&Frame::Chunk {
                data: STANDARD.encode(chunk),
                index: n * self.chunk_size,
            });
        }
        self.send_frame(&Frame::End);
    }
}

impl ProgressSink for StreamingProgress {
    fn emit(&self, event: ProgressEvent) {
        self.send(&event);
    }
}

const INIT_MESSAGE: &str = "Processing started";

/// Watermark every page of `source_id` and persist the result, streaming
/// frames as the run progresses.
///
/// Must be called within a Tokio runtime; the run is spawned onto it.
pub fn apply_stream(
    store: UploadStore,
    source_id: impl Into<String>,
    spec: WatermarkSpec,
    config: WatermarkConfig,
) -> FrameStream {
    let source_id = source_id.into();
    let (sink, frames) = StreamingProgress::channel(config.chunk_size);
    sink.send_frame(&Frame::Init {
        message: INIT_MESSAGE.to_string(),
    });

    tokio::spawn(async move {
        let handle = Arc::new(sink.clone());
        // Failures were already reported as an `error` event.
        if let Ok(output) = apply_watermark(&store, &source_id, &spec, &config, handle).await {
            sink.send_frame(&Frame::Result {
                data: RunSummary::succeeded(output.output_id),
            });
        }
    });

    frames
}

/// Watermark the first pages of `source_id` and stream the resulting bytes
/// back in chunks. Nothing is stored.
///
/// Must be called within a Tokio runtime; the run is spawned onto it.
pub fn preview_stream(
    store: UploadStore,
    source_id: impl Into<String>,
    spec: WatermarkSpec,
    config: WatermarkConfig,
) -> FrameStream {
    let source_id = source_id.into();
    let (sink, frames) = StreamingProgress::channel(config.chunk_size);
    sink.send_frame(&Frame::Init {
        message: INIT_MESSAGE.to_string(),
    });

    tokio::spawn(async move {
        let handle = Arc::new(sink.clone());
        if let Ok(output) = preview_watermark(&store, &source_id, &spec, &config, handle).await {
            sink.send_buffer(&output.bytes);
        }
    });

    frames
}

/// Strip the `data: ` prefix and trailing blank line from a frame.
pub fn frame_payload(frame: &str) -> &str {
    let body = frame.strip_prefix("data:").unwrap_or(frame);
    body.trim()
}

/// Decode the `chunk` frames of a preview stream back into bytes.
///
/// Frames of other types are skipped. Chunks are ordered by their byte
/// offset, must be contiguous, and must add up to the announced
/// `bufferLength` when a `preview_complete` frame is present.
pub fn reassemble_chunks<'a, I>(frames: I) -> Result<Vec<u8>, WatermarkError>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut expected = None;
    let mut chunks = Vec::new();

    for raw in frames {
        match serde_json::from_str::<Frame>(frame_payload(raw)) {
            Ok(Frame::PreviewComplete { buffer_length }) => expected = Some(buffer_length),
            Ok(Frame::Chunk { data, index }) => {
                let bytes = STANDARD.decode(data.as_bytes()).map_err(|e| {
                    WatermarkError::Serialization {
                        detail: format!("chunk at offset {index}: {e}"),
                    }
                })?;
                chunks.push((index, bytes));
            }
            // Lifecycle events and anything unrecognised.
            _ => {}
        }
    }

    chunks.sort_by_key(|(index, _)| *index);
    let mut out = Vec::with_capacity(expected.unwrap_or_default());
    for (index, bytes) in chunks {
        if index != out.len() {
            return Err(WatermarkError::Serialization {
                detail: format!("chunk at offset {index} does not follow byte {}", out.len()),
            });
        }
        out.extend_from_slice(&bytes);
    }

    if let Some(expected) = expected {
        if expected != out.len() {
            return Err(WatermarkError::Serialization {
                detail: format!("expected {expected} bytes, reassembled {}", out.len()),
            });
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn drain(sink: StreamingProgress, frames: FrameStream) -> Vec<String> {
        drop(sink);
        tokio_test::block_on(frames.collect::<Vec<_>>())
    }

    #[test]
    fn events_are_framed_as_sse_data() {
        let (sink, frames) = StreamingProgress::channel(16);
        sink.emit(ProgressEvent::Start { total_pages: 2 });
        sink.emit(ProgressEvent::Saving);

        let frames = drain(sink, frames);
        assert_eq!(
            frames,
            vec![
                "data: {\"type\":\"start\",\"totalPages\":2}\n\n".to_string(),
                "data: {\"type\":\"saving\"}\n\n".to_string(),
            ]
        );
    }

    #[test]
    fn buffer_is_chunked_by_offset() {
        let (sink, frames) = StreamingProgress::channel(4);
        sink.send_buffer(b"0123456789");

        let frames = drain(sink, frames);
        let parsed: Vec<Frame> = frames
            .iter()
            .map(|f| serde_json::from_str(frame_payload(f)).unwrap())
            .collect();
        assert_eq!(parsed[0], Frame::PreviewComplete { buffer_length: 10 });
        let offsets: Vec<usize> = parsed
            .iter()
            .filter_map(|f| match f {
                Frame::Chunk { index, .. } => Some(*index),
                _ => None,
            })
            .collect();
        assert_eq!(offsets, vec![0, 4, 8]);
        assert_eq!(parsed.last(), Some(&Frame::End));

        let refs: Vec<&str> = frames.iter().map(String::as_str).collect();
        assert_eq!(reassemble_chunks(refs).unwrap(), b"0123456789");
    }

    #[test]
    fn empty_buffer_sends_no_chunks() {
        let (sink, frames) = StreamingProgress::channel(4);
        sink.send_buffer(&[]);
        let frames = drain(sink, frames);
        assert_eq!(frames.len(), 2);
        assert!(frames[1].contains("\"end\""));
    }

    #[test]
    fn send_after_close_is_noop() {
        let (sink, frames) = StreamingProgress::channel(4);
        drop(frames);
        assert!(sink.is_closed());
        sink.emit(ProgressEvent::Saving);
        sink.send_buffer(b"abcdef");
    }

    #[test]
    fn reassembly_accepts_out_of_order_chunks() {
        let frames = [
            frame(&Frame::Chunk {
                data: STANDARD.encode(b"world"),
                index: 6,
            })
            .unwrap(),
            frame(&ProgressEvent::Saving).unwrap(),
            frame(&Frame::Chunk {
                data: STANDARD.encode(b"hello "),
                index: 0,
            })
            .unwrap(),
        ];
        let out = reassemble_chunks(frames.iter().map(String::as_str)).unwrap();
        assert_eq!(out, b"hello world");
    }

    #[test]
    fn reassembly_detects_gaps_and_short_buffers() {
        let gap = [frame(&Frame::Chunk {
            data: STANDARD.encode(b"late"),
            index: 3,
        })
        .unwrap()];
        assert!(reassemble_chunks(gap.iter().map(String::as_str)).is_err());

        let short = [
            frame(&Frame::PreviewComplete { buffer_length: 9 }).unwrap(),
            frame(&Frame::Chunk {
                data: STANDARD.encode(b"abc"),
                index: 0,
            })
            .unwrap(),
        ];
        assert!(reassemble_chunks(short.iter().map(String::as_str)).is_err());
    }

    #[test]
    fn result_frame_wraps_summary() {
        let text = frame(&Frame::Result {
            data: RunSummary::succeeded(Some("watermarked-1-x.pdf".into())),
        })
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(frame_payload(&text)).unwrap();
        assert_eq!(value["type"], "result");
        assert_eq!(value["data"]["outputId"], "watermarked-1-x.pdf");
    }
}
