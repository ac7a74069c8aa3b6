//! Result types returned by the watermark entry points.

use crate::pipeline::font::FontChoice;
use serde::{Deserialize, Serialize};

/// The product of one successful run.
#[derive(Debug, Clone)]
pub struct WatermarkOutput {
    /// The serialized, watermarked PDF.
    pub bytes: Vec<u8>,
    /// `watermarked-<unix-millis>-<source id>` for full runs; `None` for
    /// previews, which are never stored.
    pub output_id: Option<String>,
    /// Pages that received a watermark.
    pub pages_processed: usize,
    /// Pages in the source document.
    pub total_pages: usize,
    /// The font the text was drawn with.
    pub font: FontChoice,
}

/// Structured success/failure result, as reported to buffered clients and
/// sent as the closing `result` frame of a streamed full run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_id: Option<String>,
}

impl RunSummary {
    pub fn succeeded(output_id: Option<String>) -> Self {
        Self {
            success: true,
            message: "Watermark applied successfully".to_string(),
            output_id,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            output_id: None,
        }
    }
}

/// Size of one page in points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageSize {
    pub width: f64,
    pub height: f64,
}

/// Structural facts about a PDF, read without modifying it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub page_count: usize,
    /// Per-page `MediaBox` sizes, in page order.
    pub pages: Vec<PageSize>,
    pub pdf_version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_serializes_camel_case() {
        let s = RunSummary::succeeded(Some("watermarked-1-a.pdf".into()));
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["outputId"], "watermarked-1-a.pdf");
    }

    #[test]
    fn failed_summary_omits_output_id() {
        let json = serde_json::to_string(&RunSummary::failed("nope")).unwrap();
        assert_eq!(json, r#"{"success":false,"message":"nope"}"#);
    }
}
