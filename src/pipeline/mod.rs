//! Pipeline stages for stamping a watermark onto a PDF.
//!
//! Each submodule implements exactly one step, from pure arithmetic up to
//! the async orchestration, so each can be tested on its own.
//!
//! ## Data Flow
//!
//! ```text
//! document ──▶ font ──▶ compose ──▶ geometry
//! (load/save)  (measure) (per page)  (placements)
//! ```
//!
//! 1. [`geometry`] - where the text goes on a page for each [`geometry::Layout`];
//!    pure functions, no document access
//! 2. [`font`]     - embedded TrueType face or Helvetica fallback; measures and
//!    encodes the text, installs the font objects
//! 3. [`compose`]  - applies the placements to one page's content stream and
//!    resources
//! 4. [`document`] - loads the bytes, drives pages in order while emitting
//!    progress, serializes; runs in `spawn_blocking` because lopdf is
//!    synchronous

pub mod compose;
pub mod document;
pub mod font;
pub mod geometry;
