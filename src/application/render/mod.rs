//! HTML to PDF render pipeline.
//!
//! Each request walks `Acquiring → Loading → Rendering → Capturing → Releasing`
//! against a renderer borrowed from the pool. Every step is bounded by a
//! deadline, and the borrowed renderer ends in exactly one of release (success)
//! or invalidate (any failure after acquisition).

mod pipeline;
mod types;

pub use pipeline::RenderPipeline;
pub use types::{RenderDeadlines, RenderError, RenderStage};
