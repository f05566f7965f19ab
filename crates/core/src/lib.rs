//! AnchorFill Core Library
//!
//! Locates anchor phrases in extracted page text, resolves where each value goes, and draws the
//! overlay through an ordered chain of engines before merging it onto the original pages.

pub mod batch;
pub mod context;
pub mod error;
pub mod layout;
pub mod matcher;
pub mod metrics;
pub mod normalize;
pub mod pipeline;
pub mod render;

#[cfg(test)]
mod fixtures;

pub use batch::{run_batch, BatchSummary, CancellationToken, RecordReport, RecordStatus};
pub use context::RunContext;
pub use error::{EngineFailure, ErrorKind, FillError, RenderError};
pub use layout::{OverlayInstruction, WrapPlan};
pub use matcher::{MatchOutcome, MatchResult, PageText};
pub use metrics::{EstimatedMetrics, FontMetrics, GlyphMetrics, LoadedFont};
pub use normalize::{normalize, TextIndex};
pub use pipeline::{fill_document, fill_file, locate_anchors, plan_document, FillOutcome, FillPlan};
pub use render::{FallbackChain, OverlayEngine, PageDiagnostics, SharedFont};
