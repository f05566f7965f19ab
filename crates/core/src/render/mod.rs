//! Overlay engines and the ordered fallback chain across them.

mod embedded;
mod raster;
mod standard;

pub use embedded::EmbeddedEngine;
pub use raster::RasterEngine;
pub use standard::StandardEngine;

use crate::error::{EngineFailure, FillError, RenderError};
use crate::layout::OverlayInstruction;
use crate::metrics::LoadedFont;
use anchor_model::EngineKind;
use lopdf::content::{Content, Operation};
use lopdf::Object;
use pdf_engine::{LayerArtifact, PageSize};
use serde::Serialize;
use std::sync::Arc;

/// The run's font file, or why there is none usable. Shared by every engine that needs glyphs.
pub type SharedFont = Result<Arc<LoadedFont>, RenderError>;

/// Draws every instruction of one page into a single layer.
pub trait OverlayEngine: Send + Sync {
    fn kind(&self) -> EngineKind;

    fn render(&self, page: PageSize, instructions: &[OverlayInstruction]) -> Result<LayerArtifact, RenderError>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageDiagnostics {
    pub page: u32,
    pub engine: EngineKind,
    pub instructions: usize,
    /// Engines that failed before `engine` succeeded, in the order tried.
    pub fallbacks: Vec<EngineFailure>,
}

pub struct FallbackChain {
    engines: Vec<Box<dyn OverlayEngine>>,
}

impl FallbackChain {
    pub fn new(engines: Vec<Box<dyn OverlayEngine>>) -> Self {
        Self { engines }
    }

    /// Builds the built-in engines in `order`, all sharing the same font.
    pub fn from_kinds(order: &[EngineKind], font: &SharedFont) -> Self {
        let engines = order
            .iter()
            .map(|kind| -> Box<dyn OverlayEngine> {
                match kind {
                    EngineKind::Embedded => Box::new(EmbeddedEngine::new(font.clone())),
                    EngineKind::Standard => Box::new(StandardEngine),
                    EngineKind::Raster => Box::new(RasterEngine::new(font.clone())),
                }
            })
            .collect();
        Self::new(engines)
    }

    pub fn kinds(&self) -> Vec<EngineKind> {
        self.engines.iter().map(|engine| engine.kind()).collect()
    }

    /// Tries each engine in order with the same instructions until one succeeds.
    pub fn render(
        &self,
        page: u32,
        size: PageSize,
        instructions: &[OverlayInstruction],
    ) -> Result<(LayerArtifact, PageDiagnostics), FillError> {
        let mut fallbacks = Vec::new();

        for engine in &self.engines {
            match engine.render(size, instructions) {
                Ok(layer) => {
                    let diagnostics = PageDiagnostics {
                        page,
                        engine: engine.kind(),
                        instructions: instructions.len(),
                        fallbacks,
                    };
                    return Ok((layer, diagnostics));
                }
                Err(err) => {
                    tracing::warn!(page, engine = %engine.kind(), error = %err, "overlay engine failed, falling back");
                    fallbacks.push(EngineFailure { engine: engine.kind(), cause: err.to_string() });
                }
            }
        }

        Err(FillError::RenderExhausted { page, failures: fallbacks })
    }
}

/// Content operations showing one line of text at a baseline given in page coordinates.
pub(crate) fn show_line(font: &str, size: f32, x: f32, baseline: f32, page: PageSize, text: Object) -> Vec<Operation> {
    vec![
        Operation::new("Tf", vec![Object::Name(font.as_bytes().to_vec()), real(size)]),
        Operation::new(
            "Tm",
            vec![real(1.0), real(0.0), real(0.0), real(1.0), real(x), real(page.height_pt - baseline)],
        ),
        Operation::new("Tj", vec![text]),
    ]
}

/// Wraps line operations in a black-fill text object and encodes them.
pub(crate) fn encode_text(lines: Vec<Operation>) -> Result<Vec<u8>, RenderError> {
    let mut operations = Vec::with_capacity(lines.len() + 4);
    operations.push(Operation::new("q", vec![]));
    operations.push(Operation::new("BT", vec![]));
    operations.push(Operation::new("g", vec![real(0.0)]));
    operations.extend(lines);
    operations.push(Operation::new("ET", vec![]));
    operations.push(Operation::new("Q", vec![]));

    Content { operations }.encode().map_err(|err| RenderError::Backend(err.to_string()))
}

pub(crate) fn real(value: f32) -> Object {
    Object::Real(value.into())
}
