use crate::error::{FillError, RenderError};
use crate::metrics::{EstimatedMetrics, FontMetrics, GlyphMetrics, LoadedFont};
use crate::render::{FallbackChain, SharedFont};
use anchor_model::{AnchorConfig, RunParams};
use std::sync::Arc;

/// Everything a run needs that does not change between documents: the validated configuration,
/// run parameters, the loaded font and the engine chain built from them.
///
/// Shared by reference across batch workers; documents never write to it.
pub struct RunContext {
    config: Arc<AnchorConfig>,
    params: RunParams,
    metrics: Box<dyn FontMetrics>,
    chain: FallbackChain,
}

impl RunContext {
    /// Validates `params` and loads the font file once. An unusable font is not an error here:
    /// the engines that need it fail with the cause and the chain moves on.
    pub fn new(config: Arc<AnchorConfig>, params: RunParams) -> Result<Self, FillError> {
        params.validate()?;

        let font: SharedFont = match &params.font_file {
            Some(path) => LoadedFont::from_file(path).map(Arc::new),
            None => Err(RenderError::NoFont),
        };
        match &font {
            Ok(font) => tracing::info!(font = %font.name, collection = font.collection, "font file loaded"),
            Err(RenderError::NoFont) => tracing::debug!("no font file configured, using built-in fonts"),
            Err(err) => tracing::warn!(error = %err, "font file unusable"),
        }

        let metrics: Box<dyn FontMetrics> = match &font {
            Ok(font) => Box::new(GlyphMetrics::new(Arc::clone(font))),
            Err(_) => Box::new(EstimatedMetrics),
        };
        let chain = FallbackChain::from_kinds(&params.engines, &font);

        Ok(Self { config, params, metrics, chain })
    }

    /// Replaces the engine chain, keeping everything else.
    pub fn with_chain(mut self, chain: FallbackChain) -> Self {
        self.chain = chain;
        self
    }

    pub fn config(&self) -> &AnchorConfig {
        &self.config
    }

    pub fn params(&self) -> &RunParams {
        &self.params
    }

    pub fn metrics(&self) -> &dyn FontMetrics {
        self.metrics.as_ref()
    }

    pub fn chain(&self) -> &FallbackChain {
        &self.chain
    }
}
