//! Document driver: extraction, matching, layout, rendering and merge for one document.

use crate::context::RunContext;
use crate::error::FillError;
use crate::layout::{self, OverlayInstruction};
use crate::matcher::{self, MatchOutcome, MatchResult, PageText};
use crate::render::PageDiagnostics;
use anchor_model::{AnchorConfig, AnchorRule, FillRequest, FillStats, FillValue};
use pdf_engine::{LayerArtifact, PageSize, PdfDocument};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Matches and resolved overlays for a document, before anything is drawn.
#[derive(Debug, Clone, PartialEq)]
pub struct FillPlan {
    pub stats: FillStats,
    pub matches: Vec<MatchResult>,
    pub instructions: Vec<OverlayInstruction>,
}

#[derive(Debug)]
pub struct FillOutcome {
    /// Serialized merged document.
    pub bytes: Vec<u8>,
    pub stats: FillStats,
    pub matches: Vec<MatchResult>,
    /// One entry per page that received an overlay, in page order.
    pub diagnostics: Vec<PageDiagnostics>,
}

struct ExtractedPages {
    texts: Vec<PageText>,
    sizes: BTreeMap<u32, PageSize>,
    /// Pages chosen by the run's page scope. Pinned rules may also see pages outside it.
    selected: BTreeSet<u32>,
}

impl ExtractedPages {
    fn search(&self, rule: &AnchorRule, threshold: f64) -> MatchOutcome {
        let pages = self.texts.iter().filter(|text| rule.page.is_some() || self.selected.contains(&text.page));
        matcher::locate(rule, pages, threshold)
    }
}

/// The rule a fill key refers to, or an ad-hoc rule with default offsets when the configuration
/// has none.
fn rule_for_key(config: &AnchorConfig, key: &str) -> Result<AnchorRule, FillError> {
    if let Some(rule) = config.resolve(key) {
        return Ok(rule.clone());
    }

    let rule = AnchorRule::ad_hoc(key);
    rule.validate()?;
    tracing::debug!(anchor = %rule.name, "no configuration entry, using an ad-hoc anchor");
    Ok(rule)
}

fn values_for_request(config: &AnchorConfig, request: &FillRequest) -> Result<Vec<FillValue>, FillError> {
    let mut values: Vec<FillValue> = Vec::with_capacity(request.len());
    for (key, text) in request.entries() {
        let rule = rule_for_key(config, key)?;
        match values.iter_mut().find(|existing| existing.rule.name == rule.name) {
            Some(existing) => {
                tracing::warn!(anchor = %rule.name, key = %key, "anchor filled more than once, keeping the later value");
                existing.text = text.clone();
            }
            None => values.push(FillValue { rule, text: text.clone() }),
        }
    }
    Ok(values)
}

/// Extracts the selected pages plus any page a rule is pinned to. Extraction walks the document
/// sequentially; indexing the extracted text runs in parallel.
fn extract_pages<'a>(
    doc: &PdfDocument,
    context: &RunContext,
    rules: impl IntoIterator<Item = &'a AnchorRule>,
) -> Result<ExtractedPages, FillError> {
    let page_count = doc.page_count();
    let selected: BTreeSet<u32> = context.params().pages.resolve(page_count).into_iter().collect();

    let mut wanted = selected.clone();
    for rule in rules {
        match rule.page {
            Some(pin) if pin <= page_count => {
                wanted.insert(pin);
            }
            Some(pin) => tracing::warn!(anchor = %rule.name, page = pin, page_count, "pinned page does not exist"),
            None => {}
        }
    }

    let mut sizes = BTreeMap::new();
    let mut raw = Vec::with_capacity(wanted.len());
    for &page in &wanted {
        sizes.insert(page, doc.page_size(page).map_err(FillError::Document)?);
        raw.push((page, doc.page_characters(page).map_err(FillError::Document)?));
    }
    tracing::debug!(pages = raw.len(), page_count, "page text extracted");

    let texts = raw.into_par_iter().map(|(page, characters)| PageText::new(page, characters)).collect();
    Ok(ExtractedPages { texts, sizes, selected })
}

/// Locates every requested anchor and resolves where its value goes. Missing anchors are
/// recorded in the stats and never stop the other anchors.
pub fn plan_document(context: &RunContext, doc: &PdfDocument, request: &FillRequest) -> Result<FillPlan, FillError> {
    let values = values_for_request(context.config(), request)?;
    let pages = extract_pages(doc, context, values.iter().map(|value| &value.rule))?;
    let threshold = context.params().fuzzy_threshold;

    let outcomes: Vec<MatchOutcome> = values.par_iter().map(|value| pages.search(&value.rule, threshold)).collect();

    let mut stats = FillStats::default();
    let mut matches = Vec::new();
    let mut instructions = Vec::new();
    for (FillValue { rule, text }, outcome) in values.iter().zip(outcomes) {
        match outcome.into_result() {
            Ok(found) => {
                let size = pages.sizes.get(&found.page).copied().unwrap_or_default();
                instructions.push(layout::resolve(rule, &found, text, size, context.params(), context.metrics()));
                stats.record_matched(&rule.name);
                matches.push(found);
            }
            Err(err) => {
                tracing::info!(kind = %err.kind(), "{err}");
                stats.record_missing(&rule.name);
            }
        }
    }

    tracing::info!(total = stats.total, matched = stats.matched, missing = stats.missing, "anchors located");
    Ok(FillPlan { stats, matches, instructions })
}

/// Fills `doc` with the values of `request` and returns the merged document bytes. `doc` itself
/// is left untouched.
pub fn fill_document(context: &RunContext, doc: &PdfDocument, request: &FillRequest) -> Result<FillOutcome, FillError> {
    let plan = plan_document(context, doc, request)?;

    let mut by_page: BTreeMap<u32, Vec<OverlayInstruction>> = BTreeMap::new();
    for instruction in plan.instructions {
        by_page.entry(instruction.page).or_default().push(instruction);
    }
    let work = by_page
        .into_iter()
        .map(|(page, instructions)| Ok((page, doc.page_size(page).map_err(FillError::Document)?, instructions)))
        .collect::<Result<Vec<_>, FillError>>()?;

    let rendered = work
        .into_par_iter()
        .map(|(page, size, instructions)| {
            let (layer, diagnostics) = context.chain().render(page, size, &instructions)?;
            Ok((page, layer, diagnostics))
        })
        .collect::<Result<Vec<(u32, LayerArtifact, PageDiagnostics)>, FillError>>()?;

    let mut layers = Vec::with_capacity(rendered.len());
    let mut diagnostics = Vec::with_capacity(rendered.len());
    for (page, layer, page_diagnostics) in rendered {
        tracing::debug!(page, engine = %page_diagnostics.engine, layer = layer.kind(), "page rendered");
        layers.push((page, layer));
        diagnostics.push(page_diagnostics);
    }

    let bytes = doc.merge_layers(layers).map_err(FillError::Merge)?;
    tracing::info!(pages = diagnostics.len(), bytes = bytes.len(), "overlay merged");

    Ok(FillOutcome { bytes, stats: plan.stats, matches: plan.matches, diagnostics })
}

/// Opens `input`, fills it, and writes the result to `output` atomically. Nothing is written when
/// any step fails.
pub fn fill_file(context: &RunContext, input: &Path, output: &Path, request: &FillRequest) -> Result<FillOutcome, FillError> {
    tracing::info!(input = %input.display(), "opening document");
    let doc = PdfDocument::open(input).map_err(FillError::Document)?;
    let outcome = fill_document(context, &doc, request)?;

    storage::write_atomic(output, &outcome.bytes)
        .map_err(|source| FillError::Output { path: output.to_path_buf(), source })?;
    tracing::info!(output = %output.display(), "filled document written");

    Ok(outcome)
}

/// Match results for `keys` without drawing anything. No keys means every configured anchor.
pub fn locate_anchors(context: &RunContext, doc: &PdfDocument, keys: &[String]) -> Result<Vec<MatchOutcome>, FillError> {
    let rules = if keys.is_empty() {
        context.config().rules().to_vec()
    } else {
        keys.iter().map(|key| rule_for_key(context.config(), key)).collect::<Result<Vec<_>, _>>()?
    };

    let pages = extract_pages(doc, context, &rules)?;
    let threshold = context.params().fuzzy_threshold;
    Ok(rules.par_iter().map(|rule| pages.search(rule, threshold)).collect())
}
