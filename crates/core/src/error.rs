use anchor_model::{EngineKind, ModelError};
use pdf_engine::PdfEngineError;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use storage::StorageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    ConfigInvalid,
    AnchorNotFound,
    RenderFailure,
    MergeFailure,
    IoFailure,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::ConfigInvalid => "config-invalid",
            ErrorKind::AnchorNotFound => "anchor-not-found",
            ErrorKind::RenderFailure => "render-failure",
            ErrorKind::MergeFailure => "merge-failure",
            ErrorKind::IoFailure => "io-failure",
        };
        f.write_str(label)
    }
}

/// Why a single overlay engine could not draw a page.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    #[error("no font file configured")]
    NoFont,
    #[error("font unusable: {0}")]
    FontUnusable(String),
    #[error("font has no glyph for {0:?}")]
    MissingGlyph(char),
    #[error("character {0:?} cannot be encoded")]
    Unencodable(char),
    #[error("{0}")]
    Backend(String),
}

/// One failed attempt recorded by the fallback chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineFailure {
    pub engine: EngineKind,
    pub cause: String,
}

impl fmt::Display for EngineFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.engine, self.cause)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FillError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ModelError),
    #[error("anchor `{anchor}` not found (best score {})", format_score(.best_score))]
    AnchorNotFound { anchor: String, best_score: Option<f64> },
    #[error("page {page}: every overlay engine failed ({})", join_failures(.failures))]
    RenderExhausted { page: u32, failures: Vec<EngineFailure> },
    #[error("unable to read document: {0}")]
    Document(#[source] PdfEngineError),
    #[error("merge failed: {0}")]
    Merge(#[source] PdfEngineError),
    #[error("unable to write `{}`: {source}", .path.display())]
    Output { path: PathBuf, #[source] source: StorageError },
}

impl FillError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FillError::Config(_) => ErrorKind::ConfigInvalid,
            FillError::AnchorNotFound { .. } => ErrorKind::AnchorNotFound,
            FillError::RenderExhausted { .. } => ErrorKind::RenderFailure,
            FillError::Merge(_) => ErrorKind::MergeFailure,
            FillError::Document(_) | FillError::Output { .. } => ErrorKind::IoFailure,
        }
    }

    pub fn page(&self) -> Option<u32> {
        match self {
            FillError::RenderExhausted { page, .. } => Some(*page),
            FillError::Merge(PdfEngineError::Merge { page, .. }) => Some(*page),
            _ => None,
        }
    }
}

fn format_score(score: &Option<f64>) -> String {
    score.map_or_else(|| "none".to_owned(), |score| format!("{score:.2}"))
}

fn join_failures(failures: &[EngineFailure]) -> String {
    failures.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_variants() {
        let exhausted = FillError::RenderExhausted {
            page: 2,
            failures: vec![
                EngineFailure { engine: EngineKind::Embedded, cause: "no font file configured".to_owned() },
                EngineFailure { engine: EngineKind::Raster, cause: "no font file configured".to_owned() },
            ],
        };

        assert_eq!(exhausted.kind(), ErrorKind::RenderFailure);
        assert_eq!(exhausted.page(), Some(2));
        assert_eq!(
            exhausted.to_string(),
            "page 2: every overlay engine failed (embedded: no font file configured; raster: no font file configured)"
        );
        assert_eq!(FillError::Config(ModelError::DuplicateAnchor("a".to_owned())).kind(), ErrorKind::ConfigInvalid);
        assert_eq!(
            FillError::Merge(PdfEngineError::Merge { page: 1, reason: "x".to_owned() }).kind(),
            ErrorKind::MergeFailure
        );
    }
}
