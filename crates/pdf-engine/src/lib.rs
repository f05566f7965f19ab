mod cmap;
pub mod encoding;
pub mod geometry;
pub mod layer;
mod merge;
pub mod metrics;
mod objects;
pub mod text;

pub use geometry::{Matrix, PageBox, PageSize, Rect};
pub use layer::{CjkFont, EmbeddedFont, FontProgramKind, FontResource, LayerArtifact};
pub use text::PageCharacter;

use image::{ImageBuffer, Rgba};
use lopdf::{Document, ObjectId};
use std::fs;
use std::path::{Path, PathBuf};

pub type RgbaImage = ImageBuffer<Rgba<u8>, Vec<u8>>;

#[derive(Debug, Clone)]
pub enum OpenSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

impl From<PathBuf> for OpenSource {
    fn from(value: PathBuf) -> Self {
        Self::Path(value)
    }
}

impl From<&Path> for OpenSource {
    fn from(value: &Path) -> Self {
        Self::Path(value.to_path_buf())
    }
}

impl From<Vec<u8>> for OpenSource {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PdfEngineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("PDF parse error: {0}")]
    Parse(#[from] lopdf::Error),
    #[error("page {page} out of range (page_count={page_count})")]
    PageOutOfRange { page: u32, page_count: u32 },
    #[error("encrypted PDFs are not supported")]
    EncryptedUnsupported,
    #[error("document has no pages")]
    NoPages,
    #[error("page {page}: merge failed: {reason}")]
    Merge { page: u32, reason: String },
}

/// A loaded document. Page numbers are 1-based throughout.
#[derive(Debug, Clone)]
pub struct PdfDocument {
    doc: Document,
    pages: Vec<ObjectId>,
}

impl PdfDocument {
    pub fn open(source: impl Into<OpenSource>) -> Result<Self, PdfEngineError> {
        let bytes = match source.into() {
            OpenSource::Path(path) => fs::read(path)?,
            OpenSource::Bytes(bytes) => bytes,
        };

        if bytes.windows("/Encrypt".len()).any(|window| window == b"/Encrypt") {
            return Err(PdfEngineError::EncryptedUnsupported);
        }

        Self::from_document(Document::load_mem(&bytes)?)
    }

    pub fn from_document(doc: Document) -> Result<Self, PdfEngineError> {
        if doc.is_encrypted() {
            return Err(PdfEngineError::EncryptedUnsupported);
        }

        let pages: Vec<ObjectId> = doc.get_pages().into_values().collect();
        if pages.is_empty() {
            return Err(PdfEngineError::NoPages);
        }

        tracing::debug!(pages = pages.len(), "document loaded");
        Ok(Self { doc, pages })
    }

    pub fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }

    fn page_id(&self, page: u32) -> Result<ObjectId, PdfEngineError> {
        page.checked_sub(1)
            .and_then(|index| self.pages.get(index as usize))
            .copied()
            .ok_or(PdfEngineError::PageOutOfRange { page, page_count: self.page_count() })
    }

    /// MediaBox (inherited when absent on the page), defaulting to US Letter.
    pub fn page_box(&self, page: u32) -> Result<PageBox, PdfEngineError> {
        Ok(objects::page_box(&self.doc, self.page_id(page)?))
    }

    pub fn page_size(&self, page: u32) -> Result<PageSize, PdfEngineError> {
        Ok(self.page_box(page)?.size())
    }

    /// Positioned characters of one page in content order. Pages without text yield an empty list.
    pub fn page_characters(&self, page: u32) -> Result<Vec<PageCharacter>, PdfEngineError> {
        let page_id = self.page_id(page)?;
        let content = match self.doc.get_page_content(page_id) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!(page, %err, "page content unreadable, treating page as empty");
                return Ok(Vec::new());
            }
        };
        let resources = objects::page_resources(&self.doc, page_id);

        Ok(text::extract(&self.doc, &content, resources, objects::page_box(&self.doc, page_id)))
    }

    /// Composites per-page layers onto a copy of the document and serializes it. The loaded
    /// document is never modified, so a failure leaves nothing half-merged.
    pub fn merge_layers(&self, layers: Vec<(u32, LayerArtifact)>) -> Result<Vec<u8>, PdfEngineError> {
        let mut merged = self.doc.clone();
        let layer_count = layers.len();
        merge::apply_layers(&mut merged, &self.pages, layers)?;

        let mut output = Vec::new();
        merged.save_to(&mut output)?;
        tracing::debug!(layers = layer_count, bytes = output.len(), "document merged");
        Ok(output)
    }

    pub fn into_inner(self) -> Document {
        self.doc
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Dictionary, Document, Object, Stream};

    /// Single-page Helvetica document with `lines` drawn at the given baselines (user space).
    pub fn helvetica_pdf(media_box: [i64; 4], lines: &[(&str, f32, f32)]) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });

        let mut operations = Vec::new();
        for (text, x, y) in lines {
            operations.push(Operation::new("BT", vec![]));
            operations.push(Operation::new("Tf", vec!["F1".into(), 12.into()]));
            operations.push(Operation::new("Td", vec![(*x).into(), (*y).into()]));
            operations.push(Operation::new("Tj", vec![Object::string_literal(*text)]));
            operations.push(Operation::new("ET", vec![]));
        }
        let content = Content { operations }.encode().expect("content should encode");
        let content_id = doc.add_object(Stream::new(Dictionary::new(), content));

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
                "Resources" => dictionary! { "Font" => dictionary! { "F1" => font_id } },
                "MediaBox" => media_box.iter().map(|v| Object::Integer(*v)).collect::<Vec<_>>(),
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).expect("save should succeed");
        bytes
    }
}
