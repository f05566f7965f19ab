//! In-process test documents.

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};

/// Text drawn on a fixture page, baseline in user space (origin bottom-left).
pub struct Line<'a> {
    pub text: &'a str,
    pub x: f32,
    pub y: f32,
    pub cjk: bool,
}

pub fn latin(text: &str, x: f32, y: f32) -> Line<'_> {
    Line { text, x, y, cjk: false }
}

pub fn cjk(text: &str, x: f32, y: f32) -> Line<'_> {
    Line { text, x, y, cjk: true }
}

/// Letter-sized document with one page per entry. `F1` is Helvetica, `F2` is STSong-Light with
/// the UCS-2 CMap.
pub fn document(pages: &[&[Line<'_>]]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let latin_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let descendant_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "CIDFontType0",
        "BaseFont" => "STSong-Light",
        "CIDSystemInfo" => dictionary! {
            "Registry" => Object::string_literal("Adobe"),
            "Ordering" => Object::string_literal("GB1"),
            "Supplement" => 2,
        },
        "DW" => 1000,
    });
    let cjk_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type0",
        "BaseFont" => "STSong-Light",
        "Encoding" => "UniGB-UCS2-H",
        "DescendantFonts" => vec![Object::Reference(descendant_id)],
    });

    let kids: Vec<Object> = pages
        .iter()
        .map(|lines| Object::Reference(add_page(&mut doc, pages_id, lines)))
        .collect();
    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => dictionary! { "Font" => dictionary! { "F1" => latin_id, "F2" => cjk_id } },
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("fixture should save");
    bytes
}

fn add_page(doc: &mut Document, parent: ObjectId, lines: &[Line<'_>]) -> ObjectId {
    let mut operations = Vec::new();
    for line in lines {
        let (font, text) = if line.cjk {
            let bytes = line.text.encode_utf16().flat_map(u16::to_be_bytes).collect();
            ("F2", Object::String(bytes, StringFormat::Hexadecimal))
        } else {
            ("F1", Object::string_literal(line.text))
        };
        operations.push(Operation::new("BT", vec![]));
        operations.push(Operation::new("Tf", vec![font.into(), 12.into()]));
        operations.push(Operation::new("Td", vec![line.x.into(), line.y.into()]));
        operations.push(Operation::new("Tj", vec![text]));
        operations.push(Operation::new("ET", vec![]));
    }
    let content = Content { operations }.encode().expect("fixture content should encode");
    let content_id = doc.add_object(Stream::new(Dictionary::new(), content));

    doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => parent,
        "Contents" => content_id,
    })
}
