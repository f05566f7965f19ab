//! Composites overlay layers onto existing pages.
//!
//! Each page's original content streams are bracketed by `q`/`Q` streams and left untouched;
//! every layer becomes a Form XObject painted after them.

use crate::geometry::PageBox;
use crate::layer::{CjkFont, EmbeddedFont, FontProgramKind, FontResource, LayerArtifact};
use crate::objects::{page_box, page_resources, resolve};
use crate::{PdfEngineError, RgbaImage};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use std::io::Write;

const XOBJECT_PREFIX: &str = "AnchorFill";
const TO_UNICODE_CHUNK: usize = 100;

/// Applies `layers` to `doc` in place. Callers pass a copy they can discard on error.
pub(crate) fn apply_layers(
    doc: &mut Document,
    pages: &[ObjectId],
    layers: Vec<(u32, LayerArtifact)>,
) -> Result<(), PdfEngineError> {
    let mut wrapped: Vec<ObjectId> = Vec::new();

    for (page, layer) in layers {
        let page_id = page
            .checked_sub(1)
            .and_then(|index| pages.get(index as usize))
            .copied()
            .ok_or(PdfEngineError::PageOutOfRange { page, page_count: pages.len() as u32 })?;
        let kind = layer.kind();

        if !wrapped.contains(&page_id) {
            isolate_original_content(doc, page_id, page)?;
            inline_resources(doc, page_id);
            wrapped.push(page_id);
        }

        let page_box = page_box(doc, page_id);
        let form_id = build_form(doc, page_box, layer)?;
        let name = attach_xobject(doc, page_id, page, form_id)?;

        let overlay = Stream::new(Dictionary::new(), format!("q /{name} Do Q\n").into_bytes());
        let overlay_id = doc.add_object(overlay);
        append_content(doc, page_id, page, overlay_id)?;

        tracing::debug!(page, kind, xobject = %name, "layer merged");
    }

    Ok(())
}

fn merge_error(page: u32, reason: impl Into<String>) -> PdfEngineError {
    PdfEngineError::Merge { page, reason: reason.into() }
}

fn page_dict_mut(doc: &mut Document, page_id: ObjectId, page: u32) -> Result<&mut Dictionary, PdfEngineError> {
    doc.get_dictionary_mut(page_id).map_err(|err| merge_error(page, err.to_string()))
}

/// Rewrites `/Contents` as `[q-stream, original..., Q-stream]`.
fn isolate_original_content(doc: &mut Document, page_id: ObjectId, page: u32) -> Result<(), PdfEngineError> {
    let current = page_dict_mut(doc, page_id, page)?.get(b"Contents").ok().cloned();

    let mut original: Vec<Object> = match current {
        None => Vec::new(),
        Some(Object::Reference(id)) => match doc.get_object(id) {
            Ok(Object::Array(items)) => items.clone(),
            _ => vec![Object::Reference(id)],
        },
        Some(Object::Array(items)) => items,
        Some(Object::Stream(stream)) => vec![Object::Reference(doc.add_object(stream))],
        Some(other) => return Err(merge_error(page, format!("unsupported /Contents entry: {other:?}"))),
    };

    let open = doc.add_object(Stream::new(Dictionary::new(), b"q\n".to_vec()));
    let close = doc.add_object(Stream::new(Dictionary::new(), b"\nQ\n".to_vec()));

    let mut contents = Vec::with_capacity(original.len() + 2);
    contents.push(Object::Reference(open));
    contents.append(&mut original);
    contents.push(Object::Reference(close));

    page_dict_mut(doc, page_id, page)?.set("Contents", Object::Array(contents));
    Ok(())
}

/// Copies the effective (possibly inherited) resources onto the page itself so that adding an
/// XObject never alters a dictionary shared with other pages.
fn inline_resources(doc: &mut Document, page_id: ObjectId) {
    let mut resources = page_resources(doc, page_id).cloned().unwrap_or_default();

    let xobjects = resources
        .get(b"XObject")
        .ok()
        .and_then(|o| resolve(doc, o))
        .and_then(|o| o.as_dict().ok())
        .cloned()
        .unwrap_or_default();
    resources.set("XObject", xobjects);

    if let Ok(dict) = doc.get_dictionary_mut(page_id) {
        dict.set("Resources", resources);
    }
}

fn attach_xobject(
    doc: &mut Document,
    page_id: ObjectId,
    page: u32,
    form_id: ObjectId,
) -> Result<String, PdfEngineError> {
    let dict = page_dict_mut(doc, page_id, page)?;
    let xobjects = match dict.get_mut(b"Resources") {
        Ok(Object::Dictionary(resources)) => match resources.get_mut(b"XObject") {
            Ok(Object::Dictionary(xobjects)) => xobjects,
            _ => return Err(merge_error(page, "page resources lost their XObject dictionary")),
        },
        _ => return Err(merge_error(page, "page resources are not a dictionary")),
    };

    let name = (1..)
        .map(|n| format!("{XOBJECT_PREFIX}{n}"))
        .find(|name| !xobjects.has(name.as_bytes()))
        .ok_or_else(|| merge_error(page, "no free XObject name"))?;
    xobjects.set(name.clone(), Object::Reference(form_id));
    Ok(name)
}

fn append_content(doc: &mut Document, page_id: ObjectId, page: u32, stream_id: ObjectId) -> Result<(), PdfEngineError> {
    match page_dict_mut(doc, page_id, page)?.get_mut(b"Contents") {
        Ok(Object::Array(items)) => {
            items.push(Object::Reference(stream_id));
            Ok(())
        }
        _ => Err(merge_error(page, "page contents were not normalised")),
    }
}

fn build_form(doc: &mut Document, page_box: PageBox, layer: LayerArtifact) -> Result<ObjectId, PdfEngineError> {
    let mut resources = Dictionary::new();

    let content = match layer {
        LayerArtifact::Vector { content, fonts } => {
            let mut font_dict = Dictionary::new();
            for (name, font) in fonts {
                let font_id = add_font(doc, font)?;
                font_dict.set(name, Object::Reference(font_id));
            }
            resources.set("Font", font_dict);
            content
        }
        LayerArtifact::Raster { image, bounds } => {
            let image_id = add_image(doc, &image)?;
            resources.set("XObject", dictionary! { "Im1" => Object::Reference(image_id) });
            let bottom = page_box.height - bounds.bottom;
            format!(
                "q {} 0 0 {} {} {} cm /Im1 Do Q\n",
                fmt_num(bounds.width()),
                fmt_num(bounds.height()),
                fmt_num(bounds.left),
                fmt_num(bottom)
            )
            .into_bytes()
        }
    };

    let form = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Form",
        "BBox" => vec![real(0.0), real(0.0), real(page_box.width), real(page_box.height)],
        "Matrix" => vec![real(1.0), real(0.0), real(0.0), real(1.0), real(page_box.x0), real(page_box.y0)],
        "Resources" => resources,
    };

    Ok(doc.add_object(Stream::new(form, content)))
}

fn add_font(doc: &mut Document, font: FontResource) -> Result<ObjectId, PdfEngineError> {
    Ok(match font {
        FontResource::Standard { base_font } => doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => base_font.as_str(),
            "Encoding" => "WinAnsiEncoding",
        }),
        FontResource::CjkBuiltin(cjk) => add_cjk_font(doc, cjk),
        FontResource::Embedded(embedded) => add_embedded_font(doc, embedded)?,
    })
}

fn add_cjk_font(doc: &mut Document, cjk: CjkFont) -> ObjectId {
    let descriptor = doc.add_object(dictionary! {
        "Type" => "FontDescriptor",
        "FontName" => cjk.base_font.as_str(),
        "Flags" => 6,
        "FontBBox" => vec![Object::Integer(-25), Object::Integer(-254), Object::Integer(1000), Object::Integer(880)],
        "ItalicAngle" => 0,
        "Ascent" => 880,
        "Descent" => -120,
        "CapHeight" => 880,
        "StemV" => 93,
    });
    let descendant = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "CIDFontType0",
        "BaseFont" => cjk.base_font.as_str(),
        "CIDSystemInfo" => dictionary! {
            "Registry" => Object::string_literal("Adobe"),
            "Ordering" => Object::string_literal(cjk.ordering.as_str()),
            "Supplement" => cjk.supplement,
        },
        "FontDescriptor" => Object::Reference(descriptor),
        "DW" => 1000,
    });

    doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type0",
        "BaseFont" => cjk.base_font.as_str(),
        "Encoding" => cjk.encoding.as_str(),
        "DescendantFonts" => vec![Object::Reference(descendant)],
    })
}

fn add_embedded_font(doc: &mut Document, font: EmbeddedFont) -> Result<ObjectId, PdfEngineError> {
    let (file_key, cid_subtype, program) = match font.kind {
        FontProgramKind::TrueType => {
            let length1 = font.program.len() as i64;
            let stream = compressed_stream(dictionary! { "Length1" => length1 }, &font.program)?;
            ("FontFile2", "CIDFontType2", stream)
        }
        FontProgramKind::OpenTypeCff => {
            let stream = compressed_stream(dictionary! { "Subtype" => "OpenType" }, &font.program)?;
            ("FontFile3", "CIDFontType0", stream)
        }
    };
    let program_id = doc.add_object(program);

    let mut descriptor = dictionary! {
        "Type" => "FontDescriptor",
        "FontName" => font.base_font.as_str(),
        "Flags" => 4,
        "FontBBox" => font.bbox.iter().map(|v| real(*v)).collect::<Vec<_>>(),
        "ItalicAngle" => 0,
        "Ascent" => real(font.ascent),
        "Descent" => real(font.descent),
        "CapHeight" => real(font.ascent),
        "StemV" => 80,
    };
    descriptor.set(file_key, Object::Reference(program_id));
    let descriptor_id = doc.add_object(descriptor);

    let mut descendant = dictionary! {
        "Type" => "Font",
        "Subtype" => cid_subtype,
        "BaseFont" => font.base_font.as_str(),
        "CIDSystemInfo" => dictionary! {
            "Registry" => Object::string_literal("Adobe"),
            "Ordering" => Object::string_literal("Identity"),
            "Supplement" => 0,
        },
        "FontDescriptor" => Object::Reference(descriptor_id),
        "DW" => 1000,
        "W" => width_array(&font.widths),
    };
    if font.kind == FontProgramKind::TrueType {
        descendant.set("CIDToGIDMap", "Identity");
    }
    let descendant_id = doc.add_object(descendant);

    let to_unicode_id = doc.add_object(compressed_stream(Dictionary::new(), &to_unicode_cmap(&font.to_unicode))?);

    Ok(doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type0",
        "BaseFont" => font.base_font.as_str(),
        "Encoding" => "Identity-H",
        "DescendantFonts" => vec![Object::Reference(descendant_id)],
        "ToUnicode" => Object::Reference(to_unicode_id),
    }))
}

fn width_array(widths: &[(u16, f32)]) -> Vec<Object> {
    let mut sorted = widths.to_vec();
    sorted.sort_by_key(|(gid, _)| *gid);
    sorted.dedup_by_key(|(gid, _)| *gid);

    sorted
        .into_iter()
        .flat_map(|(gid, width)| [Object::Integer(i64::from(gid)), Object::Array(vec![real(width)])])
        .collect()
}

/// ToUnicode CMap mapping two-byte glyph ids to UTF-16BE text.
pub(crate) fn to_unicode_cmap(entries: &[(u16, char)]) -> Vec<u8> {
    let mut sorted = entries.to_vec();
    sorted.sort_by_key(|(gid, _)| *gid);
    sorted.dedup_by_key(|(gid, _)| *gid);

    let mut out = String::from(
        "/CIDInit /ProcSet findresource begin\n12 dict begin\nbegincmap\n\
         /CIDSystemInfo << /Registry (Adobe) /Ordering (UCS) /Supplement 0 >> def\n\
         /CMapName /Adobe-Identity-UCS def\n/CMapType 2 def\n\
         1 begincodespacerange\n<0000> <FFFF>\nendcodespacerange\n",
    );
    for chunk in sorted.chunks(TO_UNICODE_CHUNK) {
        out.push_str(&format!("{} beginbfchar\n", chunk.len()));
        for (gid, ch) in chunk {
            let mut units = [0u16; 2];
            let hex: String = ch.encode_utf16(&mut units).iter().map(|unit| format!("{unit:04X}")).collect();
            out.push_str(&format!("<{gid:04X}> <{hex}>\n"));
        }
        out.push_str("endbfchar\n");
    }
    out.push_str("endcmap\nCMapName currentdict /CMap defineresource pop\nend\nend\n");
    out.into_bytes()
}

fn add_image(doc: &mut Document, image: &RgbaImage) -> Result<ObjectId, PdfEngineError> {
    let (width, height) = image.dimensions();
    let pixels = image.as_raw();
    let mut rgb = Vec::with_capacity(pixels.len() / 4 * 3);
    let mut alpha = Vec::with_capacity(pixels.len() / 4);
    for px in pixels.chunks_exact(4) {
        rgb.extend_from_slice(&px[..3]);
        alpha.push(px[3]);
    }

    let image_dict = |color_space: &str| {
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => i64::from(width),
            "Height" => i64::from(height),
            "ColorSpace" => color_space,
            "BitsPerComponent" => 8,
        }
    };

    let mask_id = doc.add_object(compressed_stream(image_dict("DeviceGray"), &alpha)?);
    let mut color = image_dict("DeviceRGB");
    color.set("SMask", Object::Reference(mask_id));
    Ok(doc.add_object(compressed_stream(color, &rgb)?))
}

fn compressed_stream(mut dict: Dictionary, data: &[u8]) -> Result<Stream, PdfEngineError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    let compressed = encoder.finish()?;
    dict.set("Filter", "FlateDecode");
    Ok(Stream::new(dict, compressed))
}

fn real(value: f32) -> Object {
    Object::Real(value.into())
}

fn fmt_num(value: f32) -> String {
    let rounded = (value * 1000.0).round() / 1000.0;
    if rounded == rounded.trunc() {
        format!("{}", rounded as i64)
    } else {
        format!("{rounded}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_are_written_compactly() {
        assert_eq!(fmt_num(12.0), "12");
        assert_eq!(fmt_num(12.5), "12.5");
        assert_eq!(fmt_num(-0.33333), "-0.333");
    }

    #[test]
    fn to_unicode_cmap_round_trips_through_the_parser() {
        let cmap = to_unicode_cmap(&[(7, '身'), (3, 'A'), (7, '份')]);
        let parsed = crate::cmap::ToUnicode::parse(&cmap);

        assert_eq!(parsed.get(3), Some("A"));
        assert_eq!(parsed.get(7), Some("身"));
    }

    #[test]
    fn width_array_is_sorted_by_glyph() {
        let array = width_array(&[(9, 500.0), (2, 250.0)]);
        assert_eq!(array[0], Object::Integer(2));
        assert_eq!(array[2], Object::Integer(9));
    }
}
