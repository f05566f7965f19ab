//! Small lookups over the lopdf object graph shared by extraction and merging.

use crate::geometry::PageBox;
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};

const MAX_PARENT_DEPTH: usize = 32;

/// Follows a reference chain to the target object.
pub(crate) fn resolve<'a>(doc: &'a Document, object: &'a Object) -> Option<&'a Object> {
    let mut current = object;
    for _ in 0..MAX_PARENT_DEPTH {
        match current {
            Object::Reference(id) => current = doc.get_object(*id).ok()?,
            other => return Some(other),
        }
    }
    None
}

pub(crate) fn resolve_dict<'a>(doc: &'a Document, object: &'a Object) -> Option<&'a Dictionary> {
    match resolve(doc, object)? {
        Object::Dictionary(dict) => Some(dict),
        Object::Stream(stream) => Some(&stream.dict),
        _ => None,
    }
}

pub(crate) fn dict_entry<'a>(doc: &'a Document, dict: &'a Dictionary, key: &[u8]) -> Option<&'a Object> {
    resolve(doc, dict.get(key).ok()?)
}

pub(crate) fn number(object: &Object) -> Option<f32> {
    object.as_float().ok()
}

/// Stream payload with its filters removed. Unfiltered streams are returned as stored.
pub(crate) fn stream_bytes(stream: &Stream) -> Option<Vec<u8>> {
    if stream.dict.has(b"Filter") {
        stream.decompressed_content().ok()
    } else {
        Some(stream.content.clone())
    }
}

/// Looks `key` up on the page and then up its `Parent` chain.
pub(crate) fn inherited<'a>(doc: &'a Document, page_id: ObjectId, key: &[u8]) -> Option<&'a Object> {
    let mut dict = doc.get_dictionary(page_id).ok()?;
    for _ in 0..MAX_PARENT_DEPTH {
        if let Ok(value) = dict.get(key) {
            return resolve(doc, value);
        }
        let parent = dict.get(b"Parent").ok()?.as_reference().ok()?;
        dict = doc.get_dictionary(parent).ok()?;
    }
    None
}

pub(crate) fn page_box(doc: &Document, page_id: ObjectId) -> PageBox {
    inherited(doc, page_id, b"MediaBox")
        .and_then(|object| object.as_array().ok())
        .and_then(|array| {
            if array.len() != 4 {
                return None;
            }
            let mut values = [0.0f32; 4];
            for (slot, item) in values.iter_mut().zip(array) {
                *slot = number(resolve(doc, item)?)?;
            }
            let [x0, y0, x1, y1] = values;
            Some(PageBox {
                x0: x0.min(x1),
                y0: y0.min(y1),
                width: (x1 - x0).abs(),
                height: (y1 - y0).abs(),
            })
        })
        .filter(|page| page.width > 0.0 && page.height > 0.0)
        .unwrap_or_default()
}

/// Effective resources of a page, following inheritance.
pub(crate) fn page_resources<'a>(doc: &'a Document, page_id: ObjectId) -> Option<&'a Dictionary> {
    match inherited(doc, page_id, b"Resources")? {
        Object::Dictionary(dict) => Some(dict),
        _ => None,
    }
}
