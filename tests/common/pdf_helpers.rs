//! PDF inspection helpers.

use lopdf::content::Content;
use lopdf::{Document, Object};

/// Number of pages of a saved document.
pub fn page_count(bytes: &[u8]) -> usize {
    Document::load_mem(bytes)
        .expect("Output should be a loadable PDF")
        .get_pages()
        .len()
}

/// Operations of the last content stream of `page`, where redaction overlays live.
pub fn overlay_content(bytes: &[u8], page: usize) -> Content {
    let doc = Document::load_mem(bytes).expect("Output should be a loadable PDF");
    let page_id = doc
        .get_pages()
        .into_values()
        .nth(page)
        .expect("Page should exist");
    let last = *doc
        .get_page_contents(page_id)
        .last()
        .expect("Page should have content");
    let stream = doc
        .get_object(last)
        .and_then(Object::as_stream)
        .expect("Content should be a stream");
    Content::decode(&stream.content).expect("Overlay should decode")
}

/// Number of `re` operators in the overlay of `page`.
pub fn rectangle_count(bytes: &[u8], page: usize) -> usize {
    overlay_content(bytes, page)
        .operations
        .iter()
        .filter(|op| op.operator == "re")
        .count()
}

/// Strings shown with `Tj` in the overlay of `page`.
pub fn overlay_labels(bytes: &[u8], page: usize) -> Vec<String> {
    overlay_content(bytes, page)
        .operations
        .iter()
        .filter(|op| op.operator == "Tj")
        .filter_map(|op| match op.operands.first() {
            Some(Object::String(raw, _)) => Some(String::from_utf8_lossy(raw).into_owned()),
            _ => None,
        })
        .collect()
}

/// Value of an entry in the document information dictionary.
pub fn info_entry(bytes: &[u8], key: &str) -> Option<String> {
    let doc = Document::load_mem(bytes).ok()?;
    let info = match doc.trailer.get(b"Info").ok()? {
        Object::Reference(id) => doc.get_dictionary(*id).ok()?,
        Object::Dictionary(dict) => dict,
        _ => return None,
    };
    match info.get(key.as_bytes()).ok()? {
        Object::String(raw, _) => Some(String::from_utf8_lossy(raw).into_owned()),
        _ => None,
    }
}
