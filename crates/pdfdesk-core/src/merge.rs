//! PDF Merge
//!
//! Combines multiple PDFs into a single document.

use crate::error::PdfError;
use crate::inspect::load;
use lopdf::{Document, Object, ObjectId};

/// Merge multiple PDFs into one, pages in input order
///
/// The first document is the destination. Every later document has its
/// object ids shifted past the destination's highest id, its objects copied
/// over and its pages hung under the destination page tree. The leftover
/// catalogs are pruned before saving. A single input is returned untouched.
pub fn merge_documents(documents: Vec<Vec<u8>>) -> Result<Vec<u8>, PdfError> {
    let mut documents = documents.into_iter();

    let first = documents
        .next()
        .ok_or_else(|| PdfError::Empty("No documents to merge".into()))?;

    let rest: Vec<Vec<u8>> = documents.collect();
    if rest.is_empty() {
        return Ok(first);
    }

    let mut dest = load(&first).map_err(|e| with_index(0, e))?;
    let pages_id = pages_root(&dest)?;
    let mut dest_page_refs = page_references(&dest);

    for (i, bytes) in rest.iter().enumerate() {
        let mut source = load(bytes).map_err(|e| with_index(i + 1, e))?;
        let source_pages = page_references(&source);
        for &page_id in &source_pages {
            inline_inherited_attributes(&mut source, page_id);
        }

        let id_offset = dest.max_id;

        for (old_id, object) in source.objects.into_iter() {
            let new_id = (old_id.0 + id_offset, old_id.1);
            dest.objects.insert(new_id, remap_object_refs(object, id_offset));
        }

        for old_page_ref in source_pages {
            let new_page_ref = (old_page_ref.0 + id_offset, old_page_ref.1);
            if let Some(Object::Dictionary(page)) = dest.objects.get_mut(&new_page_ref) {
                page.set("Parent", Object::Reference(pages_id));
            }
            dest_page_refs.push(new_page_ref);
        }

        dest.max_id = (source.max_id + id_offset).max(dest.max_id);
    }

    update_page_tree(&mut dest, pages_id, &dest_page_refs)?;

    dest.prune_objects();
    dest.compress();

    let mut buffer = Vec::new();
    dest.save_to(&mut buffer)
        .map_err(|e| PdfError::Operation(format!("Failed to save merged PDF: {}", e)))?;

    Ok(buffer)
}

fn with_index(index: usize, err: PdfError) -> PdfError {
    match err {
        PdfError::Parse(msg) => PdfError::Parse(format!("document {}: {}", index + 1, msg)),
        other => other,
    }
}

/// Page object references in page order
fn page_references(doc: &Document) -> Vec<ObjectId> {
    doc.get_pages().values().copied().collect()
}

const INHERITABLE: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

/// Copy attributes a page inherits from its ancestors onto the page itself,
/// so it can be moved under a different parent
fn inline_inherited_attributes(doc: &mut Document, page_id: ObjectId) {
    let mut inherited = Vec::new();
    let mut seen = std::collections::HashSet::new();

    let mut parent = doc
        .get_object(page_id)
        .and_then(Object::as_dict)
        .and_then(|d| d.get(b"Parent"))
        .and_then(Object::as_reference)
        .ok();

    while let Some(node_id) = parent {
        if !seen.insert(node_id) {
            break;
        }
        let Ok(node) = doc.get_object(node_id).and_then(Object::as_dict) else {
            break;
        };
        for key in INHERITABLE {
            if let Ok(value) = node.get(key) {
                inherited.push((key.to_vec(), value.clone()));
            }
        }
        parent = node.get(b"Parent").and_then(Object::as_reference).ok();
    }

    if let Ok(Object::Dictionary(page)) = doc.get_object_mut(page_id) {
        // nearest ancestor wins, so the first value found for a key sticks
        for (key, value) in inherited {
            if !page.has(&key) {
                page.set(key, value);
            }
        }
    }
}

/// Recursively remap object references in an object
fn remap_object_refs(obj: Object, offset: u32) -> Object {
    match obj {
        Object::Reference(id) => Object::Reference((id.0 + offset, id.1)),
        Object::Array(arr) => Object::Array(
            arr.into_iter()
                .map(|o| remap_object_refs(o, offset))
                .collect(),
        ),
        Object::Dictionary(mut dict) => {
            for (_, value) in dict.iter_mut() {
                let taken = std::mem::replace(value, Object::Null);
                *value = remap_object_refs(taken, offset);
            }
            Object::Dictionary(dict)
        }
        Object::Stream(mut stream) => {
            for (_, value) in stream.dict.iter_mut() {
                let taken = std::mem::replace(value, Object::Null);
                *value = remap_object_refs(taken, offset);
            }
            Object::Stream(stream)
        }
        other => other,
    }
}

/// Locate the root Pages node through the trailer's catalog
pub(crate) fn pages_root(doc: &Document) -> Result<ObjectId, PdfError> {
    let catalog_id = doc
        .trailer
        .get(b"Root")
        .and_then(Object::as_reference)
        .map_err(|_| PdfError::Operation("No Root in trailer".into()))?;

    doc.get_object(catalog_id)
        .and_then(Object::as_dict)
        .and_then(|catalog| catalog.get(b"Pages"))
        .and_then(Object::as_reference)
        .map_err(|_| PdfError::Operation("Catalog has no Pages reference".into()))
}

/// Point the root page tree at `page_refs`
fn update_page_tree(
    doc: &mut Document,
    pages_id: ObjectId,
    page_refs: &[ObjectId],
) -> Result<(), PdfError> {
    match doc.objects.get_mut(&pages_id) {
        Some(Object::Dictionary(pages_dict)) => {
            let kids = page_refs
                .iter()
                .map(|&id| Object::Reference(id))
                .collect::<Vec<_>>();
            pages_dict.set("Kids", Object::Array(kids));
            pages_dict.set("Count", Object::Integer(page_refs.len() as i64));
            Ok(())
        }
        _ => Err(PdfError::Operation("Invalid pages dictionary".into())),
    }
}
