//! PDF Split
//!
//! Extracts pages from a PDF by deleting everything else and pruning the
//! objects that are no longer reachable.

use crate::error::PdfError;
use crate::inspect::load;
use crate::ranges::{validate_groups, validate_pages};
use lopdf::Document;
use std::collections::HashSet;

/// Keep only the specified pages (1-indexed)
pub fn split_document(bytes: &[u8], pages: Vec<u32>) -> Result<Vec<u8>, PdfError> {
    let doc = load(bytes)?;
    extract_pages(&doc, &pages)
}

/// Produce one document per inclusive `(start, end)` range group.
/// All groups are checked against the page count before any page is copied.
pub fn split_by_ranges(bytes: &[u8], groups: &[(u32, u32)]) -> Result<Vec<Vec<u8>>, PdfError> {
    let doc = load(bytes)?;
    validate_groups(groups, doc.get_pages().len() as u32)?;

    groups
        .iter()
        .map(|&(start, end)| {
            let pages: Vec<u32> = (start..=end).collect();
            extract_pages(&doc, &pages)
        })
        .collect()
}

/// Produce one single-page document per page
pub fn split_every_page(bytes: &[u8]) -> Result<Vec<Vec<u8>>, PdfError> {
    let doc = load(bytes)?;
    let page_count = doc.get_pages().len() as u32;

    (1..=page_count)
        .map(|page| extract_pages(&doc, &[page]))
        .collect()
}

fn extract_pages(doc: &Document, pages: &[u32]) -> Result<Vec<u8>, PdfError> {
    let page_count = doc.get_pages().len() as u32;
    validate_pages(pages, page_count)?;

    let mut new_doc = doc.clone();

    let pages_to_keep: HashSet<u32> = pages.iter().copied().collect();
    let pages_to_delete: Vec<u32> = (1..=page_count)
        .filter(|p| !pages_to_keep.contains(p))
        .collect();

    if !pages_to_delete.is_empty() {
        new_doc.delete_pages(&pages_to_delete);
    }

    new_doc.prune_objects();
    new_doc.compress();

    let mut buffer = Vec::new();
    new_doc
        .save_to(&mut buffer)
        .map_err(|e| PdfError::Operation(format!("Save failed: {}", e)))?;

    Ok(buffer)
}
