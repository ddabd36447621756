//! Document inspection: page count, version and Info dictionary fields

use lopdf::{Document, Object};
use serde::{Deserialize, Serialize};

use crate::error::PdfError;

/// Summary of a PDF document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PdfInfo {
    pub page_count: u32,
    pub version: String,
    pub encrypted: bool,
    pub title: Option<String>,
    pub author: Option<String>,
    pub producer: Option<String>,
    pub size_bytes: usize,
}

pub(crate) fn load(bytes: &[u8]) -> Result<Document, PdfError> {
    Document::load_mem(bytes).map_err(|e| PdfError::Parse(e.to_string()))
}

/// Parse PDF bytes and return page count
pub fn page_count(bytes: &[u8]) -> Result<u32, PdfError> {
    Ok(load(bytes)?.get_pages().len() as u32)
}

/// Parse PDF bytes and describe the document
pub fn inspect(bytes: &[u8]) -> Result<PdfInfo, PdfError> {
    let doc = load(bytes)?;

    let info = doc
        .trailer
        .get(b"Info")
        .ok()
        .and_then(|obj| match obj {
            Object::Reference(id) => doc.get_object(*id).ok(),
            other => Some(other),
        })
        .and_then(|obj| obj.as_dict().ok());

    let field = |key: &[u8]| -> Option<String> {
        info.and_then(|dict| dict.get(key).ok())
            .and_then(|obj| match obj {
                Object::String(bytes, _) => Some(decode_text_string(bytes)),
                _ => None,
            })
            .filter(|s| !s.trim().is_empty())
    };

    Ok(PdfInfo {
        page_count: doc.get_pages().len() as u32,
        version: doc.version.clone(),
        encrypted: doc.trailer.get(b"Encrypt").is_ok(),
        title: field(b"Title"),
        author: field(b"Author"),
        producer: field(b"Producer"),
        size_bytes: bytes.len(),
    })
}

/// Decode a PDF text string (UTF-16BE with BOM, otherwise PDFDocEncoding
/// approximated as Latin-1)
pub fn decode_text_string(bytes: &[u8]) -> String {
    if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
        let units: Vec<u16> = bytes[2..]
            .chunks(2)
            .filter(|c| c.len() == 2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }

    bytes.iter().map(|&b| b as char).collect()
}
