//! PDF Compression
//!
//! Lossless size reduction: stream compression, dead object removal and,
//! at the highest level, metadata stripping.

use std::str::FromStr;

use lopdf::{Document, Object};
use serde::{Deserialize, Serialize};

use crate::error::PdfError;
use crate::inspect::load;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionLevel {
    /// Flate-compress streams only
    Low,
    /// Also prune unreferenced objects and empty streams
    #[default]
    Medium,
    /// Also strip metadata, thumbnails and application data
    High,
}

impl FromStr for CompressionLevel {
    type Err = PdfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" | "" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(PdfError::UnsupportedInput(format!(
                "Unknown compression level '{}'. Use low, medium or high",
                other
            ))),
        }
    }
}

/// Output of a compression run
#[derive(Debug, Clone)]
pub struct CompressionReport {
    pub data: Vec<u8>,
    pub original_size: usize,
    pub compressed_size: usize,
}

impl CompressionReport {
    /// compressed / original; 1.0 means no change
    pub fn ratio(&self) -> f64 {
        if self.original_size == 0 {
            return 1.0;
        }
        self.compressed_size as f64 / self.original_size as f64
    }

    pub fn savings_percent(&self) -> f64 {
        ((1.0 - self.ratio()) * 100.0).max(0.0)
    }
}

/// Compress a PDF. Never returns output larger than the input.
pub fn compress_document(
    bytes: &[u8],
    level: CompressionLevel,
) -> Result<CompressionReport, PdfError> {
    let mut doc = load(bytes)?;

    if level == CompressionLevel::High {
        strip_metadata(&mut doc);
    }

    if level != CompressionLevel::Low {
        doc.prune_objects();
        doc.delete_zero_length_streams();
        doc.renumber_objects();
    }

    doc.compress();

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer)
        .map_err(|e| PdfError::Operation(format!("Failed to save compressed PDF: {}", e)))?;

    let data = if buffer.len() < bytes.len() {
        buffer
    } else {
        bytes.to_vec()
    };

    Ok(CompressionReport {
        original_size: bytes.len(),
        compressed_size: data.len(),
        data,
    })
}

fn strip_metadata(doc: &mut Document) {
    doc.trailer.remove(b"Info");

    if let Ok(catalog_id) = doc.trailer.get(b"Root").and_then(Object::as_reference) {
        if let Ok(Object::Dictionary(catalog)) = doc.get_object_mut(catalog_id) {
            catalog.remove(b"Metadata");
            catalog.remove(b"PieceInfo");
        }
    }

    let page_ids: Vec<_> = doc.get_pages().values().copied().collect();
    for page_id in page_ids {
        if let Ok(Object::Dictionary(page)) = doc.get_object_mut(page_id) {
            page.remove(b"Thumb");
            page.remove(b"PieceInfo");
            page.remove(b"Metadata");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspect::inspect;
    use crate::test_support::{create_test_pdf, with_info};

    #[test]
    fn test_level_parsing() {
        assert_eq!("HIGH".parse::<CompressionLevel>().unwrap(), CompressionLevel::High);
        assert_eq!("".parse::<CompressionLevel>().unwrap(), CompressionLevel::Medium);
        assert!("extreme".parse::<CompressionLevel>().is_err());
    }

    #[test]
    fn test_compress_never_grows() {
        let pdf = create_test_pdf(3, "Compress");
        for level in [CompressionLevel::Low, CompressionLevel::Medium, CompressionLevel::High] {
            let report = compress_document(&pdf, level).unwrap();
            assert!(report.compressed_size <= report.original_size);
            assert_eq!(report.compressed_size, report.data.len());
            assert!(report.ratio() <= 1.0);
        }
    }

    #[test]
    fn test_compress_keeps_pages() {
        let pdf = create_test_pdf(6, "Compress");
        let report = compress_document(&pdf, CompressionLevel::Medium).unwrap();
        assert_eq!(inspect(&report.data).unwrap().page_count, 6);
    }

    #[test]
    fn test_high_strips_info() {
        // pad the document so the stripped version is guaranteed to be smaller
        let pdf = with_info(create_test_pdf(20, "Strip"), &"T".repeat(2048), "Author");
        let report = compress_document(&pdf, CompressionLevel::High).unwrap();

        let info = inspect(&report.data).unwrap();
        assert_eq!(info.title, None);
        assert_eq!(info.author, None);
    }

    #[test]
    fn test_report_math() {
        let report = CompressionReport {
            data: vec![],
            original_size: 200,
            compressed_size: 50,
        };
        assert!((report.ratio() - 0.25).abs() < f64::EPSILON);
        assert!((report.savings_percent() - 75.0).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(compress_document(b"%PDF-garbage", CompressionLevel::Low).is_err());
    }
}
