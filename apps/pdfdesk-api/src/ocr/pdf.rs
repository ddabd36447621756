//! PDF page rasterization for OCR

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;

use super::OcrError;

/// Renders PDF pages to images the OCR engine can read
#[async_trait]
pub trait PageRasterizer: Send + Sync {
    /// Render pages `first..=last` into `output_dir`, in page order
    async fn rasterize(
        &self,
        pdf_path: &Path,
        first: u32,
        last: u32,
        output_dir: &Path,
    ) -> Result<Vec<PathBuf>, OcrError>;
}

/// Rasterizer backed by poppler's `pdftoppm`
#[derive(Debug, Clone, Copy, Default)]
pub struct Pdftoppm;

#[async_trait]
impl PageRasterizer for Pdftoppm {
    async fn rasterize(
        &self,
        pdf_path: &Path,
        first: u32,
        last: u32,
        output_dir: &Path,
    ) -> Result<Vec<PathBuf>, OcrError> {
        rasterize_pages(pdf_path, first, last, output_dir).await
    }
}

const PDFTOPPM_NOT_FOUND: &str = "pdftoppm not found (install poppler-utils)";

/// Pages whose text layer averages fewer non-whitespace characters than this
/// are treated as scanned
pub const MIN_EMBEDDED_CHARS_PER_PAGE: usize = 32;

/// Whether an extracted text layer is rich enough to skip OCR
pub fn embedded_text_is_usable(text: &str, page_count: u32) -> bool {
    if page_count == 0 {
        return false;
    }
    let chars = text.chars().filter(|c| !c.is_whitespace()).count();
    chars / page_count as usize >= MIN_EMBEDDED_CHARS_PER_PAGE
}

/// Render pages `first..=last` at 300 DPI into `output_dir`, returning the
/// image paths in page order
pub async fn rasterize_pages(
    pdf_path: &Path,
    first: u32,
    last: u32,
    output_dir: &Path,
) -> Result<Vec<PathBuf>, OcrError> {
    let output_prefix = output_dir.join("page");

    let output = Command::new("pdftoppm")
        .args(["-png", "-r", "300"])
        .args(["-f", &first.to_string(), "-l", &last.to_string()])
        .arg(pdf_path)
        .arg(&output_prefix)
        .output()
        .await;

    match output {
        Ok(o) if o.status.success() => {}
        Ok(o) => {
            return Err(OcrError::Failed(format!(
                "pdftoppm failed to convert PDF pages: {}",
                String::from_utf8_lossy(&o.stderr).trim()
            )))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(OcrError::NotAvailable(PDFTOPPM_NOT_FOUND.to_string()))
        }
        Err(e) => return Err(OcrError::Io(e)),
    }

    (first..=last)
        .map(|page| {
            find_page_image(output_dir, page)
                .ok_or_else(|| OcrError::Failed(format!("No image generated for page {}", page)))
        })
        .collect()
}

/// Find the image file for a specific page number.
///
/// pdftoppm pads page numbers to the width of the document's page count:
/// page-1.png, page-01.png, page-001.png...
pub fn find_page_image(dir: &Path, page_num: u32) -> Option<PathBuf> {
    (1..=5)
        .map(|digits| dir.join(format!("page-{:0width$}.png", page_num, width = digits)))
        .find(|path| path.exists())
}
