//! OCR service
//!
//! Text recognition is delegated to an [`OcrEngine`] (Tesseract in
//! production). On top of the engine, [`OcrService`] runs the language
//! retry loop: candidate languages are tried in order, the most confident
//! pass wins, and the loop stops as soon as a pass is good enough.

pub mod pdf;
pub mod tesseract;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

pub use pdf::{PageRasterizer, Pdftoppm};
pub use tesseract::TesseractEngine;

/// Errors from OCR engines
#[derive(Debug, Error)]
pub enum OcrError {
    #[error("OCR engine not available: {0}")]
    NotAvailable(String),

    #[error("OCR failed: {0}")]
    Failed(String),

    #[error("Unsupported file type for OCR: {0}")]
    UnsupportedFormat(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One engine run with one language
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OcrPass {
    pub text: String,
    /// Mean word confidence, 0-100
    pub confidence: f32,
    pub language: String,
    pub word_count: usize,
}

/// Trait for OCR engines
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Recognize the text of one image file
    async fn recognize(&self, image_path: &Path, language: &str) -> Result<OcrPass, OcrError>;

    async fn is_available(&self) -> bool;

    fn name(&self) -> &'static str;
}

/// How the language retry loop behaves
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Default candidates when the caller names none
    pub languages: Vec<String>,
    /// A pass at or above this confidence ends the loop
    pub confidence_threshold: f32,
    pub max_attempts: usize,
}

/// Outcome of one candidate in the retry loop
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Attempt {
    pub language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Winner of the retry loop
#[derive(Debug, Clone, Serialize)]
pub struct BestPass {
    pub pass: OcrPass,
    pub attempts: Vec<Attempt>,
    pub threshold_met: bool,
}

/// Where the returned text came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TextSource {
    /// The PDF's own text layer
    Embedded,
    /// Recognized by the OCR engine
    Ocr,
}

/// OCR result for a whole upload
#[derive(Debug, Clone, Serialize)]
pub struct DocumentOcr {
    pub text: String,
    pub confidence: f32,
    pub language: Option<String>,
    pub source: TextSource,
    /// Pages run through the engine (0 for embedded text)
    pub pages_processed: u32,
    pub total_pages: u32,
    pub attempts: Vec<Attempt>,
    pub threshold_met: bool,
}

/// Upload types accepted for OCR, detected from magic bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Pdf,
    Png,
    Jpeg,
    Tiff,
    Bmp,
    Webp,
}

impl InputKind {
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(b"%PDF-") {
            Some(Self::Pdf)
        } else if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
            Some(Self::Png)
        } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(Self::Jpeg)
        } else if bytes.starts_with(b"II*\0") || bytes.starts_with(b"MM\0*") {
            Some(Self::Tiff)
        } else if bytes.starts_with(b"BM") {
            Some(Self::Bmp)
        } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
            Some(Self::Webp)
        } else {
            None
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Tiff => "tif",
            Self::Bmp => "bmp",
            Self::Webp => "webp",
        }
    }
}

/// OCR engine plus the retry policy
#[derive(Clone)]
pub struct OcrService {
    engine: Arc<dyn OcrEngine>,
    rasterizer: Arc<dyn PageRasterizer>,
    policy: RetryPolicy,
}

impl OcrService {
    /// Service rendering PDF pages with `pdftoppm`
    pub fn new(engine: Arc<dyn OcrEngine>, policy: RetryPolicy) -> Self {
        Self {
            engine,
            rasterizer: Arc::new(Pdftoppm),
            policy,
        }
    }

    pub fn with_rasterizer(mut self, rasterizer: Arc<dyn PageRasterizer>) -> Self {
        self.rasterizer = rasterizer;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn is_available(&self) -> bool {
        self.engine.is_available().await
    }

    /// Candidate languages: the caller's if any, else the configured list,
    /// deduplicated and capped at `max_attempts`
    pub fn candidates(&self, requested: &[String]) -> Vec<String> {
        let source = if requested.iter().any(|l| !l.trim().is_empty()) {
            requested
        } else {
            &self.policy.languages
        };

        let mut candidates: Vec<String> = Vec::new();
        for language in source.iter().map(|l| l.trim()).filter(|l| !l.is_empty()) {
            if !candidates.iter().any(|c| c == language) {
                candidates.push(language.to_string());
            }
        }
        candidates.truncate(self.policy.max_attempts.max(1));
        candidates
    }

    /// Run the language retry loop on one image
    pub async fn recognize_best(
        &self,
        image_path: &Path,
        requested: &[String],
    ) -> Result<BestPass, OcrError> {
        let candidates = self.candidates(requested);
        let mut attempts = Vec::with_capacity(candidates.len());
        let mut best: Option<OcrPass> = None;
        let mut last_error = None;

        for language in candidates {
            match self.engine.recognize(image_path, &language).await {
                Ok(pass) => {
                    tracing::debug!(
                        "OCR pass: language={} confidence={:.1} words={}",
                        pass.language,
                        pass.confidence,
                        pass.word_count
                    );
                    attempts.push(Attempt {
                        language,
                        confidence: Some(pass.confidence),
                        error: None,
                    });

                    let good_enough = pass.confidence >= self.policy.confidence_threshold;
                    if best.as_ref().map_or(true, |b| pass.confidence > b.confidence) {
                        best = Some(pass);
                    }
                    if good_enough {
                        break;
                    }
                }
                Err(OcrError::NotAvailable(msg)) => return Err(OcrError::NotAvailable(msg)),
                Err(e) => {
                    tracing::warn!("OCR attempt with {} failed: {}", language, e);
                    attempts.push(Attempt {
                        language,
                        confidence: None,
                        error: Some(e.to_string()),
                    });
                    last_error = Some(e);
                }
            }
        }

        match best {
            Some(pass) => Ok(BestPass {
                threshold_met: pass.confidence >= self.policy.confidence_threshold,
                pass,
                attempts,
            }),
            None => Err(last_error
                .unwrap_or_else(|| OcrError::Failed("No OCR languages to try".to_string()))),
        }
    }

    /// OCR a single uploaded image
    pub async fn recognize_image(
        &self,
        bytes: &[u8],
        kind: InputKind,
        requested: &[String],
    ) -> Result<DocumentOcr, OcrError> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join(format!("upload.{}", kind.extension()));
        tokio::fs::write(&path, bytes).await?;

        let best = self.recognize_best(&path, requested).await?;

        Ok(DocumentOcr {
            text: best.pass.text,
            confidence: best.pass.confidence,
            language: Some(best.pass.language),
            source: TextSource::Ocr,
            pages_processed: 1,
            total_pages: 1,
            attempts: best.attempts,
            threshold_met: best.threshold_met,
        })
    }

    /// OCR a PDF of `total_pages` pages: use its text layer when usable,
    /// otherwise rasterize up to `max_pages` pages. The language that wins
    /// on the first page is reused for the rest.
    pub async fn recognize_pdf(
        &self,
        bytes: Arc<Vec<u8>>,
        total_pages: u32,
        requested: &[String],
        max_pages: u32,
    ) -> Result<DocumentOcr, OcrError> {
        if let Some(text) = embedded_text(bytes.clone()).await {
            if pdf::embedded_text_is_usable(&text, total_pages) {
                tracing::debug!("Using embedded text layer ({} pages)", total_pages);
                return Ok(DocumentOcr {
                    text: text.trim().to_string(),
                    confidence: 100.0,
                    language: None,
                    source: TextSource::Embedded,
                    pages_processed: 0,
                    total_pages,
                    attempts: Vec::new(),
                    threshold_met: true,
                });
            }
        }

        let pages = total_pages.min(max_pages);
        if pages == 0 {
            return Err(OcrError::Failed("PDF has no pages".to_string()));
        }

        let dir = tempfile::tempdir()?;
        let pdf_path = dir.path().join("upload.pdf");
        tokio::fs::write(&pdf_path, bytes.as_slice()).await?;
        let images_dir = dir.path().join("pages");
        tokio::fs::create_dir_all(&images_dir).await?;

        let images = self
            .rasterizer
            .rasterize(&pdf_path, 1, pages, &images_dir)
            .await?;
        let Some((first, rest)) = images.split_first() else {
            return Err(OcrError::Failed("No pages rendered".to_string()));
        };

        let best = self.recognize_best(first, requested).await?;
        let language = best.pass.language.clone();

        let mut texts = vec![best.pass.text];
        let mut confidences = vec![best.pass.confidence];
        for image in rest {
            let pass = self.engine.recognize(image, &language).await?;
            texts.push(pass.text);
            confidences.push(pass.confidence);
        }

        let confidence = confidences.iter().sum::<f32>() / confidences.len() as f32;

        Ok(DocumentOcr {
            text: texts.join("\n\n").trim().to_string(),
            confidence,
            language: Some(language),
            source: TextSource::Ocr,
            pages_processed: pages,
            total_pages,
            attempts: best.attempts,
            threshold_met: confidence >= self.policy.confidence_threshold,
        })
    }
}

/// Text layer of a PDF, extracted on the blocking pool. Extraction errors
/// and panics both mean the document has to be OCR'd.
async fn embedded_text(bytes: Arc<Vec<u8>>) -> Option<String> {
    match tokio::task::spawn_blocking(move || pdfdesk_core::pdf_to_text(&bytes)).await {
        Ok(Ok(text)) => Some(text),
        Ok(Err(e)) => {
            tracing::debug!("No usable text layer: {}", e);
            None
        }
        Err(e) => {
            tracing::warn!("Text extraction panicked: {}", e);
            None
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{scanned_pdf, PlaceholderPages, ScriptedEngine};
    use super::*;

    fn service(engine: Arc<ScriptedEngine>, threshold: f32, max_attempts: usize) -> OcrService {
        OcrService::new(
            engine,
            RetryPolicy {
                languages: ["eng", "spa", "fra", "deu"].map(String::from).to_vec(),
                confidence_threshold: threshold,
                max_attempts,
            },
        )
    }

    fn langs(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_stops_at_first_confident_pass() {
        let engine = Arc::new(ScriptedEngine::new(&[("eng", 91.0), ("spa", 99.0)]));
        let best = service(engine.clone(), 80.0, 4)
            .recognize_best(Path::new("x.png"), &[])
            .await
            .unwrap();

        assert_eq!(best.pass.language, "eng");
        assert!(best.threshold_met);
        assert_eq!(engine.calls(), langs(&["eng"]));
    }

    #[tokio::test]
    async fn test_keeps_best_when_threshold_never_met() {
        let engine = Arc::new(ScriptedEngine::new(&[
            ("eng", 40.0),
            ("spa", 72.5),
            ("fra", 55.0),
            ("deu", 60.0),
        ]));
        let best = service(engine.clone(), 80.0, 4)
            .recognize_best(Path::new("x.png"), &[])
            .await
            .unwrap();

        assert_eq!(best.pass.language, "spa");
        assert!(!best.threshold_met);
        assert_eq!(best.attempts.len(), 4);
    }

    #[tokio::test]
    async fn test_respects_max_attempts() {
        let engine = Arc::new(ScriptedEngine::new(&[
            ("eng", 10.0),
            ("spa", 20.0),
            ("fra", 95.0),
        ]));
        let best = service(engine.clone(), 80.0, 2)
            .recognize_best(Path::new("x.png"), &[])
            .await
            .unwrap();

        assert_eq!(engine.calls(), langs(&["eng", "spa"]));
        assert_eq!(best.pass.language, "spa");
    }

    #[tokio::test]
    async fn test_failed_attempts_are_skipped() {
        let engine = Arc::new(ScriptedEngine::new(&[("fra", 85.0)]));
        let best = service(engine, 80.0, 4)
            .recognize_best(Path::new("x.png"), &[])
            .await
            .unwrap();

        assert_eq!(best.pass.language, "fra");
        assert!(best.attempts[0].error.is_some());
        assert_eq!(best.attempts.len(), 3);
    }

    #[tokio::test]
    async fn test_all_attempts_failing_returns_last_error() {
        let engine = Arc::new(ScriptedEngine::new(&[]));
        let err = service(engine, 80.0, 4)
            .recognize_best(Path::new("x.png"), &[])
            .await
            .unwrap_err();

        assert!(err.to_string().contains("deu"));
    }

    #[tokio::test]
    async fn test_requested_languages_override_defaults() {
        let engine = Arc::new(ScriptedEngine::new(&[("jpn", 50.0), ("chi_sim", 60.0)]));
        let svc = service(engine.clone(), 80.0, 4);

        assert_eq!(svc.candidates(&langs(&["jpn", " ", "jpn", "chi_sim"])), langs(&["jpn", "chi_sim"]));

        let best = svc
            .recognize_best(Path::new("x.png"), &langs(&["jpn", "chi_sim"]))
            .await
            .unwrap();
        assert_eq!(best.pass.language, "chi_sim");
    }

    #[tokio::test]
    async fn test_recognize_image_writes_temp_file() {
        let engine = Arc::new(ScriptedEngine::new(&[("eng", 88.0)]));
        let result = service(engine, 80.0, 4)
            .recognize_image(b"\x89PNG fake", InputKind::Png, &[])
            .await
            .unwrap();

        assert_eq!(result.source, TextSource::Ocr);
        assert_eq!(result.language.as_deref(), Some("eng"));
        assert_eq!(result.pages_processed, 1);
    }

    #[tokio::test]
    async fn test_pdf_reuses_first_page_language() {
        let engine = Arc::new(
            ScriptedEngine::new(&[("eng", 40.0), ("spa", 90.0)])
                .with_page("page-2.png", 70.0)
                .with_page("page-3.png", 80.0),
        );
        let pages = Arc::new(PlaceholderPages::default());
        let svc = service(engine.clone(), 80.0, 4).with_rasterizer(pages.clone());

        let result = svc
            .recognize_pdf(Arc::new(scanned_pdf(3)), 3, &[], 10)
            .await
            .unwrap();

        assert_eq!(engine.calls(), langs(&["eng", "spa", "spa", "spa"]));
        assert_eq!(result.source, TextSource::Ocr);
        assert_eq!(result.language.as_deref(), Some("spa"));
        assert_eq!(result.pages_processed, 3);
        assert!((result.confidence - 80.0).abs() < f32::EPSILON);
        assert!(result.threshold_met);
        assert_eq!(result.attempts.len(), 2);
        assert_eq!(result.text.matches("text in spa").count(), 3);
    }

    #[tokio::test]
    async fn test_pdf_pages_are_capped() {
        let engine = Arc::new(ScriptedEngine::new(&[("eng", 95.0)]));
        let pages = Arc::new(PlaceholderPages::default());
        let svc = service(engine.clone(), 80.0, 4).with_rasterizer(pages.clone());

        let result = svc
            .recognize_pdf(Arc::new(scanned_pdf(5)), 5, &[], 2)
            .await
            .unwrap();

        assert_eq!(pages.calls(), vec![(1, 2)]);
        assert_eq!(result.pages_processed, 2);
        assert_eq!(result.total_pages, 5);
        assert_eq!(engine.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_pdf_with_text_layer_skips_engine() {
        let engine = Arc::new(ScriptedEngine::new(&[("eng", 95.0)]));
        let pages = Arc::new(PlaceholderPages::default());
        let svc = service(engine.clone(), 80.0, 4).with_rasterizer(pages.clone());

        let text = "The quarterly report covers revenue, costs and hiring plans. ".repeat(4);
        let pdf = pdfdesk_core::text_to_pdf(&text, pdfdesk_core::TextLayout::default()).unwrap();
        let total = pdfdesk_core::page_count(&pdf).unwrap();

        let result = svc.recognize_pdf(Arc::new(pdf), total, &[], 3).await.unwrap();

        assert_eq!(result.source, TextSource::Embedded);
        assert_eq!(result.confidence, 100.0);
        assert_eq!(result.pages_processed, 0);
        assert!(result.text.contains("quarterly"));
        assert!(engine.calls().is_empty());
        assert!(pages.calls().is_empty());
    }

    #[test]
    fn test_sniff_input_kind() {
        assert_eq!(InputKind::sniff(b"%PDF-1.7"), Some(InputKind::Pdf));
        assert_eq!(InputKind::sniff(&[0x89, b'P', b'N', b'G', 0x0D]), Some(InputKind::Png));
        assert_eq!(InputKind::sniff(&[0xFF, 0xD8, 0xFF, 0xE0]), Some(InputKind::Jpeg));
        assert_eq!(InputKind::sniff(b"II*\0rest"), Some(InputKind::Tiff));
        assert_eq!(InputKind::sniff(b"RIFF\0\0\0\0WEBPVP8 "), Some(InputKind::Webp));
        assert_eq!(InputKind::sniff(b"hello"), None);
    }
}
