//! Tesseract OCR engine
//!
//! Runs the `tesseract` binary with TSV output so every word comes back with
//! its confidence and its block/paragraph/line position.

use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;

use super::{OcrEngine, OcrError, OcrPass};

/// Tesseract via command-line
pub struct TesseractEngine {
    binary: String,
}

impl TesseractEngine {
    pub fn new() -> Self {
        Self::with_binary("tesseract")
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for TesseractEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OcrEngine for TesseractEngine {
    async fn recognize(&self, image_path: &Path, language: &str) -> Result<OcrPass, OcrError> {
        let output = Command::new(&self.binary)
            .arg(image_path)
            .arg("stdout")
            .args(["-l", language])
            .arg("tsv")
            .output()
            .await;

        let output = match output {
            Ok(output) => output,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(OcrError::NotAvailable(
                    "tesseract not found (install tesseract-ocr)".to_string(),
                ));
            }
            Err(e) => return Err(OcrError::Io(e)),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrError::Failed(format!(
                "tesseract failed for language {}: {}",
                language,
                stderr.trim()
            )));
        }

        let tsv = String::from_utf8_lossy(&output.stdout);
        let parsed = parse_tsv(&tsv);

        Ok(OcrPass {
            text: parsed.text,
            confidence: parsed.confidence,
            language: language.to_string(),
            word_count: parsed.word_count,
        })
    }

    async fn is_available(&self) -> bool {
        Command::new(&self.binary)
            .arg("--version")
            .output()
            .await
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn name(&self) -> &'static str {
        "tesseract"
    }
}

/// Text and statistics recovered from Tesseract TSV output
#[derive(Debug, Clone, PartialEq)]
pub struct TsvText {
    pub text: String,
    /// Mean word confidence, 0-100
    pub confidence: f32,
    pub word_count: usize,
}

const WORD_LEVEL: &str = "5";

/// Parse `tesseract ... tsv` output.
///
/// Columns: level page_num block_num par_num line_num word_num left top
/// width height conf text. Only word rows (level 5) carry text; words with
/// confidence -1 or blank text are ignored.
pub fn parse_tsv(tsv: &str) -> TsvText {
    let mut text = String::new();
    let mut confidence_sum = 0.0f64;
    let mut word_count = 0usize;
    let mut last_position: Option<(&str, &str, &str, &str)> = None;

    for row in tsv.lines() {
        let columns: Vec<&str> = row.split('\t').collect();
        if columns.len() < 12 || columns[0] != WORD_LEVEL {
            continue;
        }

        let Ok(confidence) = columns[10].trim().parse::<f32>() else {
            continue;
        };
        let word = columns[11].trim();
        if confidence < 0.0 || word.is_empty() {
            continue;
        }

        let (page, block, paragraph, line) = (columns[1], columns[2], columns[3], columns[4]);
        if let Some((last_page, last_block, last_paragraph, last_line)) = last_position {
            if (last_page, last_block, last_paragraph) != (page, block, paragraph) {
                text.push_str("\n\n");
            } else if last_line != line {
                text.push('\n');
            } else {
                text.push(' ');
            }
        }
        last_position = Some((page, block, paragraph, line));

        text.push_str(word);
        confidence_sum += confidence.clamp(0.0, 100.0) as f64;
        word_count += 1;
    }

    let confidence = if word_count == 0 {
        0.0
    } else {
        (confidence_sum / word_count as f64) as f32
    };

    TsvText {
        text,
        confidence,
        word_count,
    }
}
