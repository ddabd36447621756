//! OCR endpoint

use std::sync::Arc;

use axum::{extract::multipart::Multipart, extract::State, Json};
use serde::Serialize;
use serde_json::json;
use tracing::info;

use super::{metered, read_form, run_blocking, store_output, Output, TEXT_CONTENT_TYPE};
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::models::{DocumentResponse, Operation};
use crate::ocr::{Attempt, InputKind, OcrError, TextSource};
use crate::plans::Feature;
use crate::state::AppState;

#[derive(Serialize)]
pub struct OcrResponse {
    pub success: bool,
    pub text: String,
    pub confidence: f32,
    pub language: Option<String>,
    pub source: TextSource,
    pub pages_processed: u32,
    pub total_pages: u32,
    pub threshold_met: bool,
    pub attempts: Vec<Attempt>,
    pub document: DocumentResponse,
}

const MAX_LANGUAGE_LEN: usize = 64;

/// Split a `languages` field like `"eng, spa+fra"` on commas.
///
/// Names are handed to Tesseract as traineddata file names, so only ASCII
/// letters, digits, `_` and `+` are accepted.
pub fn parse_languages(field: Option<&str>) -> Result<Vec<String>, ApiError> {
    field
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|language| {
            if language.len() <= MAX_LANGUAGE_LEN
                && language
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '+')
            {
                Ok(language.to_string())
            } else {
                Err(ApiError::InvalidRequest(format!(
                    "Invalid OCR language '{}'",
                    language
                )))
            }
        })
        .collect()
}

/// Handler: POST /api/ocr
pub async fn handle_ocr(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    multipart: Multipart,
) -> Result<Json<OcrResponse>, ApiError> {
    let form = read_form(multipart, user.plan).await?;
    let languages = parse_languages(form.field("languages"))?;
    let (upload, _) = form.single_file()?;
    info!(
        "OCR request: user={} file={} languages={:?}",
        user.id, upload.file_name, languages
    );

    let kind = InputKind::sniff(&upload.data).ok_or_else(|| {
        OcrError::UnsupportedFormat(format!(
            "'{}' is not a PDF or a supported image",
            upload.file_name
        ))
    })?;

    let max_pages = user.plan.limits().ocr_max_pages;
    let stem = upload.stem().to_string();
    let source_file = upload.file_name;
    let data = Arc::new(upload.data);

    let (total_pages, reserved) = match kind {
        InputKind::Pdf => {
            let data = data.clone();
            let total = run_blocking(move || pdfdesk_core::page_count(&data)).await?;
            (total, total.min(max_pages))
        }
        _ => (1, 1),
    };

    metered(
        &state,
        &user,
        Feature::OcrPage,
        reserved,
        |response: &Json<OcrResponse>| response.pages_processed,
        async {
            let result = match kind {
                InputKind::Pdf => {
                    state
                        .ocr
                        .recognize_pdf(data.clone(), total_pages, &languages, max_pages)
                        .await?
                }
                image => state.ocr.recognize_image(&data, image, &languages).await?,
            };

            info!(
                "OCR done: user={} source={:?} language={:?} confidence={:.1} pages={}/{}",
                user.id,
                result.source,
                result.language,
                result.confidence,
                result.pages_processed,
                result.total_pages
            );

            let doc = store_output(
                &state,
                &user,
                Operation::Ocr,
                Output {
                    file_name: format!("{}_ocr.txt", stem),
                    content_type: TEXT_CONTENT_TYPE,
                    data: result.text.clone().into_bytes(),
                    page_count: Some(result.total_pages),
                    metadata: json!({
                        "source_file": source_file,
                        "source": result.source,
                        "confidence": result.confidence,
                        "language": result.language,
                        "pages_processed": result.pages_processed,
                        "total_pages": result.total_pages,
                        "threshold_met": result.threshold_met,
                        "attempts": result.attempts,
                    }),
                },
            )
            .await?;

            Ok::<_, ApiError>(Json(OcrResponse {
                success: true,
                text: result.text,
                confidence: result.confidence,
                language: result.language,
                source: result.source,
                pages_processed: result.pages_processed,
                total_pages: result.total_pages,
                threshold_met: result.threshold_met,
                attempts: result.attempts,
                document: doc.into(),
            }))
        },
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_languages() {
        assert_eq!(parse_languages(Some(" eng, spa ,,fra")).unwrap(), vec!["eng", "spa", "fra"]);
        assert_eq!(parse_languages(Some("eng+osd")).unwrap(), vec!["eng+osd"]);
        assert_eq!(parse_languages(Some("chi_sim")).unwrap(), vec!["chi_sim"]);
        assert!(parse_languages(None).unwrap().is_empty());
    }

    #[test]
    fn test_parse_languages_rejects_paths_and_flags() {
        for field in ["../../tmp/evil", "eng,/etc/x", "eng spa", "--psm", "eng;rm"] {
            assert!(
                matches!(parse_languages(Some(field)), Err(ApiError::InvalidRequest(_))),
                "{}",
                field
            );
        }
    }
}
