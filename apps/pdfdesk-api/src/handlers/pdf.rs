//! PDF tool endpoints: merge, split, compress, convert and info

use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use axum::{extract::multipart::Multipart, extract::State, Json};
use pdfdesk_core::{
    compress_document, images_to_pdf, inspect, merge_documents, page_count, parse_range_groups,
    parse_ranges, pdf_to_text, split_by_ranges, split_document, split_every_page, text_to_pdf,
    CompressionLevel, ConvertTarget, ImageInput, OperationMetrics, PdfError, PdfInfo, TextLayout,
};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info};

use super::{
    discard_outputs, metered, read_form, run_blocking, store_output, Output, Upload,
    PDF_CONTENT_TYPE, TEXT_CONTENT_TYPE,
};
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::models::{DbDocument, DocumentResponse, Operation};
use crate::plans::Feature;
use crate::state::AppState;

/// Response for operations producing one document
#[derive(Serialize)]
pub struct DocumentOperationResponse {
    pub success: bool,
    pub document: DocumentResponse,
    pub metrics: OperationMetrics,
}

/// Handler: POST /api/pdf/merge
pub async fn handle_merge(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    multipart: Multipart,
) -> Result<Json<DocumentOperationResponse>, ApiError> {
    let form = read_form(multipart, user.plan).await?;
    info!("Merge request: user={} files={}", user.id, form.files.len());

    if form.files.len() < 2 {
        return Err(ApiError::InvalidRequest(
            "Merging needs at least two PDF files".to_string(),
        ));
    }
    let max_files = user.plan.limits().max_files_per_merge as usize;
    if form.files.len() > max_files {
        return Err(ApiError::Forbidden(format!(
            "The {} plan merges at most {} files at once",
            user.plan, max_files
        )));
    }

    let file_name = format!("{}_merged.pdf", form.files[0].stem());
    let sources: Vec<String> = form.files.iter().map(|f| f.file_name.clone()).collect();
    let input_size: usize = form.files.iter().map(|f| f.data.len()).sum();
    let documents: Vec<Vec<u8>> = form.files.into_iter().map(|f| f.data).collect();

    metered(&state, &user, Feature::PdfOperation, 1, |_| 1, async {
        let started = Instant::now();
        let (merged, pages) = run_blocking(move || {
            let merged = merge_documents(documents)?;
            let pages = page_count(&merged)?;
            Ok((merged, pages))
        })
        .await?;
        let metrics = OperationMetrics::measure(started, input_size, &merged, pages);
        debug!("Merged {} files into {} pages", sources.len(), pages);

        let doc = store_output(
            &state,
            &user,
            Operation::Merge,
            Output {
                file_name,
                content_type: PDF_CONTENT_TYPE,
                data: merged,
                page_count: Some(pages),
                metadata: json!({ "sources": sources, "processing_time_ms": metrics.processing_time_ms }),
            },
        )
        .await?;

        Ok::<_, ApiError>(Json(DocumentOperationResponse {
            success: true,
            document: doc.into(),
            metrics,
        }))
    })
    .await
}

/// How a split request divides the document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SplitMode {
    /// One document with the selected pages
    #[default]
    Extract,
    /// One document per comma-separated range
    Ranges,
    /// One document per page
    EveryPage,
}

impl FromStr for SplitMode {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "extract" => Ok(SplitMode::Extract),
            "ranges" => Ok(SplitMode::Ranges),
            "every_page" | "every-page" => Ok(SplitMode::EveryPage),
            other => Err(ApiError::InvalidRequest(format!(
                "Unknown split mode '{}'. Use extract, ranges or every_page",
                other
            ))),
        }
    }
}

#[derive(Serialize)]
pub struct SplitResponse {
    pub success: bool,
    pub mode: &'static str,
    pub documents: Vec<DocumentResponse>,
    pub count: usize,
}

/// Handler: POST /api/pdf/split
pub async fn handle_split(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    multipart: Multipart,
) -> Result<Json<SplitResponse>, ApiError> {
    let form = read_form(multipart, user.plan).await?;
    let mode: SplitMode = form.field("mode").unwrap_or_default().parse()?;
    let ranges = form.field("ranges").map(str::to_string);
    let (upload, _) = form.single_file()?;
    info!(
        "Split request: user={} file={} mode={:?} ranges={:?}",
        user.id, upload.file_name, mode, ranges
    );

    if mode != SplitMode::EveryPage && ranges.is_none() {
        return Err(ApiError::InvalidRequest(
            "'ranges' is required for this split mode".to_string(),
        ));
    }

    let stem = upload.stem().to_string();
    let ranges_text = ranges.unwrap_or_default();
    let source = upload.file_name;
    let data = upload.data;

    metered(&state, &user, Feature::PdfOperation, 1, |_| 1, async {
        let parts: Vec<(String, Vec<u8>)> = match mode {
            SplitMode::Extract => {
                let label = ranges_text.replace([',', ' '], "_");
                let ranges_text = ranges_text.clone();
                let extracted = run_blocking(move || {
                    let pages = parse_ranges(&ranges_text, page_count(&data)?)?;
                    split_document(&data, pages)
                })
                .await?;
                vec![(format!("{}_pages_{}.pdf", stem, label), extracted)]
            }
            SplitMode::Ranges => {
                let ranges_text = ranges_text.clone();
                let outputs = run_blocking(move || {
                    let groups = parse_range_groups(&ranges_text)?;
                    split_by_ranges(&data, &groups)
                })
                .await?;
                outputs
                    .into_iter()
                    .enumerate()
                    .map(|(i, bytes)| (format!("{}_part_{}.pdf", stem, i + 1), bytes))
                    .collect()
            }
            SplitMode::EveryPage => run_blocking(move || split_every_page(&data))
                .await?
                .into_iter()
                .enumerate()
                .map(|(i, bytes)| (format!("{}_page_{}.pdf", stem, i + 1), bytes))
                .collect(),
        };

        let mut documents: Vec<DbDocument> = Vec::with_capacity(parts.len());
        for (index, (file_name, bytes)) in parts.into_iter().enumerate() {
            let pages = page_count(&bytes).ok();
            let stored = store_output(
                &state,
                &user,
                Operation::Split,
                Output {
                    file_name,
                    content_type: PDF_CONTENT_TYPE,
                    data: bytes,
                    page_count: pages,
                    metadata: json!({
                        "source": source,
                        "ranges": ranges_text,
                        "part": index + 1,
                    }),
                },
            )
            .await;

            match stored {
                Ok(doc) => documents.push(doc),
                Err(e) => {
                    // a split is all or nothing
                    discard_outputs(&state, &user, &documents).await;
                    return Err(e);
                }
            }
        }

        Ok::<_, ApiError>(Json(SplitResponse {
            success: true,
            mode: match mode {
                SplitMode::Extract => "extract",
                SplitMode::Ranges => "ranges",
                SplitMode::EveryPage => "every_page",
            },
            count: documents.len(),
            documents: documents.into_iter().map(DocumentResponse::from).collect(),
        }))
    })
    .await
}

#[derive(Serialize)]
pub struct CompressResponse {
    pub success: bool,
    pub document: DocumentResponse,
    pub level: CompressionLevel,
    pub original_size: usize,
    pub compressed_size: usize,
    pub ratio: f64,
    pub savings_percent: f64,
}

/// Handler: POST /api/pdf/compress
pub async fn handle_compress(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    multipart: Multipart,
) -> Result<Json<CompressResponse>, ApiError> {
    let form = read_form(multipart, user.plan).await?;
    let level: CompressionLevel = form.field("level").unwrap_or_default().parse()?;
    let (upload, _) = form.single_file()?;
    info!(
        "Compress request: user={} file={} level={:?}",
        user.id, upload.file_name, level
    );

    let file_name = format!("{}_compressed.pdf", upload.stem());
    let source = upload.file_name;
    let data = upload.data;

    metered(&state, &user, Feature::PdfOperation, 1, |_| 1, async {
        let (report, pages) = run_blocking(move || {
            let report = compress_document(&data, level)?;
            let pages = page_count(&report.data)?;
            Ok((report, pages))
        })
        .await?;

        let ratio = report.ratio();
        let savings_percent = report.savings_percent();
        debug!(
            "Compressed {} -> {} bytes ({:.1}% saved)",
            report.original_size, report.compressed_size, savings_percent
        );

        let doc = store_output(
            &state,
            &user,
            Operation::Compress,
            Output {
                file_name,
                content_type: PDF_CONTENT_TYPE,
                data: report.data,
                page_count: Some(pages),
                metadata: json!({
                    "source": source,
                    "level": level,
                    "original_size": report.original_size,
                    "compressed_size": report.compressed_size,
                    "ratio": ratio,
                    "savings_percent": savings_percent,
                }),
            },
        )
        .await?;

        Ok::<_, ApiError>(Json(CompressResponse {
            success: true,
            document: doc.into(),
            level,
            original_size: report.original_size,
            compressed_size: report.compressed_size,
            ratio,
            savings_percent,
        }))
    })
    .await
}

fn is_text_upload(upload: &Upload) -> bool {
    upload.extension().as_deref() == Some("txt")
        || upload
            .content_type
            .as_deref()
            .is_some_and(|ct| ct.starts_with("text/"))
}

/// Handler: POST /api/pdf/convert
pub async fn handle_convert(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    multipart: Multipart,
) -> Result<Json<DocumentOperationResponse>, ApiError> {
    let form = read_form(multipart, user.plan).await?;
    let target: ConvertTarget = form.field("target").unwrap_or("pdf").parse()?;
    info!(
        "Convert request: user={} files={} target={:?}",
        user.id,
        form.files.len(),
        target
    );

    if form.files.is_empty() {
        return Err(ApiError::InvalidRequest("No file uploaded".to_string()));
    }

    let input_size: usize = form.files.iter().map(|f| f.data.len()).sum();
    let first_stem = form.files[0].stem().to_string();
    let sources: Vec<String> = form.files.iter().map(|f| f.file_name.clone()).collect();
    let started = Instant::now();

    metered(&state, &user, Feature::PdfOperation, 1, |_| 1, async {
        let output = match target {
            ConvertTarget::Pdf if form.files.len() == 1 && is_text_upload(&form.files[0]) => {
                let (upload, _) = form.single_file()?;
                let text = String::from_utf8(upload.data).map_err(|_| {
                    ApiError::InvalidRequest("Text file is not valid UTF-8".to_string())
                })?;
                let (data, pages) = run_blocking(move || {
                    let data = text_to_pdf(&text, TextLayout::default())?;
                    let pages = page_count(&data)?;
                    Ok((data, pages))
                })
                .await?;
                Output {
                    file_name: format!("{}.pdf", first_stem),
                    content_type: PDF_CONTENT_TYPE,
                    data,
                    page_count: Some(pages),
                    metadata: json!({ "sources": sources, "from": "text", "to": "pdf" }),
                }
            }
            ConvertTarget::Pdf => {
                let images: Vec<ImageInput> = form
                    .files
                    .into_iter()
                    .map(|f| ImageInput {
                        name: f.file_name,
                        data: f.data,
                    })
                    .collect();
                let (data, pages) = run_blocking(move || {
                    let data = images_to_pdf(images)?;
                    let pages = page_count(&data)?;
                    Ok((data, pages))
                })
                .await?;
                Output {
                    file_name: format!("{}.pdf", first_stem),
                    content_type: PDF_CONTENT_TYPE,
                    data,
                    page_count: Some(pages),
                    metadata: json!({ "sources": sources, "from": "images", "to": "pdf" }),
                }
            }
            ConvertTarget::Text => {
                let (upload, _) = form.single_file()?;
                if !upload.data.starts_with(b"%PDF-") {
                    return Err(PdfError::UnsupportedInput(format!(
                        "'{}' is not a PDF",
                        upload.file_name
                    ))
                    .into());
                }
                let data = upload.data;
                let (text, pages) = run_blocking(move || {
                    let pages = page_count(&data)?;
                    let text = pdf_to_text(&data)?;
                    if text.trim().is_empty() {
                        return Err(PdfError::Empty(
                            "PDF has no text layer; run OCR instead".to_string(),
                        ));
                    }
                    Ok((text.trim().to_string(), pages))
                })
                .await?;
                Output {
                    file_name: format!("{}.txt", first_stem),
                    content_type: TEXT_CONTENT_TYPE,
                    data: text.into_bytes(),
                    page_count: Some(pages),
                    metadata: json!({ "sources": sources, "from": "pdf", "to": "text" }),
                }
            }
        };

        let metrics = OperationMetrics::measure(
            started,
            input_size,
            &output.data,
            output.page_count.unwrap_or(0),
        );

        let doc = store_output(&state, &user, Operation::Convert, output).await?;

        Ok::<_, ApiError>(Json(DocumentOperationResponse {
            success: true,
            document: doc.into(),
            metrics,
        }))
    })
    .await
}

#[derive(Serialize)]
pub struct InfoResponse {
    pub success: bool,
    pub info: PdfInfo,
}

/// Handler: POST /api/pdf/info
///
/// Read-only, so it is not counted against the plan.
pub async fn handle_info(
    user: AuthUser,
    multipart: Multipart,
) -> Result<Json<InfoResponse>, ApiError> {
    let (upload, _) = read_form(multipart, user.plan).await?.single_file()?;
    info!("Info request: user={} file={}", user.id, upload.file_name);

    let data = upload.data;
    let info = run_blocking(move || inspect(&data)).await?;

    Ok(Json(InfoResponse {
        success: true,
        info,
    }))
}
