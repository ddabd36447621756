//! HTTP handlers for the pdfdesk API
//!
//! Shared pieces live here: multipart reading, storing operation output
//! and running CPU-bound PDF work off the async runtime.

pub mod ai;
pub mod billing;
pub mod documents;
pub mod ocr;
pub mod pdf;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use axum::{extract::multipart::Multipart, extract::State, Json};
use pdfdesk_core::PdfError;
use serde::Serialize;

use crate::auth::AuthUser;
use crate::db;
use crate::error::ApiError;
use crate::models::{DbDocument, NewDocument, Operation};
use crate::plans::{check_file_size, Feature, Plan, PlanLimits, UsageSummary};
use crate::state::AppState;
use crate::storage::object_key;

pub const PDF_CONTENT_TYPE: &str = "application/pdf";
pub const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
}

/// Handler: GET /health
pub async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "pdfdesk-api",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
pub struct PlanInfo {
    pub plan: Plan,
    pub limits: PlanLimits,
}

#[derive(Serialize)]
pub struct PlansResponse {
    pub success: bool,
    pub plans: Vec<PlanInfo>,
}

/// Handler: GET /api/plans
pub async fn handle_list_plans() -> Json<PlansResponse> {
    Json(PlansResponse {
        success: true,
        plans: Plan::ALL
            .into_iter()
            .map(|plan| PlanInfo {
                plan,
                limits: plan.limits(),
            })
            .collect(),
    })
}

#[derive(Serialize)]
pub struct UsageResponse {
    pub success: bool,
    #[serde(flatten)]
    pub summary: UsageSummary,
}

/// Handler: GET /api/usage
pub async fn handle_usage(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<UsageResponse>, ApiError> {
    tracing::info!("Usage request: user={} plan={}", user.id, user.plan);
    let summary = state.usage.summary(&user.id, user.plan).await?;
    Ok(Json(UsageResponse {
        success: true,
        summary,
    }))
}

// ============================================================
// Multipart
// ============================================================

/// One uploaded file
#[derive(Debug, Clone)]
pub struct Upload {
    pub field: String,
    pub file_name: String,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

impl Upload {
    /// File name without its extension
    pub fn stem(&self) -> &str {
        match self.file_name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => &self.file_name,
        }
    }

    pub fn extension(&self) -> Option<String> {
        self.file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
    }
}

/// A parsed multipart body: file parts in order plus text fields
#[derive(Debug, Default)]
pub struct UploadForm {
    pub files: Vec<Upload>,
    pub fields: HashMap<String, String>,
}

impl UploadForm {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// Exactly one file is expected
    pub fn single_file(mut self) -> Result<(Upload, HashMap<String, String>), ApiError> {
        match self.files.len() {
            0 => Err(ApiError::InvalidRequest("No file uploaded".to_string())),
            1 => Ok((self.files.remove(0), self.fields)),
            n => Err(ApiError::InvalidRequest(format!(
                "Expected one file, got {}",
                n
            ))),
        }
    }
}

/// Read every part, enforcing the plan's per-file size cap
pub async fn read_form(mut multipart: Multipart, plan: Plan) -> Result<UploadForm, ApiError> {
    let mut form = UploadForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::InvalidRequest(format!("Invalid multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);

        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::InvalidRequest(format!("Failed to read field '{}': {}", name, e)))?;

        match file_name {
            Some(file_name) => {
                check_file_size(plan, data.len())?;
                if data.is_empty() {
                    return Err(ApiError::InvalidRequest(format!("'{}' is empty", file_name)));
                }
                form.files.push(Upload {
                    field: name,
                    file_name,
                    content_type,
                    data: data.to_vec(),
                });
            }
            None => {
                let value = String::from_utf8(data.to_vec()).map_err(|_| {
                    ApiError::InvalidRequest(format!("Field '{}' is not valid UTF-8", name))
                })?;
                form.fields.insert(name, value);
            }
        }
    }

    Ok(form)
}

// ============================================================
// Output
// ============================================================

/// Output of an operation before it is stored
pub struct Output {
    pub file_name: String,
    pub content_type: &'static str,
    pub data: Vec<u8>,
    pub page_count: Option<u32>,
    pub metadata: serde_json::Value,
}

/// Upload the bytes and record the document row
pub async fn store_output(
    state: &AppState,
    user: &AuthUser,
    operation: Operation,
    output: Output,
) -> Result<DbDocument, ApiError> {
    let id = uuid::Uuid::new_v4().to_string();
    let storage_key = object_key(&user.id, &id, &output.file_name);
    let size_bytes = output.data.len();

    state
        .store
        .put(&storage_key, output.data, output.content_type)
        .await?;

    let new_doc = NewDocument {
        id,
        user_id: user.id.clone(),
        operation,
        file_name: output.file_name,
        content_type: output.content_type.to_string(),
        storage_key: storage_key.clone(),
        size_bytes,
        page_count: output.page_count,
        metadata: output.metadata,
    };

    match db::insert_document(&state.db, &new_doc).await {
        Ok(doc) => Ok(doc),
        Err(e) => {
            if let Err(cleanup) = state.store.delete(&storage_key).await {
                tracing::warn!("Failed to remove orphaned object {}: {}", storage_key, cleanup);
            }
            Err(e.into())
        }
    }
}

/// Remove stored outputs of an operation that failed part way
pub async fn discard_outputs(state: &AppState, user: &AuthUser, documents: &[DbDocument]) {
    for doc in documents {
        if let Err(e) = state.store.delete(&doc.storage_key).await {
            tracing::warn!("Failed to remove object {}: {}", doc.storage_key, e);
        }
        if let Err(e) = db::delete_document(&state.db, &user.id, &doc.id).await {
            tracing::warn!("Failed to remove document {}: {}", doc.id, e);
        }
    }
}

/// Hold `amount` of the caller's monthly allowance while `work` runs.
///
/// Failed work is refunded in full. Successful work keeps what `used`
/// reports, capped at the amount held.
pub async fn metered<T, Fut>(
    state: &AppState,
    user: &AuthUser,
    feature: Feature,
    amount: u32,
    used: impl FnOnce(&T) -> u32,
    work: Fut,
) -> Result<T, ApiError>
where
    Fut: Future<Output = Result<T, ApiError>>,
{
    let reservation = state
        .usage
        .reserve(&user.id, user.plan, feature, amount)
        .await?;

    let outcome = work.await;
    let kept = match &outcome {
        Ok(value) => used(value).min(reservation.amount()),
        Err(_) => 0,
    };

    if let Err(e) = state.usage.settle(reservation, kept).await {
        tracing::error!("Failed to settle {} usage for user={}: {}", feature, user.id, e);
    }

    outcome
}

/// Run CPU-bound PDF work on the blocking pool
pub async fn run_blocking<T, F>(work: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, PdfError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("PDF task panicked: {}", e)))?
        .map_err(ApiError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload(name: &str) -> Upload {
        Upload {
            field: "file".to_string(),
            file_name: name.to_string(),
            content_type: None,
            data: vec![1],
        }
    }

    #[test]
    fn test_upload_name_parts() {
        assert_eq!(upload("report.final.PDF").stem(), "report.final");
        assert_eq!(upload("report.final.PDF").extension().as_deref(), Some("pdf"));
        assert_eq!(upload("README").stem(), "README");
        assert_eq!(upload(".env").stem(), ".env");
    }

    #[test]
    fn test_single_file() {
        let form = UploadForm {
            files: vec![upload("a.pdf")],
            fields: HashMap::new(),
        };
        assert!(form.single_file().is_ok());

        let form = UploadForm::default();
        assert!(matches!(form.single_file(), Err(ApiError::InvalidRequest(_))));
    }
}
