//! Document history: list, fetch, download and delete

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::auth::AuthUser;
use crate::db;
use crate::error::ApiError;
use crate::models::{DbDocument, DocumentResponse};
use crate::state::AppState;
use crate::storage::StorageError;

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Serialize)]
pub struct DocumentListResponse {
    pub success: bool,
    pub documents: Vec<DocumentResponse>,
    pub total: i64,
    pub limit: u32,
    pub offset: u32,
}

async fn find_document(state: &AppState, user: &AuthUser, id: &str) -> Result<DbDocument, ApiError> {
    db::get_document(&state.db, &user.id, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Document {} not found", id)))
}

/// Handler: GET /api/documents
pub async fn handle_list_documents(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<DocumentListResponse>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let offset = query.offset.unwrap_or(0);
    info!("List documents: user={} limit={} offset={}", user.id, limit, offset);

    let documents = db::list_documents(&state.db, &user.id, limit, offset).await?;
    let total = db::count_documents(&state.db, &user.id).await?;

    Ok(Json(DocumentListResponse {
        success: true,
        documents: documents.into_iter().map(DocumentResponse::from).collect(),
        total,
        limit,
        offset,
    }))
}

#[derive(Serialize)]
pub struct DocumentDetailResponse {
    pub success: bool,
    pub document: DocumentResponse,
}

/// Handler: GET /api/documents/:id
pub async fn handle_get_document(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<DocumentDetailResponse>, ApiError> {
    info!("Get document: user={} document={}", user.id, id);
    let doc = find_document(&state, &user, &id).await?;

    Ok(Json(DocumentDetailResponse {
        success: true,
        document: doc.into(),
    }))
}

/// `attachment; filename="..."` with quotes and control characters removed
fn content_disposition(file_name: &str) -> String {
    let safe: String = file_name
        .chars()
        .filter(|c| !c.is_control() && *c != '"' && *c != '\\')
        .collect();
    format!("attachment; filename=\"{}\"", safe)
}

/// Handler: GET /api/documents/:id/download
pub async fn handle_download_document(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    info!("Download document: user={} document={}", user.id, id);
    let doc = find_document(&state, &user, &id).await?;
    let bytes = state.store.get(&doc.storage_key).await?;

    Ok((
        [
            (header::CONTENT_TYPE, doc.content_type),
            (header::CONTENT_DISPOSITION, content_disposition(&doc.file_name)),
        ],
        bytes,
    )
        .into_response())
}

#[derive(Serialize)]
pub struct DeleteResponse {
    pub success: bool,
    pub id: String,
}

/// Handler: DELETE /api/documents/:id
pub async fn handle_delete_document(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, ApiError> {
    info!("Delete document: user={} document={}", user.id, id);
    let doc = find_document(&state, &user, &id).await?;

    match state.store.delete(&doc.storage_key).await {
        Ok(()) => {}
        Err(StorageError::NotFound(_)) => {
            warn!("Object {} already gone, removing row", doc.storage_key);
        }
        Err(e) => return Err(e.into()),
    }

    if !db::delete_document(&state.db, &user.id, &id).await? {
        return Err(ApiError::NotFound(format!("Document {} not found", id)));
    }

    Ok(Json(DeleteResponse { success: true, id }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_disposition_strips_quotes() {
        assert_eq!(
            content_disposition("my \"report\"\n.pdf"),
            "attachment; filename=\"my report.pdf\""
        );
    }
}
