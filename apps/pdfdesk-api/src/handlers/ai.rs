//! AI endpoints: summaries and chat with a stored document

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use super::{metered, run_blocking, store_output, Output, TEXT_CONTENT_TYPE};
use crate::ai::{self, ChatMessage, Role, SummaryStyle};
use crate::auth::AuthUser;
use crate::db;
use crate::error::ApiError;
use crate::models::{DbChatMessage, DocumentResponse, Operation};
use crate::plans::Feature;
use crate::state::AppState;

/// Load the text of one of the caller's documents
async fn document_text(state: &AppState, user: &AuthUser, document_id: &str) -> Result<String, ApiError> {
    let doc = db::get_document(&state.db, &user.id, document_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Document {} not found", document_id)))?;

    let bytes = state.store.get(&doc.storage_key).await?;

    let text = if doc.content_type == "application/pdf" {
        run_blocking(move || pdfdesk_core::pdf_to_text(&bytes)).await?
    } else if doc.content_type.starts_with("text/") {
        String::from_utf8_lossy(&bytes).into_owned()
    } else {
        return Err(ApiError::InvalidRequest(format!(
            "Document {} has no readable text",
            document_id
        )));
    };

    debug!("Loaded {} chars from document {}", text.len(), document_id);
    Ok(text)
}

fn require_text(text: String) -> Result<String, ApiError> {
    if text.trim().is_empty() {
        return Err(ApiError::InvalidRequest(
            "No text to work with; run OCR on scanned documents first".to_string(),
        ));
    }
    Ok(text)
}

/// Summarize request body
#[derive(Deserialize)]
pub struct SummarizeRequest {
    pub document_id: Option<String>,
    pub text: Option<String>,
    #[serde(default)]
    pub style: Option<String>,
}

#[derive(Serialize)]
pub struct SummarizeResponse {
    pub success: bool,
    pub summary: String,
    pub style: SummaryStyle,
    pub truncated: bool,
    pub model: String,
    pub document: DocumentResponse,
}

/// Handler: POST /api/ai/summarize
pub async fn handle_summarize(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<SummarizeRequest>,
) -> Result<Json<SummarizeResponse>, ApiError> {
    let style: SummaryStyle = req
        .style
        .as_deref()
        .unwrap_or_default()
        .parse()
        .map_err(ApiError::InvalidRequest)?;
    info!(
        "Summarize request: user={} document={:?} style={:?}",
        user.id, req.document_id, style
    );

    let text = match (req.text, req.document_id.as_deref()) {
        (Some(text), _) if !text.trim().is_empty() => text,
        (_, Some(document_id)) => document_text(&state, &user, document_id).await?,
        _ => {
            return Err(ApiError::InvalidRequest(
                "Provide either 'text' or 'document_id'".to_string(),
            ))
        }
    };
    let text = require_text(text)?;

    metered(&state, &user, Feature::AiRequest, 1, |_| 1, async {
        let summary = ai::summarize(state.ai.as_ref(), &text, style).await?;

        let doc = store_output(
            &state,
            &user,
            Operation::Summarize,
            Output {
                file_name: "summary.txt".to_string(),
                content_type: TEXT_CONTENT_TYPE,
                data: summary.summary.clone().into_bytes(),
                page_count: None,
                metadata: json!({
                    "source_document_id": req.document_id,
                    "style": summary.style,
                    "truncated": summary.truncated,
                    "model": summary.model,
                    "summary": summary.summary,
                }),
            },
        )
        .await?;

        Ok::<_, ApiError>(Json(SummarizeResponse {
            success: true,
            summary: summary.summary,
            style: summary.style,
            truncated: summary.truncated,
            model: summary.model,
            document: doc.into(),
        }))
    })
    .await
}

/// Chat request body
#[derive(Deserialize)]
pub struct ChatRequest {
    pub document_id: String,
    pub message: String,
}

#[derive(Serialize)]
pub struct ChatResponse {
    pub success: bool,
    pub answer: String,
    pub model: String,
    pub history: Vec<DbChatMessage>,
}

/// Handler: POST /api/ai/chat
pub async fn handle_chat(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    info!("Chat request: user={} document={}", user.id, req.document_id);

    let question = req.message.trim();
    if question.is_empty() {
        return Err(ApiError::InvalidRequest("'message' must not be empty".to_string()));
    }

    let text = require_text(document_text(&state, &user, &req.document_id).await?)?;

    metered(&state, &user, Feature::AiRequest, 1, |_| 1, async {
        let history: Vec<ChatMessage> = db::recent_chat_messages(
            &state.db,
            &user.id,
            &req.document_id,
            ai::MAX_HISTORY_MESSAGES as u32,
        )
        .await?
        .into_iter()
        .filter_map(|m| {
            Role::parse(&m.role).map(|role| ChatMessage {
                role,
                content: m.content,
            })
        })
        .collect();

        let completion = ai::answer(state.ai.as_ref(), &text, &history, question).await?;

        db::insert_chat_message(&state.db, &user.id, &req.document_id, Role::User.as_str(), question)
            .await?;
        db::insert_chat_message(
            &state.db,
            &user.id,
            &req.document_id,
            Role::Assistant.as_str(),
            &completion.content,
        )
        .await?;

        let history = db::chat_history(&state.db, &user.id, &req.document_id).await?;

        Ok::<_, ApiError>(Json(ChatResponse {
            success: true,
            answer: completion.content,
            model: completion.model,
            history,
        }))
    })
    .await
}

#[derive(Serialize)]
pub struct ChatHistoryResponse {
    pub success: bool,
    pub document_id: String,
    pub messages: Vec<DbChatMessage>,
}

/// Handler: GET /api/ai/chat/:document_id
pub async fn handle_chat_history(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(document_id): Path<String>,
) -> Result<Json<ChatHistoryResponse>, ApiError> {
    info!("Chat history request: user={} document={}", user.id, document_id);

    if db::get_document(&state.db, &user.id, &document_id).await?.is_none() {
        return Err(ApiError::NotFound(format!("Document {} not found", document_id)));
    }

    let messages = db::chat_history(&state.db, &user.id, &document_id).await?;

    Ok(Json(ChatHistoryResponse {
        success: true,
        document_id,
        messages,
    }))
}
