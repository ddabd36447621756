//! pdfdesk API
//!
//! REST backend for a PDF toolbox: merge, split, compress and convert,
//! OCR with a multi-language retry loop, AI summaries and document chat.
//! Every operation is metered against the caller's subscription plan and
//! its output is kept in object storage with a row in the document history.

pub mod ai;
pub mod auth;
pub mod billing;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod models;
pub mod ocr;
pub mod plans;
pub mod state;
pub mod storage;


use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};

use handlers::{
    ai::{handle_chat, handle_chat_history, handle_summarize},
    billing::handle_webhook,
    documents::{
        handle_delete_document, handle_download_document, handle_get_document,
        handle_list_documents,
    },
    handle_health, handle_list_plans, handle_usage,
    ocr::handle_ocr,
    pdf::{handle_compress, handle_convert, handle_info, handle_merge, handle_split},
};
pub use state::AppState;

/// Build the application router. Rate limiting is added by the binary
/// because it needs the peer address.
pub fn build_router(state: Arc<AppState>, max_upload_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(handle_health))
        // Plans and usage
        .route("/api/plans", get(handle_list_plans))
        .route("/api/usage", get(handle_usage))
        // PDF tools
        .route("/api/pdf/merge", post(handle_merge))
        .route("/api/pdf/split", post(handle_split))
        .route("/api/pdf/compress", post(handle_compress))
        .route("/api/pdf/convert", post(handle_convert))
        .route("/api/pdf/info", post(handle_info))
        // OCR
        .route("/api/ocr", post(handle_ocr))
        // AI
        .route("/api/ai/summarize", post(handle_summarize))
        .route("/api/ai/chat", post(handle_chat))
        .route("/api/ai/chat/:document_id", get(handle_chat_history))
        // Documents
        .route("/api/documents", get(handle_list_documents))
        .route(
            "/api/documents/:id",
            get(handle_get_document).delete(handle_delete_document),
        )
        .route("/api/documents/:id/download", get(handle_download_document))
        // Billing
        .route("/api/billing/webhook", post(handle_webhook))
        // Apply middleware
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_upload_bytes))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
