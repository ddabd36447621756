//! Error types for the pdfdesk API

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use pdfdesk_core::PdfError;
use serde::Serialize;
use thiserror::Error;

use crate::ai::AiError;
use crate::ocr::OcrError;
use crate::plans::{Feature, Plan};
use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("File exceeds the {limit_mb} MB limit of your plan")]
    PayloadTooLarge { limit_mb: u32 },

    #[error("Monthly {feature} limit reached on the {plan} plan ({used}/{limit})")]
    PlanLimitExceeded {
        feature: Feature,
        limit: u32,
        used: u32,
        plan: Plan,
    },

    #[error(transparent)]
    Pdf(#[from] PdfError),

    #[error(transparent)]
    Ocr(#[from] OcrError),

    #[error(transparent)]
    Ai(#[from] AiError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    error: String,
    code: &'static str,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::PlanLimitExceeded { .. } => StatusCode::PAYMENT_REQUIRED,
            ApiError::Pdf(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
            ApiError::Pdf(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Ocr(OcrError::NotAvailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Ocr(OcrError::UnsupportedFormat(_)) => StatusCode::BAD_REQUEST,
            ApiError::Ocr(_) => StatusCode::BAD_GATEWAY,
            ApiError::Ai(AiError::NotConfigured(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Ai(_) => StatusCode::BAD_GATEWAY,
            ApiError::Storage(StorageError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Storage(_) | ApiError::Database(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Server-side failures are logged at `ERROR`; rejected requests at `DEBUG`
    pub fn log_level(&self) -> tracing::Level {
        if self.status().is_server_error() {
            tracing::Level::ERROR
        } else {
            tracing::Level::DEBUG
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::InvalidRequest(_) => "INVALID_REQUEST",
            ApiError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            ApiError::PlanLimitExceeded { .. } => "PLAN_LIMIT_EXCEEDED",
            ApiError::Pdf(_) => "PDF_ERROR",
            ApiError::Ocr(_) => "OCR_ERROR",
            ApiError::Ai(_) => "AI_ERROR",
            ApiError::Storage(_) => "STORAGE_ERROR",
            ApiError::Database(_) => "DATABASE_ERROR",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        let message = match &self {
            ApiError::Database(e) => {
                tracing::error!("Database error: {}", e);
                "Database error".to_string()
            }
            ApiError::Internal(e) => {
                tracing::error!("Internal error: {:#}", e);
                "Internal error".to_string()
            }
            other => {
                if other.log_level() == tracing::Level::ERROR {
                    tracing::error!("{}", other);
                } else {
                    tracing::debug!("Request rejected: {}", other);
                }
                other.to_string()
            }
        };

        let body = ErrorResponse {
            success: false,
            error: message,
            code: self.code(),
        };

        (status, Json(body)).into_response()
    }
}
