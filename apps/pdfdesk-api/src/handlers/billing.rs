//! Stripe webhook endpoint

use std::sync::Arc;

use axum::{extract::State, http::HeaderMap, Json};
use serde::Serialize;
use tracing::{info, warn};

use crate::billing::{handle_event, verify_webhook_signature, StripeEvent, WebhookOutcome};
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Serialize)]
pub struct WebhookResponse {
    pub received: bool,
}

/// Handler: POST /api/billing/webhook
pub async fn handle_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: String,
) -> Result<Json<WebhookResponse>, ApiError> {
    if let Some(secret) = state.billing.webhook_secret.as_deref() {
        let signature = headers
            .get("stripe-signature")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::InvalidRequest("Missing Stripe-Signature header".to_string()))?;

        let now = chrono::Utc::now().timestamp();
        if !verify_webhook_signature(&payload, signature, secret, now) {
            warn!("Rejected webhook with invalid signature");
            return Err(ApiError::InvalidRequest("Invalid webhook signature".to_string()));
        }
    }

    let event: StripeEvent = serde_json::from_str(&payload)
        .map_err(|e| ApiError::InvalidRequest(format!("Invalid webhook payload: {}", e)))?;
    info!("Webhook event: {}", event.event_type);

    match handle_event(&state.db, &state.billing, &event).await? {
        WebhookOutcome::Ignored(reason) => info!("Webhook ignored: {}", reason),
        outcome => info!("Webhook applied: {:?}", outcome),
    }

    Ok(Json(WebhookResponse { received: true }))
}
