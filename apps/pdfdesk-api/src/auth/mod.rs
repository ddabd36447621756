//! Authentication
//!
//! Requests carry a Supabase access token as `Authorization: Bearer <jwt>`.
//! The [`AuthUser`] extractor verifies it and loads the caller's profile,
//! creating it on first use.

pub mod jwt;

use std::sync::Arc;

use axum::{async_trait, extract::FromRequestParts, http::header::AUTHORIZATION, http::request::Parts};

use crate::db;
use crate::error::ApiError;
use crate::plans::Plan;
use crate::state::AppState;

pub use jwt::{extract_bearer_token, issue_access_token, verify_access_token, AccessClaims};

/// The authenticated caller
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: String,
    pub email: Option<String>,
    pub plan: Plan,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());

        let token = extract_bearer_token(header)
            .ok_or_else(|| ApiError::Unauthorized("Missing bearer token".to_string()))?;

        let now = chrono::Utc::now().timestamp().max(0) as u64;
        let claims = verify_access_token(token, &state.jwt_secret, now)
            .map_err(|e| ApiError::Unauthorized(e.to_string()))?;

        let profile = db::upsert_profile(&state.db, &claims.sub, claims.email.as_deref()).await?;

        Ok(AuthUser {
            plan: profile.plan(),
            email: profile.email,
            id: profile.id,
        })
    }
}
