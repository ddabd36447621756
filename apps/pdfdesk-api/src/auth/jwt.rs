//! Supabase access token verification
//!
//! Supabase signs access tokens with HS256 using the project's JWT secret.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("Invalid token format")]
    Malformed,

    #[error("Invalid signature")]
    BadSignature,

    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Token expired")]
    Expired,

    #[error("Token has no subject")]
    MissingSubject,

    #[error("Signing failed: {0}")]
    Signing(String),
}

/// JWT Header for HS256
#[derive(Debug, Serialize, Deserialize)]
struct JwtHeader {
    alg: String,
    #[serde(default)]
    typ: Option<String>,
}

/// Claims Supabase puts in an access token (the subset we read)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject (user ID)
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Postgres role, usually `authenticated`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Expiration (Unix timestamp)
    pub exp: u64,
    /// Issued at (Unix timestamp)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<u64>,
}

fn sign(signing_input: &str, secret: &str) -> Result<HmacSha256, TokenError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| TokenError::Signing(e.to_string()))?;
    mac.update(signing_input.as_bytes());
    Ok(mac)
}

/// Encode claims to JWT using HS256
pub fn issue_access_token(claims: &AccessClaims, secret: &str) -> Result<String, TokenError> {
    let header = JwtHeader {
        alg: "HS256".to_string(),
        typ: Some("JWT".to_string()),
    };
    let header_json =
        serde_json::to_vec(&header).map_err(|e| TokenError::Signing(e.to_string()))?;
    let payload_json =
        serde_json::to_vec(claims).map_err(|e| TokenError::Signing(e.to_string()))?;

    let signing_input = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(header_json),
        URL_SAFE_NO_PAD.encode(payload_json)
    );
    let signature = sign(&signing_input, secret)?.finalize().into_bytes();

    Ok(format!(
        "{}.{}",
        signing_input,
        URL_SAFE_NO_PAD.encode(signature)
    ))
}

/// Decode and validate an access token at time `now` (Unix seconds)
pub fn verify_access_token(token: &str, secret: &str, now: u64) -> Result<AccessClaims, TokenError> {
    let mut parts = token.split('.');
    let (Some(header_b64), Some(payload_b64), Some(signature_b64), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(TokenError::Malformed);
    };

    // Verify signature
    let signing_input = format!("{}.{}", header_b64, payload_b64);
    let signature = URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|_| TokenError::Malformed)?;
    sign(&signing_input, secret)?
        .verify_slice(&signature)
        .map_err(|_| TokenError::BadSignature)?;

    // Verify header
    let header_bytes = URL_SAFE_NO_PAD
        .decode(header_b64)
        .map_err(|_| TokenError::Malformed)?;
    let header: JwtHeader =
        serde_json::from_slice(&header_bytes).map_err(|_| TokenError::Malformed)?;
    if header.alg != "HS256" {
        return Err(TokenError::UnsupportedAlgorithm(header.alg));
    }

    // Decode payload
    let payload_bytes = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|_| TokenError::Malformed)?;
    let claims: AccessClaims =
        serde_json::from_slice(&payload_bytes).map_err(|_| TokenError::Malformed)?;

    if claims.exp <= now {
        return Err(TokenError::Expired);
    }
    if claims.sub.trim().is_empty() {
        return Err(TokenError::MissingSubject);
    }

    Ok(claims)
}

/// Extract Bearer token from Authorization header
pub fn extract_bearer_token(auth_header: Option<&str>) -> Option<&str> {
    let header = auth_header?.trim();
    let (scheme, token) = header.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_SECRET: &str = "test-secret-key-at-least-32-bytes-long";
    const NOW: u64 = 1_700_000_000;

    fn claims(exp: u64) -> AccessClaims {
        AccessClaims {
            sub: "user-123".to_string(),
            email: Some("test@example.com".to_string()),
            role: Some("authenticated".to_string()),
            exp,
            iat: Some(NOW - 60),
        }
    }

    #[test]
    fn test_issue_and_verify() {
        let token = issue_access_token(&claims(NOW + 3600), TEST_SECRET).unwrap();
        let decoded = verify_access_token(&token, TEST_SECRET, NOW).unwrap();
        assert_eq!(decoded, claims(NOW + 3600));
    }

    #[test]
    fn test_wrong_secret() {
        let token = issue_access_token(&claims(NOW + 3600), TEST_SECRET).unwrap();
        assert_eq!(
            verify_access_token(&token, "wrong-secret", NOW),
            Err(TokenError::BadSignature)
        );
    }

    #[test]
    fn test_expired() {
        let token = issue_access_token(&claims(NOW), TEST_SECRET).unwrap();
        assert_eq!(
            verify_access_token(&token, TEST_SECRET, NOW),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn test_malformed() {
        assert_eq!(
            verify_access_token("invalid-token", TEST_SECRET, NOW),
            Err(TokenError::Malformed)
        );
        assert_eq!(
            verify_access_token("a.b.c.d", TEST_SECRET, NOW),
            Err(TokenError::Malformed)
        );
    }

    #[test]
    fn test_rejects_other_algorithms() {
        // header {"alg":"none"} signed with the right secret is still refused
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims(NOW + 60)).unwrap());
        let input = format!("{}.{}", header, payload);
        let signature = URL_SAFE_NO_PAD.encode(sign(&input, TEST_SECRET).unwrap().finalize().into_bytes());
        let token = format!("{}.{}", input, signature);

        assert_eq!(
            verify_access_token(&token, TEST_SECRET, NOW),
            Err(TokenError::UnsupportedAlgorithm("none".to_string()))
        );
    }

    #[test]
    fn test_supabase_style_payload() {
        // extra claims such as aud and session_id are ignored
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(
            format!(
                r#"{{"aud":"authenticated","exp":{},"sub":"abc","role":"authenticated","session_id":"s1"}}"#,
                NOW + 10
            )
            .as_bytes(),
        );
        let input = format!("{}.{}", header, payload);
        let signature = URL_SAFE_NO_PAD.encode(sign(&input, TEST_SECRET).unwrap().finalize().into_bytes());

        let claims = verify_access_token(&format!("{}.{}", input, signature), TEST_SECRET, NOW).unwrap();
        assert_eq!(claims.sub, "abc");
        assert_eq!(claims.email, None);
    }

    #[test]
    fn test_extract_bearer_token() {
        assert_eq!(extract_bearer_token(Some("Bearer abc123")), Some("abc123"));
        assert_eq!(extract_bearer_token(Some("bearer  abc123 ")), Some("abc123"));
        assert_eq!(extract_bearer_token(Some("Basic abc123")), None);
        assert_eq!(extract_bearer_token(Some("abc123")), None);
        assert_eq!(extract_bearer_token(Some("Bearer ")), None);
        assert_eq!(extract_bearer_token(None), None);
    }
}
