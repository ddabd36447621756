//! Stripe billing webhooks
//!
//! Subscriptions are managed in Stripe; this module only listens for the
//! events that change a user's plan.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use sqlx::SqlitePool;

use crate::db;
use crate::plans::Plan;

type HmacSha256 = Hmac<Sha256>;

/// Signatures older or newer than this many seconds are rejected
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Webhook secret and the price ids that map to paid plans
#[derive(Debug, Clone, Default)]
pub struct BillingSettings {
    pub webhook_secret: Option<String>,
    pub pro_price_ids: Vec<String>,
    pub business_price_ids: Vec<String>,
}

impl BillingSettings {
    /// Business ids are checked first so a price listed in both lists wins
    /// the higher plan
    pub fn plan_for_price(&self, price_id: &str) -> Option<Plan> {
        if self.business_price_ids.iter().any(|p| p == price_id) {
            Some(Plan::Business)
        } else if self.pro_price_ids.iter().any(|p| p == price_id) {
            Some(Plan::Pro)
        } else {
            None
        }
    }
}

/// Verify a `Stripe-Signature` header (`t=timestamp,v1=signature,...`)
pub fn verify_webhook_signature(payload: &str, header: &str, secret: &str, now: i64) -> bool {
    let mut timestamp = "";
    let mut signatures: Vec<&str> = Vec::new();

    for part in header.split(',') {
        if let Some((key, value)) = part.trim().split_once('=') {
            match key {
                "t" => timestamp = value,
                "v1" => signatures.push(value),
                _ => {}
            }
        }
    }

    if timestamp.is_empty() || signatures.is_empty() {
        return false;
    }

    let Ok(ts) = timestamp.parse::<i64>() else {
        return false;
    };
    if (now - ts).abs() > SIGNATURE_TOLERANCE_SECS {
        tracing::warn!("Webhook timestamp outside tolerance: {} vs now {}", ts, now);
        return false;
    }

    let Some(mac) = signed_mac(timestamp, payload, secret) else {
        return false;
    };

    // constant-time comparison
    signatures.iter().any(|s| {
        hex::decode(s).is_ok_and(|candidate| mac.clone().verify_slice(&candidate).is_ok())
    })
}

fn signed_mac(timestamp: &str, payload: &str, secret: &str) -> Option<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(format!("{}.{}", timestamp, payload).as_bytes());
    Some(mac)
}

/// Stripe Webhook Event
#[derive(Debug, Deserialize)]
pub struct StripeEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: StripeEventData,
}

#[derive(Debug, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}

/// What a webhook changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    CustomerLinked { user_id: String, customer_id: String },
    PlanChanged { customer_id: String, plan: Plan, profiles: u64 },
    Ignored(String),
}

/// Apply a verified Stripe event
pub async fn handle_event(
    pool: &SqlitePool,
    settings: &BillingSettings,
    event: &StripeEvent,
) -> Result<WebhookOutcome, sqlx::Error> {
    let object = &event.data.object;

    match event.event_type.as_str() {
        "checkout.session.completed" => {
            let user_id = object.get("client_reference_id").and_then(|v| v.as_str());
            let customer_id = object.get("customer").and_then(|v| v.as_str());

            let (Some(user_id), Some(customer_id)) = (user_id, customer_id) else {
                return Ok(WebhookOutcome::Ignored(
                    "checkout session without client_reference_id or customer".to_string(),
                ));
            };

            if !db::set_customer_id(pool, user_id, customer_id).await? {
                tracing::warn!("Checkout completed for unknown user {}", user_id);
                return Ok(WebhookOutcome::Ignored(format!("unknown user {}", user_id)));
            }
            tracing::info!("Linked Stripe customer {} to user {}", customer_id, user_id);

            Ok(WebhookOutcome::CustomerLinked {
                user_id: user_id.to_string(),
                customer_id: customer_id.to_string(),
            })
        }
        "customer.subscription.created" | "customer.subscription.updated" => {
            let Some(customer_id) = object.get("customer").and_then(|v| v.as_str()) else {
                return Ok(WebhookOutcome::Ignored("subscription without customer".to_string()));
            };

            let status = object.get("status").and_then(|v| v.as_str()).unwrap_or("");
            let plan = if matches!(status, "active" | "trialing") {
                subscription_plan(object, settings).unwrap_or(Plan::Free)
            } else {
                Plan::Free
            };

            set_plan(pool, customer_id, plan).await
        }
        "customer.subscription.deleted" => {
            let Some(customer_id) = object.get("customer").and_then(|v| v.as_str()) else {
                return Ok(WebhookOutcome::Ignored("subscription without customer".to_string()));
            };
            set_plan(pool, customer_id, Plan::Free).await
        }
        other => {
            tracing::debug!("Unhandled webhook event type: {}", other);
            Ok(WebhookOutcome::Ignored(other.to_string()))
        }
    }
}

/// Highest plan among the subscription's item prices
fn subscription_plan(object: &serde_json::Value, settings: &BillingSettings) -> Option<Plan> {
    object
        .pointer("/items/data")
        .and_then(|items| items.as_array())
        .into_iter()
        .flatten()
        .filter_map(|item| item.pointer("/price/id").and_then(|id| id.as_str()))
        .filter_map(|price_id| settings.plan_for_price(price_id))
        .max_by_key(|plan| match plan {
            Plan::Free => 0,
            Plan::Pro => 1,
            Plan::Business => 2,
        })
}

async fn set_plan(pool: &SqlitePool, customer_id: &str, plan: Plan) -> Result<WebhookOutcome, sqlx::Error> {
    let profiles = db::set_plan_by_customer(pool, customer_id, plan).await?;
    tracing::info!(
        "Customer {} moved to {} plan ({} profiles)",
        customer_id,
        plan,
        profiles
    );
    Ok(WebhookOutcome::PlanChanged {
        customer_id: customer_id.to_string(),
        plan,
        profiles,
    })
}

/// Build a valid signature header; used by tests and local tooling
pub fn sign_payload(payload: &str, secret: &str, timestamp: i64) -> Option<String> {
    let signature = signed_mac(&timestamp.to_string(), payload, secret)?
        .finalize()
        .into_bytes();
    Some(format!("t={},v1={}", timestamp, hex::encode(signature)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SECRET: &str = "whsec_test";
    const NOW: i64 = 1_700_000_000;

    fn settings() -> BillingSettings {
        BillingSettings {
            webhook_secret: Some(SECRET.to_string()),
            pro_price_ids: vec!["price_pro_m".into(), "price_shared".into()],
            business_price_ids: vec!["price_biz_m".into(), "price_shared".into()],
        }
    }

    fn event(event_type: &str, object: serde_json::Value) -> StripeEvent {
        serde_json::from_value(json!({ "type": event_type, "data": { "object": object } })).unwrap()
    }

    #[test]
    fn test_signature_roundtrip() {
        let payload = r#"{"type":"ping"}"#;
        let header = sign_payload(payload, SECRET, NOW).unwrap();
        assert!(verify_webhook_signature(payload, &header, SECRET, NOW + 10));
    }

    #[test]
    fn test_signature_rejects_tampering_and_staleness() {
        let payload = r#"{"type":"ping"}"#;
        let header = sign_payload(payload, SECRET, NOW).unwrap();

        assert!(!verify_webhook_signature(r#"{"type":"pong"}"#, &header, SECRET, NOW));
        assert!(!verify_webhook_signature(payload, &header, "other", NOW));
        assert!(!verify_webhook_signature(payload, &header, SECRET, NOW + 301));
        assert!(!verify_webhook_signature(payload, "v1=abc", SECRET, NOW));
        assert!(!verify_webhook_signature(payload, "t=abc,v1=abc", SECRET, NOW));
    }

    #[test]
    fn test_any_v1_signature_may_match() {
        let payload = "{}";
        let valid = sign_payload(payload, SECRET, NOW).unwrap();
        let v1 = valid.split("v1=").nth(1).unwrap();
        let header = format!("t={},v1=deadbeef,v1={}", NOW, v1);
        assert!(verify_webhook_signature(payload, &header, SECRET, NOW));
    }

    #[test]
    fn test_partial_signature_is_rejected() {
        let payload = "{}";
        let valid = sign_payload(payload, SECRET, NOW).unwrap();
        let v1 = valid.split("v1=").nth(1).unwrap();
        let extended = format!("{}00", v1);

        for candidate in [&v1[..32], "", extended.as_str()] {
            let header = format!("t={},v1={}", NOW, candidate);
            assert!(!verify_webhook_signature(payload, &header, SECRET, NOW), "{}", candidate);
        }
    }

    #[test]
    fn test_business_price_wins() {
        let s = settings();
        assert_eq!(s.plan_for_price("price_shared"), Some(Plan::Business));
        assert_eq!(s.plan_for_price("price_pro_m"), Some(Plan::Pro));
        assert_eq!(s.plan_for_price("price_unknown"), None);
    }

    #[tokio::test]
    async fn test_subscription_lifecycle() {
        let pool = db::connect_in_memory().await.unwrap();
        db::upsert_profile(&pool, "user-1", None).await.unwrap();
        let s = settings();

        let outcome = handle_event(
            &pool,
            &s,
            &event(
                "checkout.session.completed",
                json!({ "client_reference_id": "user-1", "customer": "cus_1" }),
            ),
        )
        .await
        .unwrap();
        assert!(matches!(outcome, WebhookOutcome::CustomerLinked { .. }));

        let subscription = json!({
            "customer": "cus_1",
            "status": "active",
            "items": { "data": [ { "price": { "id": "price_pro_m" } } ] }
        });
        handle_event(&pool, &s, &event("customer.subscription.created", subscription))
            .await
            .unwrap();
        assert_eq!(db::upsert_profile(&pool, "user-1", None).await.unwrap().plan(), Plan::Pro);

        let past_due = json!({
            "customer": "cus_1",
            "status": "past_due",
            "items": { "data": [ { "price": { "id": "price_pro_m" } } ] }
        });
        handle_event(&pool, &s, &event("customer.subscription.updated", past_due))
            .await
            .unwrap();
        assert_eq!(db::upsert_profile(&pool, "user-1", None).await.unwrap().plan(), Plan::Free);

        let upgraded = json!({
            "customer": "cus_1",
            "status": "trialing",
            "items": { "data": [ { "price": { "id": "price_biz_m" } } ] }
        });
        handle_event(&pool, &s, &event("customer.subscription.updated", upgraded))
            .await
            .unwrap();
        assert_eq!(
            db::upsert_profile(&pool, "user-1", None).await.unwrap().plan(),
            Plan::Business
        );

        handle_event(&pool, &s, &event("customer.subscription.deleted", json!({ "customer": "cus_1" })))
            .await
            .unwrap();
        assert_eq!(db::upsert_profile(&pool, "user-1", None).await.unwrap().plan(), Plan::Free);
    }

    #[tokio::test]
    async fn test_unknown_events_are_ignored() {
        let pool = db::connect_in_memory().await.unwrap();
        let outcome = handle_event(&pool, &settings(), &event("invoice.paid", json!({})))
            .await
            .unwrap();
        assert_eq!(outcome, WebhookOutcome::Ignored("invoice.paid".to_string()));
    }
}
