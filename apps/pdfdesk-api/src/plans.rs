//! Subscription plans, their limits and monthly usage tracking

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::error::ApiError;

/// Subscription plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    #[default]
    Free,
    Pro,
    Business,
}

impl Plan {
    pub const ALL: [Plan; 3] = [Plan::Free, Plan::Pro, Plan::Business];

    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Free => "free",
            Plan::Pro => "pro",
            Plan::Business => "business",
        }
    }

    pub fn limits(&self) -> PlanLimits {
        match self {
            Plan::Free => PlanLimits {
                pdf_operations: Some(20),
                ocr_pages: Some(10),
                ai_requests: Some(5),
                max_file_size_mb: 10,
                max_files_per_merge: 5,
                ocr_max_pages: 3,
            },
            Plan::Pro => PlanLimits {
                pdf_operations: Some(500),
                ocr_pages: Some(300),
                ai_requests: Some(200),
                max_file_size_mb: 50,
                max_files_per_merge: 20,
                ocr_max_pages: 25,
            },
            Plan::Business => PlanLimits {
                pdf_operations: None,
                ocr_pages: Some(2000),
                ai_requests: Some(1000),
                max_file_size_mb: 100,
                max_files_per_merge: 50,
                ocr_max_pages: 100,
            },
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Plan {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "free" => Ok(Plan::Free),
            "pro" => Ok(Plan::Pro),
            "business" => Ok(Plan::Business),
            other => Err(format!("Unknown plan '{}'", other)),
        }
    }
}

/// A metered capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    PdfOperation,
    OcrPage,
    AiRequest,
}

impl Feature {
    pub const ALL: [Feature; 3] = [Feature::PdfOperation, Feature::OcrPage, Feature::AiRequest];

    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::PdfOperation => "pdf_operation",
            Feature::OcrPage => "ocr_page",
            Feature::AiRequest => "ai_request",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Limits of one plan. `None` means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlanLimits {
    pub pdf_operations: Option<u32>,
    pub ocr_pages: Option<u32>,
    pub ai_requests: Option<u32>,
    pub max_file_size_mb: u32,
    pub max_files_per_merge: u32,
    pub ocr_max_pages: u32,
}

impl PlanLimits {
    /// Monthly allowance for a feature
    pub fn monthly(&self, feature: Feature) -> Option<u32> {
        match feature {
            Feature::PdfOperation => self.pdf_operations,
            Feature::OcrPage => self.ocr_pages,
            Feature::AiRequest => self.ai_requests,
        }
    }

    pub fn max_file_size_bytes(&self) -> usize {
        self.max_file_size_mb as usize * 1024 * 1024
    }
}

/// Reject a single upload larger than the plan allows
pub fn check_file_size(plan: Plan, size_bytes: usize) -> Result<(), ApiError> {
    let limits = plan.limits();
    if size_bytes > limits.max_file_size_bytes() {
        return Err(ApiError::PayloadTooLarge {
            limit_mb: limits.max_file_size_mb,
        });
    }
    Ok(())
}

/// Usage is counted per UTC calendar month
pub fn period_for(now: DateTime<Utc>) -> String {
    now.format("%Y-%m").to_string()
}

/// Usage of one feature in the current period
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeatureUsage {
    pub feature: Feature,
    pub used: u32,
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UsageSummary {
    pub plan: Plan,
    pub period: String,
    pub limits: PlanLimits,
    pub usage: Vec<FeatureUsage>,
}

/// Allowance held for one operation in one period
#[derive(Debug)]
#[must_use = "settle the reservation once the operation finishes"]
pub struct Reservation {
    user_id: String,
    feature: Feature,
    period: String,
    amount: u32,
}

impl Reservation {
    pub fn amount(&self) -> u32 {
        self.amount
    }
}

/// Monthly counters backed by the `usage_counters` table
#[derive(Clone)]
pub struct UsageTracker {
    db: SqlitePool,
}

impl UsageTracker {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub async fn used(&self, user_id: &str, feature: Feature) -> Result<u32, ApiError> {
        self.used_in(user_id, feature, &period_for(Utc::now())).await
    }

    async fn used_in(&self, user_id: &str, feature: Feature, period: &str) -> Result<u32, ApiError> {
        let count: Option<i64> = sqlx::query_scalar(
            "SELECT count FROM usage_counters WHERE user_id = ? AND period = ? AND feature = ?",
        )
        .bind(user_id)
        .bind(period)
        .bind(feature.as_str())
        .fetch_optional(&self.db)
        .await?;

        Ok(count.unwrap_or(0).max(0) as u32)
    }

    /// Atomically add `amount` to the caller's counter, failing with
    /// `PlanLimitExceeded` when that would pass the plan's monthly limit.
    /// The returned reservation must be settled once the operation is over.
    pub async fn reserve(
        &self,
        user_id: &str,
        plan: Plan,
        feature: Feature,
        amount: u32,
    ) -> Result<Reservation, ApiError> {
        let period = period_for(Utc::now());
        let limit = plan.limits().monthly(feature);

        if amount > 0 && !self.increment(user_id, &period, feature, amount, limit).await? {
            let used = self.used_in(user_id, feature, &period).await?;
            let limit = limit.unwrap_or(u32::MAX);
            tracing::info!(
                "Plan limit hit: user={} plan={} feature={} used={} limit={}",
                user_id,
                plan,
                feature,
                used,
                limit
            );
            return Err(ApiError::PlanLimitExceeded {
                feature,
                limit,
                used,
                plan,
            });
        }

        Ok(Reservation {
            user_id: user_id.to_string(),
            feature,
            period,
            amount,
        })
    }

    /// Keep `used` of a reservation and give the rest back
    pub async fn settle(&self, reservation: Reservation, used: u32) -> Result<(), ApiError> {
        let refund = reservation.amount.saturating_sub(used);
        if refund == 0 {
            return Ok(());
        }

        sqlx::query(
            r#"
            UPDATE usage_counters SET count = MAX(count - ?, 0)
            WHERE user_id = ? AND period = ? AND feature = ?
            "#,
        )
        .bind(refund as i64)
        .bind(&reservation.user_id)
        .bind(&reservation.period)
        .bind(reservation.feature.as_str())
        .execute(&self.db)
        .await?;

        tracing::debug!(
            "Refunded {} {} to user={}",
            refund,
            reservation.feature,
            reservation.user_id
        );
        Ok(())
    }

    /// Single-statement conditional upsert; false when the limit would be passed
    async fn increment(
        &self,
        user_id: &str,
        period: &str,
        feature: Feature,
        amount: u32,
        limit: Option<u32>,
    ) -> Result<bool, ApiError> {
        let limit = limit.map_or(i64::MAX, i64::from);

        let result = sqlx::query(
            r#"
            INSERT INTO usage_counters (user_id, period, feature, count)
            SELECT ?1, ?2, ?3, ?4 WHERE ?4 <= ?5
            ON CONFLICT(user_id, period, feature) DO UPDATE
                SET count = usage_counters.count + excluded.count
                WHERE usage_counters.count + excluded.count <= ?5
            "#,
        )
        .bind(user_id)
        .bind(period)
        .bind(feature.as_str())
        .bind(amount as i64)
        .bind(limit)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn summary(&self, user_id: &str, plan: Plan) -> Result<UsageSummary, ApiError> {
        let period = period_for(Utc::now());
        let limits = plan.limits();

        let mut usage = Vec::with_capacity(Feature::ALL.len());
        for feature in Feature::ALL {
            let used = self.used_in(user_id, feature, &period).await?;
            let limit = limits.monthly(feature);
            usage.push(FeatureUsage {
                feature,
                used,
                limit,
                remaining: limit.map(|l| l.saturating_sub(used)),
            });
        }

        Ok(UsageSummary {
            plan,
            period,
            limits,
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use chrono::TimeZone;

    async fn tracker() -> UsageTracker {
        UsageTracker::new(db::connect_in_memory().await.unwrap())
    }

    #[test]
    fn test_plan_parsing() {
        assert_eq!("Pro".parse::<Plan>().unwrap(), Plan::Pro);
        assert_eq!(" business ".parse::<Plan>().unwrap(), Plan::Business);
        assert!("enterprise".parse::<Plan>().is_err());
    }

    #[test]
    fn test_limits_grow_with_plan() {
        for feature in Feature::ALL {
            let free = Plan::Free.limits().monthly(feature).unwrap_or(u32::MAX);
            let pro = Plan::Pro.limits().monthly(feature).unwrap_or(u32::MAX);
            let business = Plan::Business.limits().monthly(feature).unwrap_or(u32::MAX);
            assert!(free < pro && pro <= business, "{}", feature);
        }
        assert_eq!(Plan::Business.limits().pdf_operations, None);
    }

    #[test]
    fn test_file_size_check() {
        assert!(check_file_size(Plan::Free, 10 * 1024 * 1024).is_ok());
        assert!(matches!(
            check_file_size(Plan::Free, 10 * 1024 * 1024 + 1),
            Err(ApiError::PayloadTooLarge { limit_mb: 10 })
        ));
        assert!(check_file_size(Plan::Pro, 20 * 1024 * 1024).is_ok());
    }

    #[test]
    fn test_period_format() {
        let date = Utc.with_ymd_and_hms(2025, 3, 31, 23, 59, 59).unwrap();
        assert_eq!(period_for(date), "2025-03");
    }

    async fn use_up(tracker: &UsageTracker, user_id: &str, plan: Plan, feature: Feature, amount: u32) {
        let reservation = tracker.reserve(user_id, plan, feature, amount).await.unwrap();
        tracker.settle(reservation, amount).await.unwrap();
    }

    #[tokio::test]
    async fn test_reserve_and_settle() {
        let tracker = tracker().await;

        use_up(&tracker, "u1", Plan::Free, Feature::AiRequest, 4).await;
        assert_eq!(tracker.used("u1", Feature::AiRequest).await.unwrap(), 4);

        let err = tracker
            .reserve("u1", Plan::Free, Feature::AiRequest, 2)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ApiError::PlanLimitExceeded { used: 4, limit: 5, .. }
        ));
        // a rejected reservation leaves the counter alone
        assert_eq!(tracker.used("u1", Feature::AiRequest).await.unwrap(), 4);

        use_up(&tracker, "u1", Plan::Free, Feature::AiRequest, 1).await;
        assert_eq!(tracker.used("u1", Feature::AiRequest).await.unwrap(), 5);

        // other users and features are unaffected
        assert!(tracker.reserve("u2", Plan::Free, Feature::AiRequest, 5).await.is_ok());
        assert!(tracker.reserve("u1", Plan::Free, Feature::OcrPage, 10).await.is_ok());
    }

    #[tokio::test]
    async fn test_failed_work_is_refunded() {
        let tracker = tracker().await;

        let reservation = tracker.reserve("u1", Plan::Free, Feature::OcrPage, 3).await.unwrap();
        assert_eq!(tracker.used("u1", Feature::OcrPage).await.unwrap(), 3);
        tracker.settle(reservation, 0).await.unwrap();
        assert_eq!(tracker.used("u1", Feature::OcrPage).await.unwrap(), 0);

        // partial use keeps only what was used
        let reservation = tracker.reserve("u1", Plan::Free, Feature::OcrPage, 3).await.unwrap();
        tracker.settle(reservation, 1).await.unwrap();
        assert_eq!(tracker.used("u1", Feature::OcrPage).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_reservation_larger_than_limit_fails() {
        let tracker = tracker().await;
        let err = tracker
            .reserve("u1", Plan::Free, Feature::OcrPage, 11)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::PlanLimitExceeded { used: 0, .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reservations_never_exceed_limit() {
        let tracker = tracker().await;
        let limit = Plan::Free.limits().ai_requests.unwrap();

        let tasks: Vec<_> = (0..limit * 3)
            .map(|_| {
                let tracker = tracker.clone();
                tokio::spawn(async move {
                    tracker.reserve("u1", Plan::Free, Feature::AiRequest, 1).await
                })
            })
            .collect();

        let mut granted = 0;
        for task in tasks {
            if task.await.unwrap().is_ok() {
                granted += 1;
            }
        }

        assert_eq!(granted, limit);
        assert_eq!(tracker.used("u1", Feature::AiRequest).await.unwrap(), limit);
    }

    #[tokio::test]
    async fn test_unlimited_feature_never_blocks() {
        let tracker = tracker().await;
        use_up(&tracker, "u1", Plan::Business, Feature::PdfOperation, 100_000).await;
        assert!(tracker
            .reserve("u1", Plan::Business, Feature::PdfOperation, 1)
            .await
            .is_ok());
        assert_eq!(tracker.used("u1", Feature::PdfOperation).await.unwrap(), 100_001);
    }

    #[tokio::test]
    async fn test_summary_reports_remaining() {
        let tracker = tracker().await;
        use_up(&tracker, "u1", Plan::Free, Feature::OcrPage, 7).await;

        let summary = tracker.summary("u1", Plan::Free).await.unwrap();
        let ocr = summary
            .usage
            .iter()
            .find(|u| u.feature == Feature::OcrPage)
            .unwrap();
        assert_eq!(ocr.used, 7);
        assert_eq!(ocr.remaining, Some(3));
        assert_eq!(summary.period, period_for(Utc::now()));
    }
}
