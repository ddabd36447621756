//! Application state for the pdfdesk API

use std::sync::Arc;

use anyhow::Result;
use sqlx::SqlitePool;

use crate::ai::{ChatModel, OpenAiCompatibleClient};
use crate::billing::BillingSettings;
use crate::config::{Config, StorageBackend};
use crate::db;
use crate::ocr::{OcrService, RetryPolicy, TesseractEngine};
use crate::plans::UsageTracker;
use crate::storage::{LocalStore, ObjectStore, SupabaseStore};

pub struct AppState {
    pub db: SqlitePool,
    pub store: Arc<dyn ObjectStore>,
    pub usage: UsageTracker,
    pub ocr: OcrService,
    pub ai: Arc<dyn ChatModel>,
    pub jwt_secret: String,
    pub billing: BillingSettings,
}

impl AppState {
    pub async fn new(config: &Config) -> Result<Self> {
        let db = db::connect(&config.database_url).await?;

        let store: Arc<dyn ObjectStore> = match config.storage_backend {
            StorageBackend::Local => {
                tokio::fs::create_dir_all(&config.storage_dir).await?;
                Arc::new(LocalStore::new(&config.storage_dir))
            }
            StorageBackend::Supabase => Arc::new(SupabaseStore::new(
                config.supabase_url.as_deref().unwrap_or_default(),
                &config.storage_bucket,
                config.supabase_service_key.as_deref().unwrap_or_default(),
            )),
        };
        tracing::info!("Object storage: {}", store.backend_name());

        let ocr = OcrService::new(
            Arc::new(TesseractEngine::new()),
            RetryPolicy {
                languages: config.languages(),
                confidence_threshold: config.ocr_confidence_threshold,
                max_attempts: config.ocr_max_attempts,
            },
        );
        if !ocr.is_available().await {
            tracing::warn!("tesseract not found; OCR requests will fail until it is installed");
        }

        let ai = OpenAiCompatibleClient::new(
            config.ai_provider,
            config.ai_api_key.clone(),
            config.ai_model.clone(),
            config.ai_base_url.clone(),
        );
        if !ai.is_configured() {
            tracing::warn!("AI_API_KEY not set; AI endpoints will return 503");
        }

        Ok(Self {
            usage: UsageTracker::new(db.clone()),
            db,
            store,
            ocr,
            ai: Arc::new(ai),
            jwt_secret: config.jwt_secret.clone(),
            billing: BillingSettings {
                webhook_secret: config
                    .stripe_webhook_secret
                    .clone()
                    .filter(|s| !s.trim().is_empty()),
                pro_price_ids: config.pro_price_ids(),
                business_price_ids: config.business_price_ids(),
            },
        })
    }
}
