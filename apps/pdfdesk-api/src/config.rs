//! Server configuration
//!
//! Every option can be given as a flag or through the environment (a `.env`
//! file is loaded first by `main`).

use clap::{Parser, ValueEnum};

use crate::ai::AiProvider;

/// Where uploaded and generated files are kept
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StorageBackend {
    /// Files on the local disk under `storage_dir`
    Local,
    /// Supabase Storage bucket
    Supabase,
}

/// Command-line arguments for the pdfdesk server
#[derive(Parser, Debug, Clone)]
#[command(name = "pdfdesk-api")]
#[command(about = "pdfdesk REST API for PDF tools, OCR and AI assistance")]
pub struct Config {
    /// Host address to bind to
    #[arg(long, env = "PDFDESK_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value = "3000")]
    pub port: u16,

    /// SQLite connection string
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite:pdfdesk.db?mode=rwc")]
    pub database_url: String,

    /// Supabase project JWT secret used to verify access tokens
    #[arg(long, env = "SUPABASE_JWT_SECRET", hide_env_values = true)]
    pub jwt_secret: String,

    #[arg(long, env = "STORAGE_BACKEND", value_enum, default_value = "local")]
    pub storage_backend: StorageBackend,

    /// Root directory for the local storage backend
    #[arg(long, env = "STORAGE_DIR", default_value = "./data/objects")]
    pub storage_dir: String,

    #[arg(long, env = "SUPABASE_URL")]
    pub supabase_url: Option<String>,

    #[arg(long, env = "SUPABASE_SERVICE_KEY", hide_env_values = true)]
    pub supabase_service_key: Option<String>,

    #[arg(long, env = "STORAGE_BUCKET", default_value = "documents")]
    pub storage_bucket: String,

    #[arg(long, env = "AI_PROVIDER", value_enum, default_value = "openai")]
    pub ai_provider: AiProvider,

    #[arg(long, env = "AI_API_KEY", hide_env_values = true)]
    pub ai_api_key: Option<String>,

    /// Model name; defaults per provider when unset
    #[arg(long, env = "AI_MODEL")]
    pub ai_model: Option<String>,

    /// Override the provider's API base URL
    #[arg(long, env = "AI_BASE_URL")]
    pub ai_base_url: Option<String>,

    /// Tesseract language candidates, tried in order
    #[arg(long, env = "OCR_LANGUAGES", value_delimiter = ',', default_value = "eng,spa,fra,deu")]
    pub ocr_languages: Vec<String>,

    /// Mean word confidence (0-100) that ends the language retry loop early
    #[arg(long, env = "OCR_CONFIDENCE_THRESHOLD", default_value = "80")]
    pub ocr_confidence_threshold: f32,

    /// Maximum number of language candidates tried per image
    #[arg(long, env = "OCR_MAX_ATTEMPTS", default_value = "4")]
    pub ocr_max_attempts: usize,

    /// Request body limit in megabytes
    #[arg(long, env = "MAX_UPLOAD_MB", default_value = "100")]
    pub max_upload_mb: usize,

    /// Rate limit: requests per second per IP
    #[arg(long, env = "RATE_LIMIT", default_value = "10")]
    pub rate_limit: u32,

    /// Stripe webhook signing secret; signatures are not checked when unset
    #[arg(long, env = "STRIPE_WEBHOOK_SECRET", hide_env_values = true)]
    pub stripe_webhook_secret: Option<String>,

    #[arg(long, env = "STRIPE_PRO_PRICE_IDS", value_delimiter = ',')]
    pub stripe_pro_price_ids: Vec<String>,

    #[arg(long, env = "STRIPE_BUSINESS_PRICE_IDS", value_delimiter = ',')]
    pub stripe_business_price_ids: Vec<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Config {
    /// Reject combinations clap cannot express
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.jwt_secret.trim().is_empty() {
            anyhow::bail!("SUPABASE_JWT_SECRET must not be empty");
        }

        if self.storage_backend == StorageBackend::Supabase {
            let has_url = self.supabase_url.as_deref().is_some_and(|u| !u.trim().is_empty());
            let has_key = self
                .supabase_service_key
                .as_deref()
                .is_some_and(|k| !k.trim().is_empty());
            if !has_url || !has_key {
                anyhow::bail!(
                    "STORAGE_BACKEND=supabase requires SUPABASE_URL and SUPABASE_SERVICE_KEY"
                );
            }
        }

        if !(0.0..=100.0).contains(&self.ocr_confidence_threshold) {
            anyhow::bail!(
                "OCR_CONFIDENCE_THRESHOLD must be between 0 and 100, got {}",
                self.ocr_confidence_threshold
            );
        }

        if self.ocr_max_attempts == 0 {
            anyhow::bail!("OCR_MAX_ATTEMPTS must be at least 1");
        }

        if self.languages().is_empty() {
            anyhow::bail!("OCR_LANGUAGES must name at least one language");
        }

        Ok(())
    }

    /// Configured OCR languages with blanks removed
    pub fn languages(&self) -> Vec<String> {
        clean_list(&self.ocr_languages)
    }

    pub fn pro_price_ids(&self) -> Vec<String> {
        clean_list(&self.stripe_pro_price_ids)
    }

    pub fn business_price_ids(&self) -> Vec<String> {
        clean_list(&self.stripe_business_price_ids)
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb * 1024 * 1024
    }
}

fn clean_list(values: &[String]) -> Vec<String> {
    values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}
