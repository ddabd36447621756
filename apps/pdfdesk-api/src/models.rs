//! Data models for the pdfdesk API

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::plans::Plan;

/// Caller profile stored in database
#[derive(Debug, Clone, FromRow)]
pub struct DbProfile {
    pub id: String,
    pub email: Option<String>,
    pub plan: String,
    pub stripe_customer_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DbProfile {
    /// Unknown plan names fall back to Free
    pub fn plan(&self) -> Plan {
        self.plan.parse().unwrap_or_default()
    }
}

/// Output of an operation stored in database
#[derive(Debug, Clone, FromRow)]
pub struct DbDocument {
    pub id: String,
    pub user_id: String,
    pub operation: String,
    pub file_name: String,
    pub content_type: String,
    pub storage_key: String,
    pub size_bytes: i64,
    pub page_count: Option<i64>,
    pub metadata_json: String,
    pub created_at: DateTime<Utc>,
}

/// A row about to be inserted
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub id: String,
    pub user_id: String,
    pub operation: Operation,
    pub file_name: String,
    pub content_type: String,
    pub storage_key: String,
    pub size_bytes: usize,
    pub page_count: Option<u32>,
    pub metadata: serde_json::Value,
}

/// Operation that produced a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Merge,
    Split,
    Compress,
    Convert,
    Ocr,
    Summarize,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Merge => "merge",
            Operation::Split => "split",
            Operation::Compress => "compress",
            Operation::Convert => "convert",
            Operation::Ocr => "ocr",
            Operation::Summarize => "summarize",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Document response for API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentResponse {
    pub id: String,
    pub operation: String,
    pub file_name: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub page_count: Option<i64>,
    pub metadata: serde_json::Value,
    pub download_url: String,
    pub created_at: DateTime<Utc>,
}

impl From<DbDocument> for DocumentResponse {
    fn from(doc: DbDocument) -> Self {
        let metadata = serde_json::from_str(&doc.metadata_json).unwrap_or(serde_json::Value::Null);
        Self {
            download_url: format!("/api/documents/{}/download", doc.id),
            id: doc.id,
            operation: doc.operation,
            file_name: doc.file_name,
            content_type: doc.content_type,
            size_bytes: doc.size_bytes,
            page_count: doc.page_count,
            metadata,
            created_at: doc.created_at,
        }
    }
}

/// Chat message stored in database
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DbChatMessage {
    pub id: String,
    pub document_id: String,
    pub user_id: String,
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}
