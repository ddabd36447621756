//! Object storage for uploaded and generated files
//!
//! Two backends share the [`ObjectStore`] trait: a local directory and a
//! Supabase Storage bucket. Keys look like `{user_id}/{document_id}/{file_name}`.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Storage backend error ({status}): {message}")]
    Backend { status: u16, message: String },
}

/// Trait for object storage backends
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store bytes under `key`, replacing any existing object
    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<(), StorageError>;

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Deleting a missing object is not an error
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    fn backend_name(&self) -> &'static str;
}

/// Build the key for a stored file
pub fn object_key(user_id: &str, document_id: &str, file_name: &str) -> String {
    format!(
        "{}/{}/{}",
        sanitize_segment(user_id),
        sanitize_segment(document_id),
        sanitize_file_name(file_name)
    )
}

/// Reduce an uploaded file name to a safe single path segment
pub fn sanitize_file_name(name: &str) -> String {
    // browsers may send the full client path
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);

    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .take(128)
        .collect();

    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned.to_string()
    }
}

fn sanitize_segment(segment: &str) -> String {
    let cleaned: String = segment
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
        .collect();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

/// Validate a key as a relative path made of normal components only
pub fn validate_key(key: &str) -> Result<&Path, StorageError> {
    if key.is_empty() || key.contains('\\') || key.contains('\0') {
        return Err(StorageError::InvalidKey(key.to_string()));
    }

    let path = Path::new(key);
    let all_normal = path
        .components()
        .all(|component| matches!(component, Component::Normal(_)));
    if !all_normal {
        return Err(StorageError::InvalidKey(key.to_string()));
    }

    Ok(path)
}

// ============================================================================
// Local filesystem
// ============================================================================

/// Files under a root directory
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        Ok(self.root.join(validate_key(key)?))
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn put(&self, key: &str, data: Vec<u8>, _content_type: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, data).await?;
        tracing::debug!("Stored {} in {}", key, self.root.display());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn backend_name(&self) -> &'static str {
        "local"
    }
}

// ============================================================================
// Supabase Storage
// ============================================================================

/// Supabase Storage REST API, authenticated with the service role key
pub struct SupabaseStore {
    client: reqwest::Client,
    base_url: String,
    bucket: String,
    service_key: String,
}

impl SupabaseStore {
    pub fn new(base_url: &str, bucket: &str, service_key: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            bucket: bucket.to_string(),
            service_key: service_key.to_string(),
        }
    }

    fn object_url(&self, key: &str) -> Result<String, StorageError> {
        validate_key(key)?;
        Ok(format!(
            "{}/storage/v1/object/{}/{}",
            self.base_url, self.bucket, key
        ))
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .bearer_auth(&self.service_key)
            .header("apikey", &self.service_key)
    }

    async fn backend_error(key: &str, response: reqwest::Response) -> StorageError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        // Storage reports missing objects as 400 with a 404 statusCode in the body
        let missing = status == StatusCode::NOT_FOUND
            || body.contains("\"statusCode\":\"404\"")
            || body.contains("not_found")
            || body.contains("Object not found");
        if missing {
            return StorageError::NotFound(key.to_string());
        }

        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| {
                v.get("message")
                    .or_else(|| v.get("error"))
                    .and_then(|m| m.as_str())
                    .map(str::to_string)
            })
            .unwrap_or(body);

        StorageError::Backend {
            status: status.as_u16(),
            message,
        }
    }
}

#[async_trait]
impl ObjectStore for SupabaseStore {
    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<(), StorageError> {
        let url = self.object_url(key)?;
        let response = self
            .authorized(self.client.post(&url))
            .header("content-type", content_type)
            .header("x-upsert", "true")
            .body(data)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::backend_error(key, response).await);
        }
        tracing::debug!("Uploaded {} to bucket {}", key, self.bucket);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let url = self.object_url(key)?;
        let response = self.authorized(self.client.get(&url)).send().await?;

        if !response.status().is_success() {
            return Err(Self::backend_error(key, response).await);
        }
        Ok(response.bytes().await?.to_vec())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let url = self.object_url(key)?;
        let response = self.authorized(self.client.delete(&url)).send().await?;

        if response.status().is_success() {
            return Ok(());
        }
        match Self::backend_error(key, response).await {
            StorageError::NotFound(_) => Ok(()),
            other => Err(other),
        }
    }

    fn backend_name(&self) -> &'static str {
        "supabase"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("report 2024.pdf"), "report_2024.pdf");
        assert_eq!(sanitize_file_name("C:\\Users\\me\\scan.png"), "scan.png");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name(".env"), "env");
        assert_eq!(sanitize_file_name(""), "file");
    }

    #[test]
    fn test_object_key_layout() {
        assert_eq!(
            object_key("user-1", "doc_2", "a b.pdf"),
            "user-1/doc_2/a_b.pdf"
        );
        assert_eq!(object_key("../x", "y", "z.pdf"), "x/y/z.pdf");
    }

    #[test]
    fn test_validate_key_rejects_traversal() {
        assert!(validate_key("a/b/c.pdf").is_ok());
        assert!(validate_key("../secret").is_err());
        assert!(validate_key("/etc/passwd").is_err());
        assert!(validate_key("a/./b").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("a\\b").is_err());
    }

    #[test]
    fn test_supabase_object_url() {
        let store = SupabaseStore::new("https://proj.supabase.co/", "documents", "key");
        assert_eq!(
            store.object_url("u/d/f.pdf").unwrap(),
            "https://proj.supabase.co/storage/v1/object/documents/u/d/f.pdf"
        );
    }

    #[tokio::test]
    async fn test_local_store_roundtrip_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());

        store.put("u/d/out.pdf", b"%PDF".to_vec(), "application/pdf").await.unwrap();
        assert_eq!(store.get("u/d/out.pdf").await.unwrap(), b"%PDF");

        store.delete("u/d/out.pdf").await.unwrap();
        assert!(matches!(
            store.get("u/d/out.pdf").await,
            Err(StorageError::NotFound(_))
        ));
        // second delete is a no-op
        store.delete("u/d/out.pdf").await.unwrap();
    }

    #[tokio::test]
    async fn test_local_store_rejects_escape() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        assert!(matches!(
            store.put("../escape.pdf", vec![1], "application/pdf").await,
            Err(StorageError::InvalidKey(_))
        ));
    }
}
