//! SQLite pool, migrations and queries
//!
//! Every document and chat query takes the caller's user id so rows owned
//! by other users are never visible.

use anyhow::Result;
use chrono::Utc;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::models::{DbChatMessage, DbDocument, DbProfile, NewDocument};
use crate::plans::Plan;

pub async fn connect(database_url: &str) -> Result<SqlitePool> {
    tracing::info!("Connecting to database: {}", database_url);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;

    run_migrations(&pool).await?;
    Ok(pool)
}

/// Single-connection in-memory database, migrated
pub async fn connect_in_memory() -> Result<SqlitePool, sqlx::Error> {
    // each connection to :memory: is a separate database
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;

    run_migrations(&pool).await?;
    Ok(pool)
}

pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    tracing::info!("Running database migrations...");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS profiles (
            id TEXT PRIMARY KEY,
            email TEXT,
            plan TEXT NOT NULL DEFAULT 'free',
            stripe_customer_id TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            operation TEXT NOT NULL,
            file_name TEXT NOT NULL,
            content_type TEXT NOT NULL,
            storage_key TEXT NOT NULL,
            size_bytes INTEGER NOT NULL,
            page_count INTEGER,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS usage_counters (
            user_id TEXT NOT NULL,
            period TEXT NOT NULL,
            feature TEXT NOT NULL,
            count INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (user_id, period, feature)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chat_messages (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            role TEXT NOT NULL,
            content TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_user ON documents(user_id, created_at)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chat_document ON chat_messages(document_id)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_profiles_customer ON profiles(stripe_customer_id)")
        .execute(pool)
        .await?;

    tracing::info!("Migrations complete");
    Ok(())
}

// ============================================================
// Profiles
// ============================================================

/// Create the profile on first sight, refresh the email otherwise
pub async fn upsert_profile(
    pool: &SqlitePool,
    user_id: &str,
    email: Option<&str>,
) -> Result<DbProfile, sqlx::Error> {
    let now = Utc::now();

    sqlx::query(
        r#"
        INSERT INTO profiles (id, email, plan, created_at, updated_at)
        VALUES (?, ?, 'free', ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            email = COALESCE(excluded.email, profiles.email)
        "#,
    )
    .bind(user_id)
    .bind(email)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    sqlx::query_as(
        r#"
        SELECT id, email, plan, stripe_customer_id, created_at, updated_at
        FROM profiles
        WHERE id = ?
        "#,
    )
    .bind(user_id)
    .fetch_one(pool)
    .await
}

/// Link a Stripe customer to a profile. Returns false when no profile matched.
pub async fn set_customer_id(
    pool: &SqlitePool,
    user_id: &str,
    customer_id: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE profiles SET stripe_customer_id = ?, updated_at = ? WHERE id = ?",
    )
    .bind(customer_id)
    .bind(Utc::now())
    .bind(user_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Change the plan of whoever owns the Stripe customer. Returns rows updated.
pub async fn set_plan_by_customer(
    pool: &SqlitePool,
    customer_id: &str,
    plan: Plan,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE profiles SET plan = ?, updated_at = ? WHERE stripe_customer_id = ?",
    )
    .bind(plan.as_str())
    .bind(Utc::now())
    .bind(customer_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

pub async fn set_plan(pool: &SqlitePool, user_id: &str, plan: Plan) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("UPDATE profiles SET plan = ?, updated_at = ? WHERE id = ?")
        .bind(plan.as_str())
        .bind(Utc::now())
        .bind(user_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

// ============================================================
// Documents
// ============================================================

const DOCUMENT_COLUMNS: &str = "id, user_id, operation, file_name, content_type, storage_key, \
     size_bytes, page_count, metadata_json, created_at";

pub async fn insert_document(
    pool: &SqlitePool,
    doc: &NewDocument,
) -> Result<DbDocument, sqlx::Error> {
    let now = Utc::now();
    let metadata_json = doc.metadata.to_string();

    sqlx::query(
        r#"
        INSERT INTO documents (id, user_id, operation, file_name, content_type, storage_key,
                               size_bytes, page_count, metadata_json, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&doc.id)
    .bind(&doc.user_id)
    .bind(doc.operation.as_str())
    .bind(&doc.file_name)
    .bind(&doc.content_type)
    .bind(&doc.storage_key)
    .bind(doc.size_bytes as i64)
    .bind(doc.page_count.map(i64::from))
    .bind(&metadata_json)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(DbDocument {
        id: doc.id.clone(),
        user_id: doc.user_id.clone(),
        operation: doc.operation.as_str().to_string(),
        file_name: doc.file_name.clone(),
        content_type: doc.content_type.clone(),
        storage_key: doc.storage_key.clone(),
        size_bytes: doc.size_bytes as i64,
        page_count: doc.page_count.map(i64::from),
        metadata_json,
        created_at: now,
    })
}

/// Newest first
pub async fn list_documents(
    pool: &SqlitePool,
    user_id: &str,
    limit: u32,
    offset: u32,
) -> Result<Vec<DbDocument>, sqlx::Error> {
    let sql = format!(
        "SELECT {} FROM documents WHERE user_id = ? ORDER BY created_at DESC, rowid DESC LIMIT ? OFFSET ?",
        DOCUMENT_COLUMNS
    );
    sqlx::query_as(&sql)
        .bind(user_id)
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(pool)
        .await
}

pub async fn count_documents(pool: &SqlitePool, user_id: &str) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE user_id = ?")
        .bind(user_id)
        .fetch_one(pool)
        .await
}

pub async fn get_document(
    pool: &SqlitePool,
    user_id: &str,
    document_id: &str,
) -> Result<Option<DbDocument>, sqlx::Error> {
    let sql = format!(
        "SELECT {} FROM documents WHERE id = ? AND user_id = ?",
        DOCUMENT_COLUMNS
    );
    sqlx::query_as(&sql)
        .bind(document_id)
        .bind(user_id)
        .fetch_optional(pool)
        .await
}

/// Delete a document row and its chat history. Returns true if a row was removed.
pub async fn delete_document(
    pool: &SqlitePool,
    user_id: &str,
    document_id: &str,
) -> Result<bool, sqlx::Error> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM chat_messages WHERE document_id = ? AND user_id = ?")
        .bind(document_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    let result = sqlx::query("DELETE FROM documents WHERE id = ? AND user_id = ?")
        .bind(document_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(result.rows_affected() > 0)
}

// ============================================================
// Chat history
// ============================================================

pub async fn insert_chat_message(
    pool: &SqlitePool,
    user_id: &str,
    document_id: &str,
    role: &str,
    content: &str,
) -> Result<DbChatMessage, sqlx::Error> {
    let message = DbChatMessage {
        id: uuid::Uuid::new_v4().to_string(),
        document_id: document_id.to_string(),
        user_id: user_id.to_string(),
        role: role.to_string(),
        content: content.to_string(),
        created_at: Utc::now(),
    };

    sqlx::query(
        r#"
        INSERT INTO chat_messages (id, document_id, user_id, role, content, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&message.id)
    .bind(&message.document_id)
    .bind(&message.user_id)
    .bind(&message.role)
    .bind(&message.content)
    .bind(message.created_at)
    .execute(pool)
    .await?;

    Ok(message)
}

/// Full history, oldest first
pub async fn chat_history(
    pool: &SqlitePool,
    user_id: &str,
    document_id: &str,
) -> Result<Vec<DbChatMessage>, sqlx::Error> {
    sqlx::query_as(
        r#"
        SELECT id, document_id, user_id, role, content, created_at
        FROM chat_messages
        WHERE document_id = ? AND user_id = ?
        ORDER BY created_at ASC, rowid ASC
        "#,
    )
    .bind(document_id)
    .bind(user_id)
    .fetch_all(pool)
    .await
}

/// The last `limit` messages, oldest first
pub async fn recent_chat_messages(
    pool: &SqlitePool,
    user_id: &str,
    document_id: &str,
    limit: u32,
) -> Result<Vec<DbChatMessage>, sqlx::Error> {
    let mut messages: Vec<DbChatMessage> = sqlx::query_as(
        r#"
        SELECT id, document_id, user_id, role, content, created_at
        FROM chat_messages
        WHERE document_id = ? AND user_id = ?
        ORDER BY created_at DESC, rowid DESC
        LIMIT ?
        "#,
    )
    .bind(document_id)
    .bind(user_id)
    .bind(limit as i64)
    .fetch_all(pool)
    .await?;

    messages.reverse();
    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Operation;

    fn new_doc(id: &str, user_id: &str) -> NewDocument {
        NewDocument {
            id: id.to_string(),
            user_id: user_id.to_string(),
            operation: Operation::Merge,
            file_name: "merged.pdf".to_string(),
            content_type: "application/pdf".to_string(),
            storage_key: format!("{}/{}/merged.pdf", user_id, id),
            size_bytes: 1234,
            page_count: Some(3),
            metadata: serde_json::json!({ "inputs": 2 }),
        }
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let pool = connect_in_memory().await.unwrap();
        run_migrations(&pool).await.unwrap();
    }

    #[tokio::test]
    async fn test_upsert_profile_keeps_plan_and_email() {
        let pool = connect_in_memory().await.unwrap();

        let profile = upsert_profile(&pool, "u1", Some("a@example.com")).await.unwrap();
        assert_eq!(profile.plan(), Plan::Free);

        set_plan(&pool, "u1", Plan::Pro).await.unwrap();
        let profile = upsert_profile(&pool, "u1", None).await.unwrap();
        assert_eq!(profile.plan(), Plan::Pro);
        assert_eq!(profile.email.as_deref(), Some("a@example.com"));
    }

    #[tokio::test]
    async fn test_plan_by_customer() {
        let pool = connect_in_memory().await.unwrap();
        upsert_profile(&pool, "u1", None).await.unwrap();

        assert!(set_customer_id(&pool, "u1", "cus_123").await.unwrap());
        assert!(!set_customer_id(&pool, "nobody", "cus_999").await.unwrap());
        assert_eq!(set_plan_by_customer(&pool, "cus_123", Plan::Business).await.unwrap(), 1);

        let profile = upsert_profile(&pool, "u1", None).await.unwrap();
        assert_eq!(profile.plan(), Plan::Business);
    }

    #[tokio::test]
    async fn test_documents_are_scoped_to_owner() {
        let pool = connect_in_memory().await.unwrap();
        insert_document(&pool, &new_doc("d1", "alice")).await.unwrap();
        insert_document(&pool, &new_doc("d2", "alice")).await.unwrap();
        insert_document(&pool, &new_doc("d3", "bob")).await.unwrap();

        let alice = list_documents(&pool, "alice", 10, 0).await.unwrap();
        assert_eq!(alice.len(), 2);
        assert_eq!(alice[0].id, "d2");
        assert_eq!(count_documents(&pool, "alice").await.unwrap(), 2);

        assert!(get_document(&pool, "bob", "d1").await.unwrap().is_none());
        assert!(!delete_document(&pool, "bob", "d1").await.unwrap());
        assert!(delete_document(&pool, "alice", "d1").await.unwrap());
        assert!(get_document(&pool, "alice", "d1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_recent_chat_messages_are_chronological() {
        let pool = connect_in_memory().await.unwrap();
        for i in 0..5 {
            insert_chat_message(&pool, "u1", "d1", "user", &format!("m{}", i))
                .await
                .unwrap();
        }

        let recent = recent_chat_messages(&pool, "u1", "d1", 3).await.unwrap();
        let contents: Vec<&str> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m2", "m3", "m4"]);

        assert_eq!(chat_history(&pool, "u1", "d1").await.unwrap().len(), 5);
        assert!(chat_history(&pool, "u2", "d1").await.unwrap().is_empty());
    }
}
