//! Finds or creates the durable conversation thread for a turn.
//!
//! Storage sits behind the `ThreadStore` trait. `AppState` carries an
//! `Arc<dyn ThreadStore>`: `PgThreadStore` when a database is configured,
//! `InMemoryThreadStore` otherwise.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::chat::{ChatMessageRow, ChatThread, Role};

// ────────────────────────────────────────────────────────────────────────────
// Trait definition
// ────────────────────────────────────────────────────────────────────────────

#[async_trait]
pub trait ThreadStore: Send + Sync {
    /// Returns the thread only if it exists AND belongs to `user_id`.
    async fn find_thread(&self, id: &str, user_id: &str) -> Result<Option<ChatThread>, AppError>;

    async fn create_thread(
        &self,
        user_id: &str,
        resume_id: Option<i64>,
    ) -> Result<ChatThread, AppError>;

    async fn append_message(
        &self,
        thread_id: &str,
        role: Role,
        content: &str,
    ) -> Result<ChatMessageRow, AppError>;

    /// Messages of a thread, oldest first.
    async fn list_messages(&self, thread_id: &str) -> Result<Vec<ChatMessageRow>, AppError>;
}

/// Reuses the caller's thread when it is theirs; otherwise starts a new one.
///
/// An unknown or foreign `thread_id` is not an error: the turn simply lands in
/// a fresh thread whose id is echoed back in the `done` frame.
pub async fn resolve_thread(
    store: &dyn ThreadStore,
    thread_id: Option<&str>,
    user_id: &str,
    resume_id: Option<i64>,
) -> Result<ChatThread, AppError> {
    if let Some(id) = thread_id {
        if let Some(thread) = store.find_thread(id, user_id).await? {
            debug!("Reusing chat thread {} for user {}", thread.id, user_id);
            return Ok(thread);
        }
        info!("Thread {id} not usable by user {user_id}, creating a new one");
    }

    let thread = store.create_thread(user_id, resume_id).await?;
    info!(
        "Created chat thread {} for user {} (resume: {:?})",
        thread.id, user_id, thread.resume_id
    );
    Ok(thread)
}

// ────────────────────────────────────────────────────────────────────────────
// PgThreadStore
// ────────────────────────────────────────────────────────────────────────────

/// Postgres-backed store.
///
/// Expects:
/// ```sql
/// CREATE TABLE chat_threads (
///     id TEXT PRIMARY KEY,
///     user_id TEXT NOT NULL,
///     resume_id BIGINT,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT now()
/// );
/// CREATE TABLE chat_messages (
///     id TEXT PRIMARY KEY,
///     thread_id TEXT NOT NULL REFERENCES chat_threads(id) ON DELETE CASCADE,
///     role TEXT NOT NULL,
///     content TEXT NOT NULL,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT now()
/// );
/// ```
#[derive(Clone)]
pub struct PgThreadStore {
    pool: PgPool,
}

impl PgThreadStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ThreadStore for PgThreadStore {
    async fn find_thread(&self, id: &str, user_id: &str) -> Result<Option<ChatThread>, AppError> {
        Ok(sqlx::query_as::<_, ChatThread>(
            "SELECT * FROM chat_threads WHERE id = $1 AND user_id = $2",
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn create_thread(
        &self,
        user_id: &str,
        resume_id: Option<i64>,
    ) -> Result<ChatThread, AppError> {
        Ok(sqlx::query_as::<_, ChatThread>(
            r#"
            INSERT INTO chat_threads (id, user_id, resume_id)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(user_id)
        .bind(resume_id)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn append_message(
        &self,
        thread_id: &str,
        role: Role,
        content: &str,
    ) -> Result<ChatMessageRow, AppError> {
        Ok(sqlx::query_as::<_, ChatMessageRow>(
            r#"
            INSERT INTO chat_messages (id, thread_id, role, content)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(thread_id)
        .bind(role.as_str())
        .bind(content)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn list_messages(&self, thread_id: &str) -> Result<Vec<ChatMessageRow>, AppError> {
        Ok(sqlx::query_as::<_, ChatMessageRow>(
            "SELECT * FROM chat_messages WHERE thread_id = $1 ORDER BY created_at ASC, id ASC",
        )
        .bind(thread_id)
        .fetch_all(&self.pool)
        .await?)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// InMemoryThreadStore
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct MemoryTables {
    threads: HashMap<String, ChatThread>,
    messages: HashMap<String, Vec<ChatMessageRow>>,
}

/// Process-local store. Used when no `DATABASE_URL` is configured, and in tests.
#[derive(Default)]
pub struct InMemoryThreadStore {
    tables: RwLock<MemoryTables>,
}

impl InMemoryThreadStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn thread_count(&self) -> usize {
        self.tables.read().await.threads.len()
    }
}

#[async_trait]
impl ThreadStore for InMemoryThreadStore {
    async fn find_thread(&self, id: &str, user_id: &str) -> Result<Option<ChatThread>, AppError> {
        let tables = self.tables.read().await;
        Ok(tables
            .threads
            .get(id)
            .filter(|thread| thread.user_id == user_id)
            .cloned())
    }

    async fn create_thread(
        &self,
        user_id: &str,
        resume_id: Option<i64>,
    ) -> Result<ChatThread, AppError> {
        let thread = ChatThread {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            resume_id,
            created_at: Utc::now(),
        };
        self.tables
            .write()
            .await
            .threads
            .insert(thread.id.clone(), thread.clone());
        Ok(thread)
    }

    async fn append_message(
        &self,
        thread_id: &str,
        role: Role,
        content: &str,
    ) -> Result<ChatMessageRow, AppError> {
        let mut tables = self.tables.write().await;
        if !tables.threads.contains_key(thread_id) {
            return Err(AppError::NotFound(format!("Thread {thread_id} not found")));
        }
        let row = ChatMessageRow {
            id: Uuid::new_v4().to_string(),
            thread_id: thread_id.to_string(),
            role: role.as_str().to_string(),
            content: content.to_string(),
            created_at: Utc::now(),
        };
        tables
            .messages
            .entry(thread_id.to_string())
            .or_default()
            .push(row.clone());
        Ok(row)
    }

    async fn list_messages(&self, thread_id: &str) -> Result<Vec<ChatMessageRow>, AppError> {
        let tables = self.tables.read().await;
        Ok(tables.messages.get(thread_id).cloned().unwrap_or_default())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_no_thread_id_creates_thread_with_resume() {
        let store = InMemoryThreadStore::new();
        let thread = resolve_thread(&store, None, "user-1", Some(42)).await.unwrap();

        assert_eq!(thread.user_id, "user-1");
        assert_eq!(thread.resume_id, Some(42));
        assert_eq!(store.thread_count().await, 1);
    }

    #[tokio::test]
    async fn test_owned_thread_is_reused() {
        let store = InMemoryThreadStore::new();
        let first = resolve_thread(&store, None, "user-1", None).await.unwrap();
        let second = resolve_thread(&store, Some(&first.id), "user-1", None)
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(store.thread_count().await, 1);
    }

    #[tokio::test]
    async fn test_foreign_thread_falls_through_to_creation() {
        let store = InMemoryThreadStore::new();
        let theirs = resolve_thread(&store, None, "user-1", None).await.unwrap();
        let mine = resolve_thread(&store, Some(&theirs.id), "user-2", None)
            .await
            .unwrap();

        assert_ne!(theirs.id, mine.id);
        assert_eq!(mine.user_id, "user-2");
        assert_eq!(store.thread_count().await, 2);
    }

    #[tokio::test]
    async fn test_unknown_thread_id_falls_through_to_creation() {
        let store = InMemoryThreadStore::new();
        let thread = resolve_thread(&store, Some("does-not-exist"), "user-1", Some(7))
            .await
            .unwrap();

        assert_ne!(thread.id, "does-not-exist");
        assert_eq!(thread.resume_id, Some(7));
    }

    #[tokio::test]
    async fn test_messages_are_listed_in_append_order() {
        let store = InMemoryThreadStore::new();
        let thread = store.create_thread("user-1", None).await.unwrap();
        store
            .append_message(&thread.id, Role::User, "Review my summary")
            .await
            .unwrap();
        store
            .append_message(&thread.id, Role::Assistant, "Improve it.")
            .await
            .unwrap();

        let messages = store.list_messages(&thread.id).await.unwrap();
        let roles: Vec<_> = messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["user", "assistant"]);
        assert_eq!(messages[1].content, "Improve it.");
    }

    #[tokio::test]
    async fn test_append_to_missing_thread_is_not_found() {
        let store = InMemoryThreadStore::new();
        let err = store
            .append_message("missing", Role::User, "hi")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
