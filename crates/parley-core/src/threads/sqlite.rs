use super::persistence::{title_of, ThreadPersistence, ThreadSummary};
use crate::messages::message::now_millis;
use crate::messages::{Message, MessageId, PersonalityKey, Role, ThreadId};
use anyhow::{bail, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::path::Path;
use tracing::debug;
use uuid::Uuid;

// ── Schema ────────────────────────────────────────────────────────────────────

const MIGRATE: &str = r#"
CREATE TABLE IF NOT EXISTS threads (
    id          TEXT    PRIMARY KEY,
    user_id     TEXT    NOT NULL,
    personality TEXT    NOT NULL,
    title       TEXT    NOT NULL,
    created_at  INTEGER NOT NULL,
    updated_at  INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS messages (
    thread_id   TEXT    NOT NULL REFERENCES threads(id),
    position    INTEGER NOT NULL,
    id          TEXT    NOT NULL,
    role        TEXT    NOT NULL,
    content     TEXT    NOT NULL,
    personality TEXT,
    created_at  INTEGER NOT NULL,
    PRIMARY KEY (thread_id, position)
);

CREATE INDEX IF NOT EXISTS threads_by_user ON threads (user_id, updated_at);
"#;

// ── SqliteThreadStore ─────────────────────────────────────────────────────────

/// Threads in a local SQLite file, one row per message.
pub struct SqliteThreadStore {
    pool: SqlitePool,
}

impl SqliteThreadStore {
    pub async fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        let pool = SqlitePool::connect(&url).await?;
        sqlx::query(MIGRATE).execute(&pool).await?;
        Ok(Self { pool })
    }

    async fn owns(&self, user_id: &str, thread_id: &ThreadId) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM threads WHERE id = ? AND user_id = ?")
            .bind(thread_id.as_str())
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    fn row_to_message(r: sqlx::sqlite::SqliteRow, thread_id: &ThreadId) -> Result<Message> {
        let role: String = r.try_get("role")?;
        let Some(role) = Role::parse(&role) else {
            bail!("unknown role '{}' in thread {}", role, thread_id);
        };
        let personality: Option<String> = r.try_get("personality")?;
        Ok(Message {
            id: MessageId::new(r.try_get::<String, _>("id")?),
            role,
            content: r.try_get("content")?,
            personality: personality.map(PersonalityKey::new),
            thread_id: Some(thread_id.clone()),
            created_at: r.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl ThreadPersistence for SqliteThreadStore {
    async fn load_thread(&self, user_id: &str, thread_id: &ThreadId) -> Result<Vec<Message>> {
        if !self.owns(user_id, thread_id).await? {
            bail!("thread {} not found", thread_id);
        }
        let rows = sqlx::query(
            "SELECT id, role, content, personality, created_at FROM messages \
             WHERE thread_id = ? ORDER BY position ASC",
        )
        .bind(thread_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|r| Self::row_to_message(r, thread_id))
            .collect()
    }

    async fn save_thread(
        &self,
        user_id: &str,
        personality: &PersonalityKey,
        messages: &[Message],
        thread_id: Option<&ThreadId>,
    ) -> Result<ThreadId> {
        let now = now_millis();
        let title = title_of(messages);
        let mut tx = self.pool.begin().await?;

        let existing = match thread_id {
            Some(id) => sqlx::query("SELECT user_id FROM threads WHERE id = ?")
                .bind(id.as_str())
                .fetch_optional(&mut *tx)
                .await?
                .map(|r| r.try_get::<String, _>("user_id"))
                .transpose()?,
            None => None,
        };

        let id = match (thread_id, existing) {
            (Some(id), Some(owner)) => {
                if owner != user_id {
                    bail!("thread {} belongs to another user", id);
                }
                sqlx::query("UPDATE threads SET personality = ?, title = ?, updated_at = ? WHERE id = ?")
                    .bind(personality.as_str())
                    .bind(&title)
                    .bind(now)
                    .bind(id.as_str())
                    .execute(&mut *tx)
                    .await?;
                sqlx::query("DELETE FROM messages WHERE thread_id = ?")
                    .bind(id.as_str())
                    .execute(&mut *tx)
                    .await?;
                id.clone()
            }
            (known, _) => {
                let id = known
                    .cloned()
                    .unwrap_or_else(|| ThreadId::new(Uuid::new_v4().to_string()));
                sqlx::query(
                    "INSERT INTO threads (id, user_id, personality, title, created_at, updated_at) \
                     VALUES (?, ?, ?, ?, ?, ?)",
                )
                .bind(id.as_str())
                .bind(user_id)
                .bind(personality.as_str())
                .bind(&title)
                .bind(now)
                .bind(now)
                .execute(&mut *tx)
                .await?;
                id
            }
        };

        for (position, message) in messages.iter().enumerate() {
            sqlx::query(
                "INSERT INTO messages \
                 (thread_id, position, id, role, content, personality, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(id.as_str())
            .bind(position as i64)
            .bind(message.id.as_str())
            .bind(message.role.as_str())
            .bind(&message.content)
            .bind(message.personality.as_ref().map(PersonalityKey::as_str))
            .bind(message.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!("saved {} messages to thread {}", messages.len(), id);
        Ok(id)
    }

    async fn delete_thread(&self, user_id: &str, thread_id: &ThreadId) -> Result<bool> {
        if !self.owns(user_id, thread_id).await? {
            return Ok(false);
        }
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM messages WHERE thread_id = ?")
            .bind(thread_id.as_str())
            .execute(&mut *tx)
            .await?;
        let deleted = sqlx::query("DELETE FROM threads WHERE id = ? AND user_id = ?")
            .bind(thread_id.as_str())
            .bind(user_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        Ok(deleted > 0)
    }

    async fn list_threads(&self, user_id: &str) -> Result<Vec<ThreadSummary>> {
        let rows = sqlx::query(
            "SELECT t.id, t.personality, t.title, t.updated_at, COUNT(m.id) AS message_count \
             FROM threads t LEFT JOIN messages m ON m.thread_id = t.id \
             WHERE t.user_id = ? \
             GROUP BY t.id \
             ORDER BY t.updated_at DESC, t.rowid DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| {
                Ok(ThreadSummary {
                    thread_id: ThreadId::new(r.try_get::<String, _>("id")?),
                    personality: PersonalityKey::new(r.try_get::<String, _>("personality")?),
                    title: r.try_get("title")?,
                    message_count: r.try_get::<i64, _>("message_count")? as usize,
                    updated_at: r.try_get("updated_at")?,
                })
            })
            .collect()
    }
}
