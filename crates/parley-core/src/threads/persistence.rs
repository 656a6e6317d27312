use crate::messages::{Message, PersonalityKey, Role, ThreadId};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One row of a thread listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadSummary {
    pub thread_id: ThreadId,
    pub personality: PersonalityKey,
    pub title: String,
    pub message_count: usize,
    /// Unix millis of the last save.
    pub updated_at: i64,
}

/// Where finished conversations live between sessions.
#[async_trait]
pub trait ThreadPersistence: Send + Sync {
    /// Messages of a thread in conversation order. Errors if the thread does
    /// not exist for `user_id`.
    async fn load_thread(&self, user_id: &str, thread_id: &ThreadId) -> Result<Vec<Message>>;

    /// Replace the stored contents of `thread_id`, or create a new thread
    /// when it is `None`. Returns the id the messages were stored under.
    ///
    /// Every message comes back from `load_thread` carrying that id, even one
    /// that was saved with a different `thread_id` of its own.
    async fn save_thread(
        &self,
        user_id: &str,
        personality: &PersonalityKey,
        messages: &[Message],
        thread_id: Option<&ThreadId>,
    ) -> Result<ThreadId>;

    /// Returns `false` if there was nothing to delete.
    async fn delete_thread(&self, user_id: &str, thread_id: &ThreadId) -> Result<bool>;

    /// Most recently updated first.
    async fn list_threads(&self, user_id: &str) -> Result<Vec<ThreadSummary>>;
}

#[async_trait]
impl<T: ThreadPersistence + ?Sized> ThreadPersistence for Arc<T> {
    async fn load_thread(&self, user_id: &str, thread_id: &ThreadId) -> Result<Vec<Message>> {
        (**self).load_thread(user_id, thread_id).await
    }

    async fn save_thread(
        &self,
        user_id: &str,
        personality: &PersonalityKey,
        messages: &[Message],
        thread_id: Option<&ThreadId>,
    ) -> Result<ThreadId> {
        (**self)
            .save_thread(user_id, personality, messages, thread_id)
            .await
    }

    async fn delete_thread(&self, user_id: &str, thread_id: &ThreadId) -> Result<bool> {
        (**self).delete_thread(user_id, thread_id).await
    }

    async fn list_threads(&self, user_id: &str) -> Result<Vec<ThreadSummary>> {
        (**self).list_threads(user_id).await
    }
}

const TITLE_CHARS: usize = 60;

/// First user line, shortened for listings.
pub(crate) fn title_of(messages: &[Message]) -> String {
    let Some(first) = messages
        .iter()
        .find(|m| m.role == Role::User && !m.content.trim().is_empty())
    else {
        return "(untitled)".to_string();
    };
    let line = first.content.trim().lines().next().unwrap_or_default();
    if line.chars().count() > TITLE_CHARS {
        let cut: String = line.chars().take(TITLE_CHARS - 1).collect();
        format!("{cut}…")
    } else {
        line.to_string()
    }
}
