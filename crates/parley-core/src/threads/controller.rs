use super::persistence::{ThreadPersistence, ThreadSummary};
use crate::error::ChatError;
use crate::messages::{Message, MessageStore, PersonalityKey, Role, ThreadId};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A thread fetched from persistence, not yet installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedThread {
    pub thread_id: ThreadId,
    pub messages: Vec<Message>,
    /// Personality of the last assistant turn that recorded one.
    pub personality: Option<PersonalityKey>,
}

/// Owns the identity of the active thread and moves threads between the
/// message store and persistence.
pub struct ThreadController {
    store: Arc<MessageStore>,
    persistence: Arc<dyn ThreadPersistence>,
    user_id: String,
    current: Mutex<Option<ThreadId>>,
}

impl ThreadController {
    pub fn new(
        store: Arc<MessageStore>,
        persistence: Arc<dyn ThreadPersistence>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            persistence,
            user_id: user_id.into(),
            current: Mutex::new(None),
        }
    }

    pub fn current(&self) -> Option<ThreadId> {
        self.current.lock().clone()
    }

    pub fn set_current(&self, thread_id: ThreadId) {
        let mut current = self.current.lock();
        if current.as_ref() != Some(&thread_id) {
            debug!("active thread is now {}", thread_id);
        }
        *current = Some(thread_id);
    }

    /// Forget the active thread; the next send opens a new one.
    pub fn reset(&self) {
        *self.current.lock() = None;
    }

    /// Read a thread without touching the store or `current`.
    pub async fn fetch(&self, thread_id: &ThreadId) -> Result<LoadedThread, ChatError> {
        let messages = self
            .persistence
            .load_thread(&self.user_id, thread_id)
            .await
            .map_err(|e| ChatError::ThreadLoad {
                thread_id: thread_id.to_string(),
                reason: e.to_string(),
            })?;
        let messages: Vec<Message> = messages
            .into_iter()
            .map(|m| match m.thread_id {
                Some(_) => m,
                None => m.with_thread(Some(thread_id.clone())),
            })
            .collect();
        let personality = infer_personality(&messages);
        Ok(LoadedThread {
            thread_id: thread_id.clone(),
            messages,
            personality,
        })
    }

    /// Make `loaded` the active thread, replacing the store wholesale.
    pub fn install(&self, loaded: &LoadedThread) {
        self.store.replace_all(loaded.messages.clone());
        self.set_current(loaded.thread_id.clone());
        info!(
            "loaded thread {} ({} messages)",
            loaded.thread_id,
            loaded.messages.len()
        );
    }

    /// `fetch` then `install`. On error nothing changes.
    pub async fn load_thread(&self, thread_id: &ThreadId) -> Result<LoadedThread, ChatError> {
        let loaded = self.fetch(thread_id).await?;
        self.install(&loaded);
        Ok(loaded)
    }

    /// Persist `messages` under `thread_id`, or a new thread when `None`.
    /// Does not change `current`; see [`ThreadController::adopt`].
    pub async fn save(
        &self,
        personality: &PersonalityKey,
        messages: &[Message],
        thread_id: Option<&ThreadId>,
    ) -> Result<ThreadId, ChatError> {
        self.persistence
            .save_thread(&self.user_id, personality, messages, thread_id)
            .await
            .map_err(|e| ChatError::Persistence(e.to_string()))
    }

    /// Accept `thread_id` as the active thread after a save and stamp it on
    /// messages that have none yet.
    pub fn adopt(&self, thread_id: &ThreadId) {
        self.set_current(thread_id.clone());
        self.store.assign_thread(thread_id);
    }

    /// Deleting the active thread also resets `current`.
    pub async fn delete(&self, thread_id: &ThreadId) -> Result<bool, ChatError> {
        let deleted = self
            .persistence
            .delete_thread(&self.user_id, thread_id)
            .await
            .map_err(|e| ChatError::Persistence(e.to_string()))?;
        if deleted {
            let mut current = self.current.lock();
            if current.as_ref() == Some(thread_id) {
                *current = None;
            }
        } else {
            warn!("thread {} was not found for deletion", thread_id);
        }
        Ok(deleted)
    }

    pub async fn list(&self) -> Result<Vec<ThreadSummary>, ChatError> {
        self.persistence
            .list_threads(&self.user_id)
            .await
            .map_err(|e| ChatError::Persistence(e.to_string()))
    }
}

fn infer_personality(messages: &[Message]) -> Option<PersonalityKey> {
    messages
        .iter()
        .rev()
        .filter(|m| m.role == Role::Assistant)
        .find_map(|m| m.personality.clone())
}
