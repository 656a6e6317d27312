use super::persistence::{title_of, ThreadPersistence, ThreadSummary};
use crate::messages::message::now_millis;
use crate::messages::{Message, PersonalityKey, ThreadId};
use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use uuid::Uuid;

struct StoredThread {
    user_id: String,
    personality: PersonalityKey,
    messages: Vec<Message>,
    updated_at: i64,
    /// Save counter, breaks `updated_at` ties in listings.
    revision: u64,
}

/// Process-local thread storage. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryThreadStore {
    threads: Mutex<HashMap<ThreadId, StoredThread>>,
    revisions: Mutex<u64>,
}

impl MemoryThreadStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.threads.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.lock().is_empty()
    }

    fn next_revision(&self) -> u64 {
        let mut revisions = self.revisions.lock();
        *revisions += 1;
        *revisions
    }
}

#[async_trait]
impl ThreadPersistence for MemoryThreadStore {
    async fn load_thread(&self, user_id: &str, thread_id: &ThreadId) -> Result<Vec<Message>> {
        let threads = self.threads.lock();
        match threads.get(thread_id) {
            Some(t) if t.user_id == user_id => Ok(t.messages.clone()),
            _ => bail!("thread {} not found", thread_id),
        }
    }

    async fn save_thread(
        &self,
        user_id: &str,
        personality: &PersonalityKey,
        messages: &[Message],
        thread_id: Option<&ThreadId>,
    ) -> Result<ThreadId> {
        let id = thread_id
            .cloned()
            .unwrap_or_else(|| ThreadId::new(Uuid::new_v4().to_string()));
        let revision = self.next_revision();
        let mut threads = self.threads.lock();
        if let Some(existing) = threads.get(&id) {
            if existing.user_id != user_id {
                bail!("thread {} belongs to another user", id);
            }
        }
        let stored: Vec<Message> = messages
            .iter()
            .cloned()
            .map(|m| m.with_thread(Some(id.clone())))
            .collect();
        threads.insert(
            id.clone(),
            StoredThread {
                user_id: user_id.to_string(),
                personality: personality.clone(),
                messages: stored,
                updated_at: now_millis(),
                revision,
            },
        );
        Ok(id)
    }

    async fn delete_thread(&self, user_id: &str, thread_id: &ThreadId) -> Result<bool> {
        let mut threads = self.threads.lock();
        match threads.get(thread_id) {
            Some(t) if t.user_id == user_id => {
                threads.remove(thread_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_threads(&self, user_id: &str) -> Result<Vec<ThreadSummary>> {
        let threads = self.threads.lock();
        let mut owned: Vec<(&ThreadId, &StoredThread)> =
            threads.iter().filter(|(_, t)| t.user_id == user_id).collect();
        owned.sort_by(|a, b| {
            (b.1.updated_at, b.1.revision).cmp(&(a.1.updated_at, a.1.revision))
        });
        Ok(owned
            .into_iter()
            .map(|(id, t)| ThreadSummary {
                thread_id: id.clone(),
                personality: t.personality.clone(),
                title: title_of(&t.messages),
                message_count: t.messages.len(),
                updated_at: t.updated_at,
            })
            .collect())
    }
}
