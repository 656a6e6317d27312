use super::message::{Message, MessageId, ThreadId};
use parking_lot::Mutex;
use std::collections::HashSet;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Emitted after every mutation so renderers know what to redraw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    Appended(MessageId),
    ContentChanged(MessageId),
    Removed(MessageId),
    /// Contents were replaced or cleared wholesale.
    Reset,
}

/// Ordered log of the active thread's turns.
///
/// Meant to be driven by one chat session; the lock only exists because the
/// session's tasks may run on any worker thread.
pub struct MessageStore {
    messages: Mutex<Vec<Message>>,
    events: broadcast::Sender<StoreEvent>,
}

impl MessageStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            messages: Mutex::new(Vec::new()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    /// Append a message. A message whose id is already present is dropped.
    pub fn append(&self, message: Message) -> MessageId {
        let id = message.id.clone();
        {
            let mut messages = self.messages.lock();
            if messages.iter().any(|m| m.id == id) {
                warn!("refusing to append duplicate message id {}", id);
                return id;
            }
            messages.push(message);
        }
        self.notify(StoreEvent::Appended(id.clone()));
        id
    }

    /// Overwrite a message's content. Returns `false` if the id is absent.
    pub fn replace_content(&self, id: &MessageId, content: impl Into<String>) -> bool {
        let found = {
            let mut messages = self.messages.lock();
            match messages.iter_mut().find(|m| &m.id == id) {
                Some(m) => {
                    m.content = content.into();
                    true
                }
                None => false,
            }
        };
        if found {
            self.notify(StoreEvent::ContentChanged(id.clone()));
        } else {
            debug!("replace_content: message {} not in store", id);
        }
        found
    }

    pub fn remove_by_id(&self, id: &MessageId) -> bool {
        let removed = {
            let mut messages = self.messages.lock();
            let before = messages.len();
            messages.retain(|m| &m.id != id);
            messages.len() != before
        };
        if removed {
            self.notify(StoreEvent::Removed(id.clone()));
        }
        removed
    }

    /// Snapshot of the current log.
    pub fn all(&self) -> Vec<Message> {
        self.messages.lock().clone()
    }

    pub fn get(&self, id: &MessageId) -> Option<Message> {
        self.messages.lock().iter().find(|m| &m.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }

    /// Replace everything. Later duplicates of an id are dropped.
    pub fn replace_all(&self, incoming: Vec<Message>) {
        let mut seen = HashSet::new();
        let deduped: Vec<Message> = incoming
            .into_iter()
            .filter(|m| {
                let fresh = seen.insert(m.id.clone());
                if !fresh {
                    warn!("dropping duplicate message id {} on replace", m.id);
                }
                fresh
            })
            .collect();
        *self.messages.lock() = deduped;
        self.notify(StoreEvent::Reset);
    }

    pub fn clear(&self) {
        self.messages.lock().clear();
        self.notify(StoreEvent::Reset);
    }

    /// Stamp `thread_id` on every message that does not have one yet.
    pub fn assign_thread(&self, thread_id: &ThreadId) -> usize {
        let mut changed = Vec::new();
        {
            let mut messages = self.messages.lock();
            for m in messages.iter_mut().filter(|m| m.thread_id.is_none()) {
                m.thread_id = Some(thread_id.clone());
                changed.push(m.id.clone());
            }
        }
        let count = changed.len();
        for id in changed {
            self.notify(StoreEvent::ContentChanged(id));
        }
        count
    }

    fn notify(&self, event: StoreEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::message::Role;

    #[test]
    fn append_preserves_order() {
        let store = MessageStore::new();
        store.append(Message::user("one"));
        store.append(Message::assistant("two"));
        store.append(Message::user("three"));

        let contents: Vec<_> = store.all().into_iter().map(|m| m.content).collect();
        assert_eq!(contents, ["one", "two", "three"]);
    }

    #[test]
    fn duplicate_id_is_not_appended() {
        let store = MessageStore::new();
        let msg = Message::user("hello");
        store.append(msg.clone());
        store.append(msg);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn replace_content_on_missing_id_is_ignored() {
        let store = MessageStore::new();
        store.append(Message::user("hello"));
        assert!(!store.replace_content(&MessageId::from("nope"), "x"));
        assert_eq!(store.all()[0].content, "hello");
    }

    #[test]
    fn replace_and_remove() {
        let store = MessageStore::new();
        let id = store.append(Message::assistant(""));
        assert!(store.replace_content(&id, "filled"));
        assert_eq!(store.get(&id).unwrap().content, "filled");
        assert!(store.remove_by_id(&id));
        assert!(!store.remove_by_id(&id));
        assert!(store.is_empty());
    }

    #[test]
    fn snapshot_is_not_live() {
        let store = MessageStore::new();
        let id = store.append(Message::assistant("a"));
        let snapshot = store.all();
        store.replace_content(&id, "b");
        assert_eq!(snapshot[0].content, "a");
    }

    #[test]
    fn replace_all_drops_duplicate_ids() {
        let store = MessageStore::new();
        let a = Message::user("a");
        let b = Message::assistant("b");
        store.replace_all(vec![a.clone(), b, a]);
        assert_eq!(store.len(), 2);
        assert_eq!(store.all()[1].role, Role::Assistant);
    }

    #[test]
    fn assign_thread_only_fills_missing() {
        let store = MessageStore::new();
        store.append(Message::user("a").with_thread(Some(ThreadId::from("old"))));
        store.append(Message::user("b"));
        assert_eq!(store.assign_thread(&ThreadId::from("new")), 1);
        let all = store.all();
        assert_eq!(all[0].thread_id.as_ref().unwrap().as_str(), "old");
        assert_eq!(all[1].thread_id.as_ref().unwrap().as_str(), "new");
    }

    #[tokio::test]
    async fn subscribers_see_every_mutation() {
        let store = MessageStore::new();
        let mut rx = store.subscribe();

        let id = store.append(Message::assistant(""));
        store.replace_content(&id, "x");
        store.remove_by_id(&id);
        store.clear();

        assert_eq!(rx.recv().await.unwrap(), StoreEvent::Appended(id.clone()));
        assert_eq!(rx.recv().await.unwrap(), StoreEvent::ContentChanged(id.clone()));
        assert_eq!(rx.recv().await.unwrap(), StoreEvent::Removed(id));
        assert_eq!(rx.recv().await.unwrap(), StoreEvent::Reset);
    }
}
