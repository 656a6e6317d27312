//! The chat session: one conversation, one persona, at most one run in
//! flight and at most one reply being revealed.
//!
//! The orchestrator wires the message store, the typing animator, the thread
//! controller and the run dispatcher together. Dispatcher events arrive on a
//! pump task and are applied under the session lock, which re-checks that the
//! event belongs to the reply the session is still waiting for.

use super::events::ChatEvent;
use crate::config::{BusyPolicy, ParleyConfig};
use crate::error::ChatError;
use crate::messages::{Message, MessageId, MessageStore, PersonalityKey, StoreEvent, ThreadId};
use crate::personas::PersonaRegistry;
use crate::runs::{
    AssistantTransport, RequestId, RunCompletion, RunDispatcher, RunEvent, RunEventKind, RunPhase,
    RunRequest,
};
use crate::threads::{
    LoadedThread, MemoryThreadStore, ThreadController, ThreadPersistence, ThreadSummary,
};
use crate::typing::{OnTypingDone, TypingAnimator, TypingDone, TypingPhase};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct PendingReply {
    request_id: RequestId,
    placeholder: MessageId,
}

struct Session {
    personality: PersonalityKey,
    pending: Option<PendingReply>,
    /// Bumped whenever the conversation is replaced, so saves started for an
    /// earlier conversation cannot adopt a thread id afterwards.
    epoch: u64,
}

impl Session {
    fn is_pending(&self, request_id: RequestId) -> bool {
        matches!(&self.pending, Some(p) if p.request_id == request_id)
    }
}

struct Inner {
    store: Arc<MessageStore>,
    animator: TypingAnimator,
    threads: ThreadController,
    dispatcher: RunDispatcher,
    personas: PersonaRegistry,
    user_id: String,
    chars_per_tick: usize,
    busy_policy: BusyPolicy,
    auto_save: bool,
    session: Mutex<Session>,
    /// Serializes saves so two replies never race to create a thread.
    save_lock: tokio::sync::Mutex<()>,
    events: broadcast::Sender<ChatEvent>,
}

pub struct ChatOrchestratorBuilder {
    config: ParleyConfig,
    transport: Arc<dyn AssistantTransport>,
    persistence: Arc<dyn ThreadPersistence>,
    personas: PersonaRegistry,
    personality: Option<PersonalityKey>,
}

impl ChatOrchestratorBuilder {
    pub fn new(config: ParleyConfig, transport: impl AssistantTransport + 'static) -> Self {
        Self {
            config,
            transport: Arc::new(transport),
            persistence: Arc::new(MemoryThreadStore::new()),
            personas: PersonaRegistry::default(),
            personality: None,
        }
    }

    pub fn persistence(mut self, persistence: impl ThreadPersistence + 'static) -> Self {
        self.persistence = Arc::new(persistence);
        self
    }

    pub fn personas(mut self, personas: PersonaRegistry) -> Self {
        self.personas = personas;
        self
    }

    /// Starting persona. Defaults to `default_personality` from the config.
    pub fn personality(mut self, key: impl Into<PersonalityKey>) -> Self {
        self.personality = Some(key.into());
        self
    }

    /// Must be called from within a tokio runtime.
    ///
    /// An unknown persona passed to [`personality`](Self::personality) is an
    /// error. An unknown `default_personality` from the config falls back to
    /// the first registered persona.
    pub fn build(self) -> Result<ChatOrchestrator, ChatError> {
        let personality = match self.personality {
            Some(key) if self.personas.contains(&key) => key,
            Some(key) => return Err(ChatError::UnknownPersonality(key.to_string())),
            None => {
                let configured = PersonalityKey::new(self.config.default_personality.clone());
                if self.personas.contains(&configured) {
                    configured
                } else {
                    let fallback = self
                        .personas
                        .first()
                        .map(|p| p.key.clone())
                        .ok_or_else(|| ChatError::UnknownPersonality(configured.to_string()))?;
                    warn!(
                        "default personality {} is not installed, using {}",
                        configured, fallback
                    );
                    fallback
                }
            }
        };

        let store = Arc::new(MessageStore::new());
        let animator = TypingAnimator::new(Arc::clone(&store), self.config.typing_tick());
        let threads = ThreadController::new(
            Arc::clone(&store),
            self.persistence,
            self.config.user_id.clone(),
        );
        let (dispatcher, runs) = RunDispatcher::new(self.transport, self.config.poll_policy());
        let (events, _) = broadcast::channel(64);

        let inner = Arc::new(Inner {
            store,
            animator,
            threads,
            dispatcher,
            personas: self.personas,
            user_id: self.config.user_id,
            chars_per_tick: self.config.typing_chars_per_tick,
            busy_policy: self.config.busy_policy,
            auto_save: self.config.auto_save,
            session: Mutex::new(Session {
                personality: personality.clone(),
                pending: None,
                epoch: 0,
            }),
            save_lock: tokio::sync::Mutex::new(()),
            events,
        });
        inner.seed_greeting(&personality);

        let pump = tokio::spawn(pump(Arc::downgrade(&inner), runs));
        info!("chat session started with {}", personality);
        Ok(ChatOrchestrator { inner, pump })
    }
}

/// Drives one conversation with the remote assistant.
///
/// Dropping it cancels the in-flight run and any reveal in progress.
pub struct ChatOrchestrator {
    inner: Arc<Inner>,
    pump: JoinHandle<()>,
}

impl ChatOrchestrator {
    /// Append `text` and a placeholder reply, then dispatch it.
    ///
    /// A reveal still in progress is finished first. While another run is in
    /// flight the configured [`BusyPolicy`] decides between refusing and
    /// superseding it.
    pub fn send_message(&self, text: &str) -> Result<RequestId, ChatError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        let inner = &self.inner;
        if inner.busy_policy == BusyPolicy::Reject && self.is_busy() {
            return Err(ChatError::Busy);
        }

        // Outside the session lock: finishing fires the reveal's callback.
        inner.animator.skip();

        let mut session = inner.session.lock();
        if let Some(previous) = session.pending.take() {
            if inner.busy_policy == BusyPolicy::Reject {
                session.pending = Some(previous);
                return Err(ChatError::Busy);
            }
            debug!("{} superseded by a new message", previous.request_id);
            inner.store.remove_by_id(&previous.placeholder);
        }

        let personality = session.personality.clone();
        let thread_id = inner.threads.current();
        inner
            .store
            .append(Message::user(text).with_thread(thread_id.clone()));
        let placeholder = inner.store.append(
            Message::assistant("")
                .with_personality(personality.clone())
                .with_thread(thread_id.clone()),
        );

        let request_id = inner.dispatcher.send(RunRequest {
            message: text.to_string(),
            thread_id,
            personality,
            user_id: inner.user_id.clone(),
        });
        session.pending = Some(PendingReply {
            request_id,
            placeholder,
        });
        Ok(request_id)
    }

    /// Change persona. Always starts a new conversation; returns `false` if
    /// `key` is already active.
    pub fn switch_personality(&self, key: impl Into<PersonalityKey>) -> Result<bool, ChatError> {
        let key = key.into();
        if !self.inner.personas.contains(&key) {
            return Err(ChatError::UnknownPersonality(key.to_string()));
        }
        let mut session = self.inner.session.lock();
        if session.personality == key {
            return Ok(false);
        }
        info!("switching personality {} -> {}", session.personality, key);
        self.inner.start_over(&mut session, key);
        Ok(true)
    }

    /// Replace the conversation with a stored thread.
    ///
    /// The thread is read before anything is torn down, so a failed load
    /// leaves the current conversation and any in-flight run alone. A thread
    /// written by a persona that is not installed is refused.
    pub async fn load_thread(&self, thread_id: &ThreadId) -> Result<LoadedThread, ChatError> {
        let loaded = self.inner.threads.fetch(thread_id).await?;
        if let Some(p) = &loaded.personality {
            if !self.inner.personas.contains(p) {
                warn!("thread {} uses unknown personality {}", thread_id, p);
                return Err(ChatError::ThreadLoad {
                    thread_id: thread_id.to_string(),
                    reason: format!("personality {p} is not installed"),
                });
            }
        }

        let mut session = self.inner.session.lock();
        self.inner.teardown(&mut session);
        session.epoch += 1;
        self.inner.threads.install(&loaded);
        if let Some(p) = &loaded.personality {
            session.personality = p.clone();
        }
        Ok(loaded)
    }

    /// Fresh conversation with the current persona.
    pub fn new_chat(&self) {
        let mut session = self.inner.session.lock();
        let personality = session.personality.clone();
        self.inner.start_over(&mut session, personality);
    }

    /// Deleting the active thread also starts a new conversation.
    pub async fn delete_thread(&self, thread_id: &ThreadId) -> Result<bool, ChatError> {
        let was_current = self.inner.threads.current().as_ref() == Some(thread_id);
        let deleted = self.inner.threads.delete(thread_id).await?;
        if deleted && was_current {
            self.new_chat();
        }
        Ok(deleted)
    }

    pub async fn list_threads(&self) -> Result<Vec<ThreadSummary>, ChatError> {
        self.inner.threads.list().await
    }

    /// Stop the in-flight run and any reveal. Returns `true` if there was
    /// anything to stop.
    pub fn cancel(&self) -> bool {
        let mut session = self.inner.session.lock();
        self.inner.teardown(&mut session)
    }

    /// Show the rest of the reply being revealed right away.
    pub fn skip_typing(&self) -> bool {
        self.inner.animator.skip()
    }

    /// A reply has been requested and not yet arrived.
    pub fn is_busy(&self) -> bool {
        self.inner.session.lock().pending.is_some()
    }

    pub fn typing_phase(&self) -> TypingPhase {
        self.inner.animator.phase()
    }

    pub fn run_phase(&self) -> RunPhase {
        self.inner.dispatcher.phase()
    }

    pub fn active_personality(&self) -> PersonalityKey {
        self.inner.session.lock().personality.clone()
    }

    pub fn current_thread(&self) -> Option<ThreadId> {
        self.inner.threads.current()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.inner.store.all()
    }

    pub fn personas(&self) -> &PersonaRegistry {
        &self.inner.personas
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.inner.events.subscribe()
    }

    pub fn subscribe_store(&self) -> broadcast::Receiver<StoreEvent> {
        self.inner.store.subscribe()
    }

    pub fn store(&self) -> &Arc<MessageStore> {
        &self.inner.store
    }
}

impl Drop for ChatOrchestrator {
    fn drop(&mut self) {
        self.pump.abort();
        let mut session = self.inner.session.lock();
        self.inner.teardown(&mut session);
    }
}

async fn pump(inner: Weak<Inner>, mut runs: mpsc::UnboundedReceiver<RunEvent>) {
    while let Some(event) = runs.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.on_run_event(event);
    }
}

impl Inner {
    fn emit(&self, event: ChatEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }

    fn seed_greeting(&self, personality: &PersonalityKey) {
        if let Some(greeting) = self.personas.greeting(personality).filter(|g| !g.is_empty()) {
            self.store
                .append(Message::assistant(greeting).with_personality(personality.clone()));
        }
    }

    /// Cancel the run and the reveal and drop the pending placeholder.
    fn teardown(&self, session: &mut Session) -> bool {
        let mut stopped = false;
        if let Some(pending) = session.pending.take() {
            self.store.remove_by_id(&pending.placeholder);
            stopped = true;
        }
        stopped |= self.dispatcher.cancel();
        if self.animator.phase() == TypingPhase::Typing {
            stopped = true;
        }
        self.animator.cancel();
        stopped
    }

    fn start_over(&self, session: &mut Session, personality: PersonalityKey) {
        self.teardown(session);
        session.epoch += 1;
        session.personality = personality.clone();
        self.threads.reset();
        self.store.clear();
        self.seed_greeting(&personality);
    }

    fn on_run_event(self: &Arc<Self>, event: RunEvent) {
        let RunEvent { request_id, kind } = event;
        match kind {
            RunEventKind::Accepted(handle) => {
                let session = self.session.lock();
                if !session.is_pending(request_id) {
                    debug!("ignoring acceptance for superseded {}", request_id);
                    return;
                }
                self.threads.set_current(handle.thread_id);
            }
            RunEventKind::Completed(completion) => self.on_completed(request_id, completion),
            RunEventKind::Failed(error) => self.on_failed(request_id, error),
        }
    }

    fn on_completed(self: &Arc<Self>, request_id: RequestId, completion: RunCompletion) {
        let mut session = self.session.lock();
        if !session.is_pending(request_id) || !self.dispatcher.is_current(request_id) {
            debug!("dropping completion for superseded {}", request_id);
            return;
        }
        let Some(pending) = session.pending.take() else {
            return;
        };

        self.threads.adopt(&completion.handle.thread_id);
        let on_done = self.on_typing_done(session.epoch, completion.personality);
        self.animator.start(
            pending.placeholder,
            completion.content,
            self.chars_per_tick,
            on_done,
        );
    }

    fn on_failed(&self, request_id: RequestId, error: ChatError) {
        {
            let mut session = self.session.lock();
            if !session.is_pending(request_id) {
                debug!("dropping failure for superseded {}: {}", request_id, error);
                return;
            }
            if let Some(pending) = session.pending.take() {
                self.store.remove_by_id(&pending.placeholder);
            }
        }
        if !error.is_cancelled() {
            self.emit(ChatEvent::error(error));
        }
    }

    fn on_typing_done(self: &Arc<Self>, epoch: u64, personality: PersonalityKey) -> OnTypingDone {
        let inner = Arc::downgrade(self);
        Box::new(move |done: TypingDone| {
            let Some(inner) = inner.upgrade() else {
                return;
            };
            match inner.store.get(&done.message_id) {
                Some(message) => inner.emit(ChatEvent::Response(message)),
                None => debug!("revealed message {} is gone", done.message_id),
            }
            if inner.auto_save {
                inner.schedule_save(epoch, personality);
            }
        })
    }

    fn schedule_save(self: &Arc<Self>, epoch: u64, personality: PersonalityKey) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("no tokio runtime, skipping auto-save");
            return;
        };
        let inner = Arc::clone(self);
        runtime.spawn(async move { inner.auto_save(epoch, personality).await });
    }

    async fn auto_save(&self, epoch: u64, personality: PersonalityKey) {
        let _serial = self.save_lock.lock().await;

        let (messages, thread_id) = {
            let session = self.session.lock();
            if session.epoch != epoch {
                debug!("conversation replaced before auto-save");
                return;
            }
            let placeholder = session.pending.as_ref().map(|p| p.placeholder.clone());
            let messages: Vec<Message> = self
                .store
                .all()
                .into_iter()
                .filter(|m| Some(&m.id) != placeholder.as_ref())
                .collect();
            (messages, self.threads.current())
        };

        match self
            .threads
            .save(&personality, &messages, thread_id.as_ref())
            .await
        {
            Ok(saved) => {
                let session = self.session.lock();
                if session.epoch != epoch {
                    debug!("conversation replaced while saving thread {}", saved);
                    return;
                }
                self.threads.adopt(&saved);
                debug!("auto-saved thread {}", saved);
            }
            Err(error) => {
                warn!("auto-save failed: {}", error);
                self.emit(ChatEvent::error(error));
            }
        }
    }
}
