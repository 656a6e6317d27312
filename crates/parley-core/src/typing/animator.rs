use crate::messages::{MessageId, MessageStore};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingPhase {
    Idle,
    Typing,
    /// Text exhausted naturally.
    Completed,
    /// Remaining text written at once by `skip`.
    Skipped,
}

/// Handed to the completion callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingDone {
    pub message_id: MessageId,
    pub content: String,
    pub skipped: bool,
}

pub type OnTypingDone = Box<dyn FnOnce(TypingDone) + Send>;

struct TypingState {
    phase: TypingPhase,
    target: Option<MessageId>,
    full_text: String,
    /// Byte offset into `full_text`, always on a char boundary.
    revealed: usize,
    chars_per_tick: usize,
    generation: u64,
    timer: Option<JoinHandle<()>>,
    on_done: Option<OnTypingDone>,
}

enum Step {
    Continue,
    Stale,
    Done(Option<OnTypingDone>, TypingDone),
}

/// Reveals an assistant message a few characters per tick.
///
/// One timer at most: `start` aborts whatever was running, and every tick
/// re-checks the generation it was spawned with before writing to the store.
pub struct TypingAnimator {
    store: Arc<MessageStore>,
    tick: Duration,
    state: Arc<Mutex<TypingState>>,
}

impl TypingAnimator {
    pub fn new(store: Arc<MessageStore>, tick: Duration) -> Self {
        Self {
            store,
            tick: tick.max(Duration::from_millis(1)),
            state: Arc::new(Mutex::new(TypingState {
                phase: TypingPhase::Idle,
                target: None,
                full_text: String::new(),
                revealed: 0,
                chars_per_tick: 1,
                generation: 0,
                timer: None,
                on_done: None,
            })),
        }
    }

    pub fn phase(&self) -> TypingPhase {
        self.state.lock().phase
    }

    pub fn target(&self) -> Option<MessageId> {
        self.state.lock().target.clone()
    }

    /// Begin revealing `full_text` into `message_id`, replacing any reveal in
    /// progress. The superseded reveal's callback is dropped without firing.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        &self,
        message_id: MessageId,
        full_text: impl Into<String>,
        chars_per_tick: usize,
        on_done: OnTypingDone,
    ) {
        let mut state = self.state.lock();
        if let Some(timer) = state.timer.take() {
            timer.abort();
            debug!("typing restarted, previous reveal of {:?} abandoned", state.target);
        }
        state.generation += 1;
        state.phase = TypingPhase::Typing;
        state.target = Some(message_id.clone());
        state.full_text = full_text.into();
        state.revealed = 0;
        state.chars_per_tick = chars_per_tick.max(1);
        state.on_done = Some(on_done);

        if !self.store.replace_content(&message_id, "") {
            warn!("typing target {} is not in the store", message_id);
        }

        let generation = state.generation;
        let shared = Arc::clone(&self.state);
        let store = Arc::clone(&self.store);
        let tick = self.tick;
        state.timer = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                match advance(&shared, &store, generation) {
                    Step::Continue => {}
                    Step::Stale => break,
                    Step::Done(callback, done) => {
                        if let Some(callback) = callback {
                            callback(done);
                        }
                        break;
                    }
                }
            }
        }));
    }

    /// Write the rest of the text now. Returns `false` when nothing was typing.
    pub fn skip(&self) -> bool {
        let (callback, done) = {
            let mut state = self.state.lock();
            if state.phase != TypingPhase::Typing {
                return false;
            }
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
            state.generation += 1;
            state.revealed = state.full_text.len();
            state.phase = TypingPhase::Skipped;
            let Some(message_id) = state.target.take() else {
                return false;
            };
            let content = state.full_text.clone();
            self.store.replace_content(&message_id, content.clone());
            (
                state.on_done.take(),
                TypingDone {
                    message_id,
                    content,
                    skipped: true,
                },
            )
        };
        if let Some(callback) = callback {
            callback(done);
        }
        true
    }

    /// Stop the timer without finishing the text or firing the callback.
    pub fn cancel(&self) {
        let mut state = self.state.lock();
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        state.generation += 1;
        state.on_done = None;
        if state.phase == TypingPhase::Typing {
            debug!("typing of {:?} cancelled", state.target);
            state.phase = TypingPhase::Idle;
        }
        state.target = None;
    }
}

impl Drop for TypingAnimator {
    fn drop(&mut self) {
        if let Some(timer) = self.state.lock().timer.take() {
            timer.abort();
        }
    }
}

fn advance(shared: &Mutex<TypingState>, store: &MessageStore, generation: u64) -> Step {
    let mut state = shared.lock();
    if state.generation != generation || state.phase != TypingPhase::Typing {
        return Step::Stale;
    }
    let Some(target) = state.target.clone() else {
        return Step::Stale;
    };

    let rest = &state.full_text[state.revealed..];
    let step = rest
        .char_indices()
        .nth(state.chars_per_tick)
        .map(|(i, _)| i)
        .unwrap_or(rest.len());
    state.revealed += step;
    store.replace_content(&target, &state.full_text[..state.revealed]);

    if state.revealed < state.full_text.len() {
        return Step::Continue;
    }

    state.phase = TypingPhase::Completed;
    state.target = None;
    // This task is the timer; drop its handle rather than aborting ourselves.
    state.timer = None;
    Step::Done(
        state.on_done.take(),
        TypingDone {
            message_id: target,
            content: state.full_text.clone(),
            skipped: false,
        },
    )
}
