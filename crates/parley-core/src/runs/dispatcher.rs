//! Single-flight run dispatch with status polling.
//!
//! Every `send` advances a generation counter and spawns one supervised task
//! that dispatches the message and polls until the run reaches a terminal
//! status. All state changes go through [`RunDispatcher::transition`], which
//! drops anything tagged with a superseded generation and consults the dedup
//! ledger before letting a terminal result out. Results leave as [`RunEvent`]s
//! on the channel returned by [`RunDispatcher::new`].

use super::ledger::{DedupLedger, RunKey};
use super::transport::{AssistantTransport, DispatchRequest, DispatchStatus, RunStatus, StatusQuery};
use crate::error::ChatError;
use crate::messages::message::now_millis;
use crate::messages::{PersonalityKey, RunId, ThreadId};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Generation token of one `send`. Only the newest one may mutate state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub fn value(self) -> u64 {
        self.0
    }

    /// Run id for replies that complete synchronously and carry none.
    fn synthetic_run_id(self) -> RunId {
        RunId::new(format!("sync-{}", self.0))
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "request #{}", self.0)
    }
}

/// How long to keep asking about a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    interval: Duration,
    max_attempts: u32,
}

impl PollPolicy {
    /// `max_attempts` counts every status check, the immediate first one
    /// included; it is clamped to at least 1 so polling always terminates.
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), 60)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub message: String,
    pub thread_id: Option<ThreadId>,
    pub personality: PersonalityKey,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunHandle {
    pub thread_id: ThreadId,
    pub run_id: RunId,
    pub dispatched_at: i64,
}

impl RunHandle {
    pub fn key(&self) -> RunKey {
        RunKey::new(self.thread_id.clone(), self.run_id.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunCompletion {
    pub handle: RunHandle,
    pub content: String,
    pub personality: PersonalityKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Dispatching,
    Polling,
    Completed,
    Failed,
    Cancelled,
}

impl RunPhase {
    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::Dispatching | Self::Polling)
    }
}

/// Inputs to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunSignal {
    /// The assistant accepted the message and handed back a run to poll.
    Accepted(RunHandle),
    Completed(RunCompletion),
    Failed(ChatError),
    Cancelled,
}

impl RunSignal {
    fn name(&self) -> &'static str {
        match self {
            Self::Accepted(_) => "accepted",
            Self::Completed(_) => "completed",
            Self::Failed(_) => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunEvent {
    pub request_id: RequestId,
    pub kind: RunEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEventKind {
    Accepted(RunHandle),
    Completed(RunCompletion),
    Failed(ChatError),
}

struct ActiveRun {
    request_id: RequestId,
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
    handle: Option<RunHandle>,
}

impl ActiveRun {
    fn stop(self) {
        self.token.cancel();
        if let Some(task) = self.task {
            task.abort();
        }
    }
}

struct DispatchState {
    phase: RunPhase,
    generation: u64,
    active: Option<ActiveRun>,
    ledger: DedupLedger,
}

impl DispatchState {
    /// Release the active run after a terminal signal. Only the token is
    /// cancelled since the caller may be the run's own task.
    fn finish_active(&mut self) {
        if let Some(active) = self.active.take() {
            active.token.cancel();
        }
    }
}

struct Shared {
    transport: Arc<dyn AssistantTransport>,
    policy: PollPolicy,
    state: Mutex<DispatchState>,
    events: mpsc::UnboundedSender<RunEvent>,
}

/// Sends messages to the assistant, one run at a time.
#[derive(Clone)]
pub struct RunDispatcher {
    shared: Arc<Shared>,
}

impl RunDispatcher {
    pub fn new(
        transport: Arc<dyn AssistantTransport>,
        policy: PollPolicy,
    ) -> (Self, mpsc::UnboundedReceiver<RunEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let dispatcher = Self {
            shared: Arc::new(Shared {
                transport,
                policy,
                state: Mutex::new(DispatchState {
                    phase: RunPhase::Idle,
                    generation: 0,
                    active: None,
                    ledger: DedupLedger::default(),
                }),
                events,
            }),
        };
        (dispatcher, rx)
    }

    pub fn phase(&self) -> RunPhase {
        self.shared.state.lock().phase
    }

    pub fn is_in_flight(&self) -> bool {
        self.phase().is_in_flight()
    }

    pub fn current_request(&self) -> RequestId {
        RequestId(self.shared.state.lock().generation)
    }

    pub fn is_current(&self, request_id: RequestId) -> bool {
        self.shared.state.lock().generation == request_id.0
    }

    /// Start a run, superseding whatever was in flight.
    ///
    /// Must be called from within a tokio runtime.
    pub fn send(&self, request: RunRequest) -> RequestId {
        let mut state = self.shared.state.lock();
        if let Some(previous) = state.active.take() {
            debug!("{} superseded by a new send", previous.request_id);
            previous.stop();
        }
        state.generation += 1;
        let request_id = RequestId(state.generation);
        state.phase = RunPhase::Dispatching;

        let token = CancellationToken::new();
        let task_token = token.clone();
        let this = self.clone();
        let task = tokio::spawn(async move { this.drive(request_id, task_token, request).await });
        state.active = Some(ActiveRun {
            request_id,
            token,
            task: Some(task),
            handle: None,
        });
        info!("{} dispatched", request_id);
        request_id
    }

    /// Abort the in-flight run, if any, and invalidate its generation so
    /// anything it already queued is discarded. Returns `true` if a run was
    /// in flight.
    pub fn cancel(&self) -> bool {
        let mut state = self.shared.state.lock();
        state.generation += 1;
        match state.active.take() {
            Some(active) => {
                debug!("{} cancelled", active.request_id);
                active.stop();
                state.phase = RunPhase::Cancelled;
                true
            }
            None => false,
        }
    }

    /// Feed one signal into the state machine.
    ///
    /// Returns `true` if it produced a [`RunEvent`]. Signals from a superseded
    /// generation, repeated terminal results for a run already in the ledger,
    /// and cancellations never do.
    pub fn transition(&self, request_id: RequestId, signal: RunSignal) -> bool {
        let kind = {
            let mut state = self.shared.state.lock();
            if state.generation != request_id.0 {
                debug!("discarding {} signal from superseded {}", signal.name(), request_id);
                return false;
            }

            match signal {
                RunSignal::Accepted(handle) => {
                    if state.phase != RunPhase::Dispatching {
                        debug!("ignoring accepted signal in phase {:?}", state.phase);
                        return false;
                    }
                    state.phase = RunPhase::Polling;
                    if let Some(active) = state.active.as_mut() {
                        active.handle = Some(handle.clone());
                    }
                    RunEventKind::Accepted(handle)
                }
                RunSignal::Completed(completion) => {
                    if !state.ledger.record(completion.handle.key()) {
                        debug!(
                            "duplicate completion for run {} on thread {}",
                            completion.handle.run_id, completion.handle.thread_id
                        );
                        return false;
                    }
                    state.phase = RunPhase::Completed;
                    state.finish_active();
                    RunEventKind::Completed(completion)
                }
                RunSignal::Failed(error) => {
                    if !state.phase.is_in_flight() {
                        debug!("ignoring failure in phase {:?}: {}", state.phase, error);
                        return false;
                    }
                    let key = state
                        .active
                        .as_ref()
                        .and_then(|a| a.handle.as_ref())
                        .map(RunHandle::key);
                    if let Some(key) = key {
                        if !state.ledger.record(key) {
                            return false;
                        }
                    }
                    state.phase = RunPhase::Failed;
                    state.finish_active();
                    RunEventKind::Failed(error)
                }
                RunSignal::Cancelled => {
                    if state.phase.is_in_flight() {
                        state.phase = RunPhase::Cancelled;
                        state.active = None;
                    }
                    return false;
                }
            }
        };

        if self.shared.events.send(RunEvent { request_id, kind }).is_err() {
            debug!("run event receiver dropped");
        }
        true
    }

    async fn drive(self, request_id: RequestId, token: CancellationToken, request: RunRequest) {
        let outcome = tokio::select! {
            _ = token.cancelled() => Err(ChatError::Cancelled),
            result = self.run(request_id, &request) => result,
        };

        let signal = match outcome {
            Ok(completion) => RunSignal::Completed(completion),
            Err(ChatError::Cancelled) => RunSignal::Cancelled,
            Err(error) => {
                warn!("{} failed: {}", request_id, error);
                RunSignal::Failed(error)
            }
        };
        self.transition(request_id, signal);
    }

    async fn run(&self, request_id: RequestId, request: &RunRequest) -> Result<RunCompletion, ChatError> {
        let dispatched_at = now_millis();
        let reply = self
            .shared
            .transport
            .dispatch(&DispatchRequest {
                message: request.message.clone(),
                thread_id: request.thread_id.clone(),
                personality: request.personality.clone(),
                user_id: request.user_id.clone(),
            })
            .await?;

        if reply.status == DispatchStatus::Completed {
            let content = reply.content.ok_or_else(|| {
                ChatError::Transport("completed reply carried no content".to_string())
            })?;
            return Ok(RunCompletion {
                handle: RunHandle {
                    thread_id: reply.thread_id,
                    run_id: reply.run_id.unwrap_or_else(|| request_id.synthetic_run_id()),
                    dispatched_at,
                },
                content,
                personality: request.personality.clone(),
            });
        }

        let run_id = reply.run_id.ok_or_else(|| {
            ChatError::Transport("processing reply carried no run id".to_string())
        })?;
        let handle = RunHandle {
            thread_id: reply.thread_id,
            run_id,
            dispatched_at,
        };
        if !self.transition(request_id, RunSignal::Accepted(handle.clone())) {
            return Err(ChatError::Cancelled);
        }

        let query = StatusQuery {
            thread_id: handle.thread_id.clone(),
            run_id: handle.run_id.clone(),
            user_id: request.user_id.clone(),
            personality: request.personality.clone(),
        };
        let policy = self.shared.policy;

        for attempt in 1..=policy.max_attempts() {
            if attempt > 1 {
                tokio::time::sleep(policy.interval()).await;
            }
            if !self.is_current(request_id) {
                debug!("{} superseded while polling, stopping", request_id);
                return Err(ChatError::Cancelled);
            }

            let status = self.shared.transport.status(&query).await?;
            match status.status {
                RunStatus::Processing => {
                    debug!(
                        "run {} still processing ({}/{})",
                        handle.run_id,
                        attempt,
                        policy.max_attempts()
                    );
                }
                RunStatus::Completed => {
                    let content = status.content.ok_or_else(|| {
                        ChatError::Transport("completed status carried no content".to_string())
                    })?;
                    return Ok(RunCompletion {
                        handle,
                        content,
                        personality: request.personality.clone(),
                    });
                }
                RunStatus::Failed => {
                    return Err(ChatError::RunFailed(
                        status
                            .error
                            .unwrap_or_else(|| "the assistant reported a failure".to_string()),
                    ));
                }
            }
        }

        Err(ChatError::Timeout {
            attempts: policy.max_attempts(),
        })
    }
}
