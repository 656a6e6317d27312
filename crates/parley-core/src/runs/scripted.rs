//! Canned assistant used by the dispatcher and orchestrator tests.

use super::transport::{
    AssistantTransport, DispatchReply, DispatchRequest, DispatchStatus, StatusQuery, StatusReply,
};
use crate::error::ChatError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

struct Scripted<T> {
    delay: Duration,
    reply: Result<T, ChatError>,
}

/// Replays dispatch replies in call order and status replies per run id.
/// A run with no scripted status left stays `processing`.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    dispatches: Mutex<VecDeque<Scripted<DispatchReply>>>,
    statuses: Mutex<HashMap<String, VecDeque<Result<StatusReply, ChatError>>>>,
    dispatched: Mutex<Vec<DispatchRequest>>,
    polled: Mutex<Vec<StatusQuery>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn processing(thread_id: &str, run_id: &str) -> DispatchReply {
        DispatchReply {
            thread_id: thread_id.into(),
            status: DispatchStatus::Processing,
            content: None,
            run_id: Some(run_id.into()),
        }
    }

    pub(crate) fn completed(thread_id: &str, content: &str) -> DispatchReply {
        DispatchReply {
            thread_id: thread_id.into(),
            status: DispatchStatus::Completed,
            content: Some(content.to_string()),
            run_id: None,
        }
    }

    pub(crate) fn push_dispatch(&self, reply: Result<DispatchReply, ChatError>) {
        self.push_dispatch_after(Duration::ZERO, reply);
    }

    pub(crate) fn push_dispatch_after(&self, delay: Duration, reply: Result<DispatchReply, ChatError>) {
        self.dispatches.lock().push_back(Scripted { delay, reply });
    }

    pub(crate) fn push_status(&self, run_id: &str, reply: Result<StatusReply, ChatError>) {
        self.statuses
            .lock()
            .entry(run_id.to_string())
            .or_default()
            .push_back(reply);
    }

    pub(crate) fn dispatched(&self) -> Vec<DispatchRequest> {
        self.dispatched.lock().clone()
    }

    pub(crate) fn status_calls(&self) -> usize {
        self.polled.lock().len()
    }

    pub(crate) fn status_calls_for(&self, run_id: &str) -> usize {
        self.polled
            .lock()
            .iter()
            .filter(|q| q.run_id.as_str() == run_id)
            .count()
    }
}

#[async_trait]
impl AssistantTransport for ScriptedTransport {
    async fn dispatch(&self, request: &DispatchRequest) -> Result<DispatchReply, ChatError> {
        self.dispatched.lock().push(request.clone());
        let next = self.dispatches.lock().pop_front();
        let Some(Scripted { delay, reply }) = next else {
            return Err(ChatError::Transport("no scripted dispatch reply".to_string()));
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        reply
    }

    async fn status(&self, query: &StatusQuery) -> Result<StatusReply, ChatError> {
        self.polled.lock().push(query.clone());
        self.statuses
            .lock()
            .get_mut(query.run_id.as_str())
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Ok(StatusReply::processing()))
    }
}
