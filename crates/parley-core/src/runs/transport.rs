use crate::error::ChatError;
use crate::messages::{PersonalityKey, RunId, ThreadId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Body of the dispatch `POST`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchRequest {
    pub message: String,
    /// `null` asks the assistant to open a new thread.
    pub thread_id: Option<ThreadId>,
    pub personality: PersonalityKey,
    pub user_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchStatus {
    /// Reply is already in `content`.
    Completed,
    /// Poll the status endpoint with `run_id`.
    Processing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchReply {
    pub thread_id: ThreadId,
    pub status: DispatchStatus,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub run_id: Option<RunId>,
}

/// Query of the status `GET`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusQuery {
    pub thread_id: ThreadId,
    pub run_id: RunId,
    pub user_id: String,
    pub personality: PersonalityKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReply {
    pub status: RunStatus,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl StatusReply {
    pub fn processing() -> Self {
        Self {
            status: RunStatus::Processing,
            content: None,
            error: None,
        }
    }

    pub fn completed(content: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Completed,
            content: Some(content.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Failed,
            content: None,
            error: Some(error.into()),
        }
    }
}

/// The remote assistant, as seen by the dispatcher.
///
/// Implementations report every failure as `ChatError::Transport`; the
/// dispatcher decides what a `failed` status means.
#[async_trait]
pub trait AssistantTransport: Send + Sync {
    async fn dispatch(&self, request: &DispatchRequest) -> Result<DispatchReply, ChatError>;

    async fn status(&self, query: &StatusQuery) -> Result<StatusReply, ChatError>;
}

#[async_trait]
impl<T: AssistantTransport + ?Sized> AssistantTransport for std::sync::Arc<T> {
    async fn dispatch(&self, request: &DispatchRequest) -> Result<DispatchReply, ChatError> {
        (**self).dispatch(request).await
    }

    async fn status(&self, query: &StatusQuery) -> Result<StatusReply, ChatError> {
        (**self).status(query).await
    }
}
