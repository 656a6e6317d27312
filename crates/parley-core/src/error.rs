use thiserror::Error;

/// Failures surfaced by the chat engine.
///
/// `Clone` so errors can ride on broadcast channels next to the events that
/// carry them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    /// Network failure, non-2xx status or an unparseable payload.
    #[error("transport error: {0}")]
    Transport(String),
    /// The remote run reported that it failed.
    #[error("assistant run failed: {0}")]
    RunFailed(String),
    /// Status polling ran out of attempts without a terminal status.
    #[error("no terminal status after {attempts} status checks")]
    Timeout { attempts: u32 },
    #[error("failed to load thread {thread_id}: {reason}")]
    ThreadLoad { thread_id: String, reason: String },
    /// The run was superseded or torn down. Never shown to the user.
    #[error("run cancelled")]
    Cancelled,
    #[error("a reply is already in progress")]
    Busy,
    #[error("message is empty")]
    EmptyMessage,
    #[error("unknown personality: {0}")]
    UnknownPersonality(String),
    #[error("persistence error: {0}")]
    Persistence(String),
}

impl ChatError {
    /// Text suitable for a transient error indicator in the UI.
    pub fn user_message(&self) -> String {
        match self {
            Self::Transport(_) => {
                "Couldn't reach the assistant. Check your connection and try again.".to_string()
            }
            Self::RunFailed(_) => "The assistant couldn't finish that reply. Please try again.".to_string(),
            Self::Timeout { .. } => {
                "The assistant is still working on it. Please try again in a moment.".to_string()
            }
            Self::ThreadLoad { .. } => "That conversation couldn't be loaded.".to_string(),
            Self::Cancelled => String::new(),
            Self::Busy => "Please wait for the current reply to finish.".to_string(),
            Self::EmptyMessage => "Type a message first.".to_string(),
            Self::UnknownPersonality(key) => format!("No assistant named '{key}'."),
            Self::Persistence(_) => "Your conversation couldn't be saved.".to_string(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
