use crate::error::ChatError;
use crate::messages::Message;

/// Notifications for whoever renders the conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// An assistant reply finished revealing.
    Response(Message),
    /// A run or save failed. `message` is ready to show as-is.
    Error { message: String, error: ChatError },
}

impl ChatEvent {
    pub(crate) fn error(error: ChatError) -> Self {
        Self::Error {
            message: error.user_message(),
            error,
        }
    }
}
