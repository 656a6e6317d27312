pub mod message;
pub mod store;

pub use message::{Message, MessageId, PersonalityKey, Role, RunId, ThreadId};
pub use store::{MessageStore, StoreEvent};
