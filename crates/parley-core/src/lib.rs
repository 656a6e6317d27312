pub mod chat;
pub mod config;
pub mod error;
pub mod messages;
pub mod personas;
pub mod runs;
pub mod threads;
pub mod typing;

pub use chat::{ChatEvent, ChatOrchestrator, ChatOrchestratorBuilder};
pub use config::{BusyPolicy, Credentials, ParleyConfig};
pub use error::ChatError;
pub use messages::{Message, MessageId, MessageStore, PersonalityKey, Role, RunId, StoreEvent, ThreadId};
pub use personas::{Persona, PersonaRegistry};
pub use runs::{AssistantTransport, HttpTransport, PollPolicy, RequestId, RunPhase};
pub use threads::{MemoryThreadStore, SqliteThreadStore, ThreadPersistence, ThreadSummary};
pub use typing::TypingPhase;
