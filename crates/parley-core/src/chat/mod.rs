pub mod events;
pub mod orchestrator;

pub use events::ChatEvent;
pub use orchestrator::{ChatOrchestrator, ChatOrchestratorBuilder};
