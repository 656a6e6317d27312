pub mod controller;
pub mod memory;
pub mod persistence;
pub mod sqlite;

pub use controller::{LoadedThread, ThreadController};
pub use memory::MemoryThreadStore;
pub use persistence::{ThreadPersistence, ThreadSummary};
pub use sqlite::SqliteThreadStore;
