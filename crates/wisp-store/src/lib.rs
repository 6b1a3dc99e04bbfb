pub mod backend;
mod blob;
pub mod error;
pub mod events;
pub mod history;
pub mod tasks;

pub use backend::{BackendError, FileBackend, MemoryBackend, StorageBackend};
pub use error::StoreError;
pub use events::{EventFilter, EventLog, EventRecord};
pub use history::{ChatHistoryStore, ChatMetadata, ChatRecord};
pub use tasks::{Task, TaskFilter, TaskLedger, TaskPatch, TaskStatus};

/// Occupancy summary for one bounded store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StoreStats {
    pub count: usize,
    pub bytes_used: usize,
    pub capacity: usize,
}
