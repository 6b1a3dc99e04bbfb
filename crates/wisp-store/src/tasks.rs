use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use wisp_core::ids::{ChatId, TaskId};

use crate::backend::StorageBackend;
use crate::blob;
use crate::error::StoreError;
use crate::StoreStats;

pub const MAX_TASKS: usize = 1000;
/// Records older than the newest this-many are eligible for lossy compression.
const COMPRESS_KEEP_RECENT: usize = 500;
const DESCRIPTION_KEEP: usize = 64;
const STORE_KEY: &str = "wisp.tasks";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// One ledger entry per orchestration round.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<ChatId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Default)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
}

impl TaskPatch {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub chat_id: Option<ChatId>,
    pub limit: Option<usize>,
}

#[derive(Default, Serialize, Deserialize)]
struct TaskBlob {
    tasks: Vec<Task>,
}

/// Bounded task ledger persisted as one blob under a fixed key.
pub struct TaskLedger {
    backend: Arc<dyn StorageBackend>,
    state: Mutex<TaskBlob>,
}

impl TaskLedger {
    pub fn open(backend: Arc<dyn StorageBackend>) -> Result<Self, StoreError> {
        let state = blob::load_or_default(&backend, STORE_KEY)?;
        Ok(Self {
            backend,
            state: Mutex::new(state),
        })
    }

    /// Append a new task, assigning id and timestamps. Over-cap records are
    /// trimmed oldest-first before the write.
    #[instrument(skip(self, description), fields(title = %title))]
    pub fn append(
        &self,
        title: &str,
        description: Option<String>,
        chat_id: Option<ChatId>,
    ) -> Result<Task, StoreError> {
        let now = Utc::now();
        let task = Task {
            id: TaskId::new(),
            title: title.to_string(),
            description,
            status: TaskStatus::Pending,
            chat_id,
            created_at: now,
            updated_at: now,
        };

        let mut state = self.state.lock();
        state.tasks.push(task.clone());
        if state.tasks.len() > MAX_TASKS {
            let excess = state.tasks.len() - MAX_TASKS;
            state.tasks.drain(..excess);
        }
        self.persist(&mut state)?;
        Ok(task)
    }

    #[instrument(skip(self, patch), fields(task_id = %id))]
    pub fn update(&self, id: &TaskId, patch: TaskPatch) -> Result<Task, StoreError> {
        let mut state = self.state.lock();
        let task = state
            .tasks
            .iter_mut()
            .find(|t| &t.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("task {id}")))?;

        if let Some(title) = patch.title {
            task.title = title;
        }
        if let Some(description) = patch.description {
            task.description = Some(description);
        }
        if let Some(status) = patch.status {
            task.status = status;
        }
        task.updated_at = Utc::now();
        let updated = task.clone();

        self.persist(&mut state)?;
        Ok(updated)
    }

    pub fn get(&self, id: &TaskId) -> Option<Task> {
        self.state.lock().tasks.iter().find(|t| &t.id == id).cloned()
    }

    /// List tasks in append order, oldest first.
    pub fn list(&self, filter: &TaskFilter) -> Vec<Task> {
        let state = self.state.lock();
        let mut tasks: Vec<Task> = state
            .tasks
            .iter()
            .filter(|t| filter.status.map_or(true, |s| t.status == s))
            .filter(|t| {
                filter
                    .chat_id
                    .as_ref()
                    .map_or(true, |c| t.chat_id.as_ref() == Some(c))
            })
            .cloned()
            .collect();
        if let Some(limit) = filter.limit {
            tasks.truncate(limit);
        }
        tasks
    }

    /// Explicit purge of a single task.
    pub fn remove(&self, id: &TaskId) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        let before = state.tasks.len();
        state.tasks.retain(|t| &t.id != id);
        if state.tasks.len() == before {
            return Err(StoreError::NotFound(format!("task {id}")));
        }
        self.persist(&mut state)
    }

    pub fn clear(&self) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        state.tasks.clear();
        self.persist(&mut state)
    }

    pub fn count(&self) -> usize {
        self.state.lock().tasks.len()
    }

    pub fn stats(&self) -> StoreStats {
        let state = self.state.lock();
        StoreStats {
            count: state.tasks.len(),
            bytes_used: blob::serialized_size(&*state),
            capacity: MAX_TASKS,
        }
    }

    fn persist(&self, state: &mut TaskBlob) -> Result<(), StoreError> {
        blob::persist_with_recovery(&self.backend, STORE_KEY, state, compress_oldest)
    }
}

/// Lossy pass over tasks older than the compression threshold: bulky
/// descriptions collapse to a derived summary. Ids, order, and count are
/// untouched.
fn compress_oldest(state: &mut TaskBlob) -> bool {
    let len = state.tasks.len();
    if len <= COMPRESS_KEEP_RECENT {
        return false;
    }
    let cutoff = len - COMPRESS_KEEP_RECENT;
    let mut changed = false;
    for task in &mut state.tasks[..cutoff] {
        if let Some(description) = &task.description {
            if let Some(summary) = blob::summarize(description, DESCRIPTION_KEEP) {
                task.description = Some(summary);
                changed = true;
            }
        }
    }
    changed
}
