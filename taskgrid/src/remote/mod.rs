//! The authoritative remote task store.
//!
//! [`RemoteStore`] is the read side the coordinator syncs from: it always
//! returns the complete collection. [`TaskMutations`] is the separate
//! create/update/delete contract; callers refresh the coordinator after a
//! successful mutation.

mod file;
mod memory;

pub use file::JsonFileRemote;
pub use memory::InMemoryRemote;

use std::future::Future;
use std::sync::Arc;

use taskgrid_proto::task::{NewTask, Task, TaskId, TaskPatch, TaskValidationError, Timestamp};

/// Errors returned by the remote store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// The store could not be reached or failed to answer.
    #[error("remote store unavailable: {0}")]
    Unavailable(String),

    /// The store refused the request.
    #[error("request rejected: {0}")]
    Rejected(String),

    /// No task with this id exists.
    #[error("task not found: {0}")]
    NotFound(TaskId),

    /// The response could not be decoded.
    #[error("invalid response from remote store: {0}")]
    Decode(String),
}

impl From<TaskValidationError> for RemoteError {
    fn from(err: TaskValidationError) -> Self {
        Self::Rejected(err.to_string())
    }
}

/// Read access to the full authoritative collection.
pub trait RemoteStore: Send + Sync {
    /// Fetches every task. No pagination happens at this layer.
    fn fetch_all(&self) -> impl Future<Output = Result<Vec<Task>, RemoteError>> + Send;
}

/// Write access to the authoritative collection.
pub trait TaskMutations: Send + Sync {
    /// Creates a task; the store assigns id, code, and timestamps.
    fn create(
        &self,
        task: NewTask,
    ) -> impl Future<Output = Result<Task, RemoteError>> + Send;

    /// Applies a patch and returns the updated task.
    fn update(
        &self,
        id: &TaskId,
        patch: TaskPatch,
    ) -> impl Future<Output = Result<Task, RemoteError>> + Send;

    /// Deletes every listed task that exists; returns how many were removed.
    fn delete(
        &self,
        ids: &[TaskId],
    ) -> impl Future<Output = Result<usize, RemoteError>> + Send;
}

impl<T: RemoteStore> RemoteStore for Arc<T> {
    fn fetch_all(&self) -> impl Future<Output = Result<Vec<Task>, RemoteError>> + Send {
        (**self).fetch_all()
    }
}

impl<T: TaskMutations> TaskMutations for Arc<T> {
    fn create(&self, task: NewTask) -> impl Future<Output = Result<Task, RemoteError>> + Send {
        (**self).create(task)
    }

    fn update(
        &self,
        id: &TaskId,
        patch: TaskPatch,
    ) -> impl Future<Output = Result<Task, RemoteError>> + Send {
        (**self).update(id, patch)
    }

    fn delete(&self, ids: &[TaskId]) -> impl Future<Output = Result<usize, RemoteError>> + Send {
        (**self).delete(ids)
    }
}

// ---------------------------------------------------------------------------
// Shared mutation logic over a plain record list
// ---------------------------------------------------------------------------

const CODE_PREFIX: &str = "TASK-";

/// Next free human code: one past the highest `TASK-NNNN` in use.
fn next_code(records: &[Task]) -> String {
    let highest = records
        .iter()
        .filter_map(|t| t.code.strip_prefix(CODE_PREFIX)?.parse::<u32>().ok())
        .max()
        .unwrap_or(0);
    format!("{CODE_PREFIX}{:04}", highest.saturating_add(1))
}

fn apply_create(records: &mut Vec<Task>, new: NewTask, now: Timestamp) -> Result<Task, RemoteError> {
    new.validate()?;
    let code = next_code(records);
    let task = new.into_task(TaskId::generate(), code, now);
    records.push(task.clone());
    Ok(task)
}

fn apply_update(
    records: &mut [Task],
    id: &TaskId,
    patch: &TaskPatch,
    now: Timestamp,
) -> Result<Task, RemoteError> {
    patch.validate()?;
    let task = records
        .iter_mut()
        .find(|t| &t.id == id)
        .ok_or_else(|| RemoteError::NotFound(id.clone()))?;
    patch.apply_to(task, now);
    Ok(task.clone())
}

fn apply_delete(records: &mut Vec<Task>, ids: &[TaskId]) -> usize {
    let before = records.len();
    records.retain(|t| !ids.contains(&t.id));
    before - records.len()
}
