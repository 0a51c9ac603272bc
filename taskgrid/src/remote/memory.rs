use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use taskgrid_proto::task::{NewTask, Task, TaskId, TaskPatch, Timestamp};

use super::{RemoteError, RemoteStore, TaskMutations, apply_create, apply_delete, apply_update};

/// In-memory authoritative store for tests and demos.
///
/// Counts fetches and can be switched into a failing mode.
#[derive(Debug, Default)]
pub struct InMemoryRemote {
    records: Mutex<Vec<Task>>,
    failure: Mutex<Option<String>>,
    fetches: AtomicUsize,
}

impl InMemoryRemote {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding `tasks`.
    #[must_use]
    pub fn with_tasks(tasks: Vec<Task>) -> Self {
        Self {
            records: Mutex::new(tasks),
            ..Self::default()
        }
    }

    /// Replaces the whole authoritative collection.
    pub fn replace_all(&self, tasks: Vec<Task>) {
        *self.records.lock() = tasks;
    }

    /// Makes every request fail with `message`, or restores normal service.
    pub fn set_failure(&self, message: Option<String>) {
        *self.failure.lock() = message;
    }

    /// Number of `fetch_all` calls received.
    #[must_use]
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Copy of the current collection.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Task> {
        self.records.lock().clone()
    }

    fn check_available(&self) -> Result<(), RemoteError> {
        match self.failure.lock().as_ref() {
            Some(message) => Err(RemoteError::Unavailable(message.clone())),
            None => Ok(()),
        }
    }
}

impl RemoteStore for InMemoryRemote {
    async fn fetch_all(&self) -> Result<Vec<Task>, RemoteError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        Ok(self.snapshot())
    }
}

impl TaskMutations for InMemoryRemote {
    async fn create(&self, task: NewTask) -> Result<Task, RemoteError> {
        self.check_available()?;
        apply_create(&mut self.records.lock(), task, Timestamp::now())
    }

    async fn update(&self, id: &TaskId, patch: TaskPatch) -> Result<Task, RemoteError> {
        self.check_available()?;
        apply_update(&mut self.records.lock(), id, &patch, Timestamp::now())
    }

    async fn delete(&self, ids: &[TaskId]) -> Result<usize, RemoteError> {
        self.check_available()?;
        Ok(apply_delete(&mut self.records.lock(), ids))
    }
}
