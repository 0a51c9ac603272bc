use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;

use taskgrid_proto::task::{NewTask, RawTask, Task, TaskId, TaskPatch, Timestamp};

use super::{RemoteError, RemoteStore, TaskMutations, apply_create, apply_delete, apply_update};
use crate::persist;

/// A JSON file of task records acting as the authoritative store.
///
/// Records are decoded leniently through [`RawTask`], so hand-edited or
/// legacy files with odd timestamp spellings still load. Writes rewrite
/// the whole file atomically and are serialized across clones.
#[derive(Debug, Clone)]
pub struct JsonFileRemote {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl JsonFileRemote {
    /// Create a store backed by `path`. A missing file is an empty store.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Location of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Vec<Task>, RemoteError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || read_records(&path))
            .await
            .map_err(|e| RemoteError::Unavailable(e.to_string()))?
    }

    async fn save(&self, records: Vec<Task>) -> Result<(), RemoteError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_records(&path, &records))
            .await
            .map_err(|e| RemoteError::Unavailable(e.to_string()))?
    }

    /// Loads, mutates, and saves under the write lock.
    async fn modify<T>(
        &self,
        f: impl FnOnce(&mut Vec<Task>) -> Result<T, RemoteError> + Send,
    ) -> Result<T, RemoteError> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.load().await?;
        let out = f(&mut records)?;
        self.save(records).await?;
        Ok(out)
    }
}

fn read_records(path: &Path) -> Result<Vec<Task>, RemoteError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(RemoteError::Unavailable(format!("{}: {e}", path.display()))),
    };
    if contents.trim().is_empty() {
        return Ok(Vec::new());
    }
    let raw: Vec<RawTask> = serde_json::from_str(&contents)
        .map_err(|e| RemoteError::Decode(format!("{}: {e}", path.display())))?;
    Ok(raw.into_iter().map(RawTask::into_task).collect())
}

fn write_records(path: &Path, records: &[Task]) -> Result<(), RemoteError> {
    let json = serde_json::to_vec_pretty(records).map_err(|e| RemoteError::Rejected(e.to_string()))?;
    persist::write_atomically(path, &json)
        .map_err(|e| RemoteError::Unavailable(format!("{}: {e}", path.display())))
}

impl RemoteStore for JsonFileRemote {
    async fn fetch_all(&self) -> Result<Vec<Task>, RemoteError> {
        let records = self.load().await?;
        tracing::debug!(path = %self.path.display(), count = records.len(), "fetched remote tasks");
        Ok(records)
    }
}

impl TaskMutations for JsonFileRemote {
    async fn create(&self, task: NewTask) -> Result<Task, RemoteError> {
        let created = self
            .modify(|records| apply_create(records, task, Timestamp::now()))
            .await?;
        tracing::info!(task_id = %created.id, code = %created.code, "task created");
        Ok(created)
    }

    async fn update(&self, id: &TaskId, patch: TaskPatch) -> Result<Task, RemoteError> {
        let updated = self
            .modify(|records| apply_update(records, id, &patch, Timestamp::now()))
            .await?;
        tracing::info!(task_id = %updated.id, "task updated");
        Ok(updated)
    }

    async fn delete(&self, ids: &[TaskId]) -> Result<usize, RemoteError> {
        let removed = self.modify(|records| Ok(apply_delete(records, ids))).await?;
        tracing::info!(requested = ids.len(), removed, "tasks deleted");
        Ok(removed)
    }
}
