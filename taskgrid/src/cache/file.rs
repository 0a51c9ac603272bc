use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;

use taskgrid_proto::codec;
use taskgrid_proto::task::Task;

use super::{CacheError, LocalCache};
use crate::persist;

/// [`LocalCache`] backed by a single snapshot file.
///
/// Every write produces a complete new snapshot in a temporary file next
/// to the target and renames it into place, so readers never observe a
/// partially written file. File I/O runs on the blocking pool.
#[derive(Debug, Clone)]
pub struct FileCache {
    path: PathBuf,
    // Serializes read-modify-write upserts against full replacements.
    write_lock: Arc<Mutex<()>>,
}

impl FileCache {
    /// Create a cache stored at `path`. The file is created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Location of the snapshot file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Vec<Task>, CacheError> {
        let path = self.path.clone();
        let bytes = tokio::task::spawn_blocking(move || match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CacheError::ReadFailed(format!("{}: {e}", path.display()))),
        })
        .await
        .map_err(|e| CacheError::ReadFailed(e.to_string()))??;

        match bytes {
            Some(bytes) => Ok(codec::decode_snapshot(&bytes)?),
            None => Ok(Vec::new()),
        }
    }

    async fn store(&self, tasks: &[Task]) -> Result<(), CacheError> {
        let bytes =
            codec::encode_snapshot(tasks).map_err(|e| CacheError::WriteFailed(e.to_string()))?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomically(&path, &bytes))
            .await
            .map_err(|e| CacheError::WriteFailed(e.to_string()))?
    }
}

fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), CacheError> {
    persist::write_atomically(path, bytes)
        .map_err(|e| CacheError::WriteFailed(format!("{}: {e}", path.display())))
}

impl LocalCache for FileCache {
    async fn read_all(&self) -> Result<Vec<Task>, CacheError> {
        self.load().await
    }

    async fn clear_and_replace(&self, tasks: &[Task]) -> Result<(), CacheError> {
        let _guard = self.write_lock.lock().await;
        self.store(tasks).await?;
        tracing::debug!(path = %self.path.display(), count = tasks.len(), "cache snapshot written");
        Ok(())
    }

    async fn upsert(&self, task: Task) -> Result<(), CacheError> {
        let _guard = self.write_lock.lock().await;
        let mut records = match self.load().await {
            Ok(records) => records,
            Err(CacheError::Corrupt(err)) => {
                tracing::warn!(error = %err, "discarding corrupt cache snapshot on upsert");
                Vec::new()
            }
            Err(err) => return Err(err),
        };
        match records.iter_mut().find(|t| t.id == task.id) {
            Some(slot) => *slot = task,
            None => records.push(task),
        }
        self.store(&records).await
    }
}
