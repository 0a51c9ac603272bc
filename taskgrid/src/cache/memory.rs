use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tokio::sync::RwLock;

use taskgrid_proto::task::{Task, TaskId};

use super::{CacheError, LocalCache};

/// In-memory [`LocalCache`], keyed by task id.
///
/// Counts full replacements and upserts, and can be told to fail, so
/// tests can observe exactly what the coordinator wrote.
#[derive(Debug, Default)]
pub struct InMemoryCache {
    records: RwLock<BTreeMap<TaskId, Task>>,
    writes: AtomicUsize,
    upserts: AtomicUsize,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl InMemoryCache {
    /// Create a new, empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a cache pre-seeded with `tasks`. Seeding is not counted as a write.
    #[must_use]
    pub fn with_tasks(tasks: impl IntoIterator<Item = Task>) -> Self {
        let records = tasks.into_iter().map(|t| (t.id.clone(), t)).collect();
        Self {
            records: RwLock::new(records),
            ..Self::default()
        }
    }

    /// Number of `clear_and_replace` calls that succeeded.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of `upsert` calls that succeeded.
    #[must_use]
    pub fn upsert_count(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    /// Makes subsequent reads fail.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Makes subsequent writes and upserts fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), CacheError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CacheError::WriteFailed("simulated write failure".to_string()));
        }
        Ok(())
    }
}

impl LocalCache for InMemoryCache {
    async fn read_all(&self) -> Result<Vec<Task>, CacheError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(CacheError::ReadFailed("simulated read failure".to_string()));
        }
        Ok(self.records.read().await.values().cloned().collect())
    }

    async fn clear_and_replace(&self, tasks: &[Task]) -> Result<(), CacheError> {
        self.check_writable()?;
        let fresh: BTreeMap<TaskId, Task> =
            tasks.iter().map(|t| (t.id.clone(), t.clone())).collect();
        // Built outside the lock and swapped in whole.
        *self.records.write().await = fresh;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn upsert(&self, task: Task) -> Result<(), CacheError> {
        self.check_writable()?;
        self.records.write().await.insert(task.id.clone(), task);
        self.upserts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
