//! Local persistent cache of the last accepted task collection.
//!
//! Defines the [`LocalCache`] trait the coordinator reads on mount and
//! rewrites after every accepted replacement, plus two implementations:
//! - [`InMemoryCache`] for tests and ephemeral sessions
//! - [`FileCache`], a single postcard snapshot on disk

mod file;
mod memory;

pub use file::FileCache;
pub use memory::InMemoryCache;

use std::future::Future;
use std::sync::Arc;

use taskgrid_proto::codec::CodecError;
use taskgrid_proto::task::Task;

/// Errors that can occur during cache operations.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// A read operation failed.
    #[error("cache read failed: {0}")]
    ReadFailed(String),

    /// A write operation failed.
    #[error("cache write failed: {0}")]
    WriteFailed(String),

    /// Stored data could not be decoded.
    #[error("cache data is corrupt: {0}")]
    Corrupt(#[from] CodecError),
}

/// Keyed local store holding one record per task.
///
/// An empty cache is not an error: `read_all` returns an empty collection.
/// `clear_and_replace` must be atomic from a reader's point of view, so a
/// concurrent `read_all` sees either the old or the new collection.
pub trait LocalCache: Send + Sync {
    /// Reads every cached record.
    fn read_all(&self) -> impl Future<Output = Result<Vec<Task>, CacheError>> + Send;

    /// Replaces the entire cached collection.
    fn clear_and_replace(
        &self,
        tasks: &[Task],
    ) -> impl Future<Output = Result<(), CacheError>> + Send;

    /// Inserts or overwrites a single record.
    ///
    /// Used for optimistic writes after a mutation; the next sync
    /// overwrites it with the authoritative collection.
    fn upsert(&self, task: Task) -> impl Future<Output = Result<(), CacheError>> + Send;
}

impl<T: LocalCache> LocalCache for Arc<T> {
    fn read_all(&self) -> impl Future<Output = Result<Vec<Task>, CacheError>> + Send {
        (**self).read_all()
    }

    fn clear_and_replace(
        &self,
        tasks: &[Task],
    ) -> impl Future<Output = Result<(), CacheError>> + Send {
        (**self).clear_and_replace(tasks)
    }

    fn upsert(&self, task: Task) -> impl Future<Output = Result<(), CacheError>> + Send {
        (**self).upsert(task)
    }
}
