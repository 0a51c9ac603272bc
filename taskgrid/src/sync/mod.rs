//! The synchronization coordinator and the working set it owns.
//!
//! [`SyncCoordinator`] is the single source of truth for the working task
//! set. It paints from the local cache on mount, fetches the authoritative
//! collection, and only republishes when the content signature changed.

mod coordinator;
mod task_set;

use std::fmt;

pub use coordinator::SyncCoordinator;
pub use task_set::TaskSet;

/// Lifecycle state of the coordinator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SyncState {
    /// Not yet mounted.
    #[default]
    Idle,
    /// Reading the local cache on mount.
    LoadingLocal,
    /// Waiting for the remote store.
    FetchingRemote,
    /// Comparing signatures and committing.
    Reconciling,
    /// Settled. `last_error` may still report a recoverable failure.
    Ready,
    /// No data could be obtained from any source.
    Error,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::LoadingLocal => "loading-local",
            Self::FetchingRemote => "fetching-remote",
            Self::Reconciling => "reconciling",
            Self::Ready => "ready",
            Self::Error => "error",
        };
        f.pad(name)
    }
}

/// Snapshot of what the UI needs besides the tasks themselves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStatus {
    /// Current lifecycle state.
    pub state: SyncState,
    /// `true` while a sync cycle is running.
    pub is_loading: bool,
    /// Message of the most recent unresolved failure.
    pub last_error: Option<String>,
}

/// How a sync cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The fetched collection matched the working set; nothing was republished.
    Unchanged,
    /// The working set was replaced.
    Replaced {
        /// Size of the new working set.
        task_count: usize,
    },
    /// The remote fetch failed; the previous working set was kept.
    RemoteFailed {
        /// Failure description, also stored in `last_error`.
        message: String,
    },
    /// A newer cycle started before this one could commit; its result was discarded.
    Superseded,
    /// The cycle task stopped without reporting a result.
    Aborted,
}
