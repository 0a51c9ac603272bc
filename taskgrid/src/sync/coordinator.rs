//! Sync cycles, coalescing, and signature-gated commits.
//!
//! Every cycle gets a sequence number from a monotonically increasing
//! counter. Only the latest-issued cycle may commit or change the visible
//! status; anything older is discarded when it finishes. Commits and
//! cache writes are serialized behind one async lock, so overlapping
//! cycles can never interleave their clear/write sequences.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::watch;

use taskgrid_proto::signature::Signature;
use taskgrid_proto::task::{Task, TaskId};

use crate::cache::LocalCache;
use crate::config::SyncConfig;
use crate::remote::RemoteStore;
use crate::signature::{SignatureEngine, SignatureError};

use super::{CycleOutcome, SyncState, SyncStatus, TaskSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CycleKind {
    /// First cycle: paint from the local cache before fetching.
    Mount,
    /// Manual trigger; joins a cycle already in flight.
    Resync,
    /// Post-mutation trigger; supersedes a cycle already in flight.
    Refresh,
}

struct InFlight {
    seq: u64,
    done: watch::Receiver<Option<CycleOutcome>>,
}

/// Signature of a working set, remembered so it is only computed once.
struct KnownSignature {
    set: Arc<TaskSet>,
    signature: Signature,
}

struct Inner<C, R> {
    cache: C,
    remote: R,
    engine: SignatureEngine,
    tasks: watch::Sender<Arc<TaskSet>>,
    status: watch::Sender<SyncStatus>,
    latest_seq: AtomicU64,
    in_flight: Mutex<Option<InFlight>>,
    commit_lock: tokio::sync::Mutex<()>,
    known: Mutex<Option<KnownSignature>>,
    // Set by optimistic upserts; forces the next cycle to rewrite the cache.
    cache_dirty: AtomicBool,
    // Set once any fetched collection is accepted. A cache paint never
    // replaces authoritative data, even from a cycle that is still latest.
    remote_committed: AtomicBool,
    mounted: AtomicBool,
}

/// Owner of the working task set.
///
/// A cheap handle: clones share the same coordinator. No method returns an
/// error; failures are reflected in [`SyncStatus::last_error`] and the
/// returned [`CycleOutcome`].
pub struct SyncCoordinator<C, R> {
    inner: Arc<Inner<C, R>>,
}

impl<C, R> Clone for SyncCoordinator<C, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C, R> SyncCoordinator<C, R>
where
    C: LocalCache + 'static,
    R: RemoteStore + 'static,
{
    /// Creates a coordinator around an already running signature engine.
    #[must_use]
    pub fn new(cache: C, remote: R, engine: SignatureEngine) -> Self {
        let (tasks, _) = watch::channel(Arc::new(TaskSet::empty()));
        let (status, _) = watch::channel(SyncStatus::default());
        Self {
            inner: Arc::new(Inner {
                cache,
                remote,
                engine,
                tasks,
                status,
                latest_seq: AtomicU64::new(0),
                in_flight: Mutex::new(None),
                commit_lock: tokio::sync::Mutex::new(()),
                known: Mutex::new(None),
                cache_dirty: AtomicBool::new(false),
                remote_committed: AtomicBool::new(false),
                mounted: AtomicBool::new(false),
            }),
        }
    }

    /// Creates a coordinator and starts its signature worker.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`SignatureError::Spawn`] if the worker thread cannot start.
    pub fn with_config(cache: C, remote: R, config: &SyncConfig) -> Result<Self, SignatureError> {
        Ok(Self::new(cache, remote, SignatureEngine::spawn(config)?))
    }

    /// Mounts the coordinator: paints from the local cache, then syncs.
    ///
    /// Calling it again behaves like [`resync`](Self::resync).
    pub async fn start(&self) -> CycleOutcome {
        let kind = if self.inner.mounted.swap(true, Ordering::SeqCst) {
            CycleKind::Resync
        } else {
            CycleKind::Mount
        };
        wait_for_outcome(self.launch(kind)).await
    }

    /// Manual re-sync. Joins the cycle already in flight, if any, instead of
    /// starting a second fetch.
    pub async fn resync(&self) -> CycleOutcome {
        wait_for_outcome(self.launch(CycleKind::Resync)).await
    }

    /// Re-sync after a mutation. Always fetches; a cycle already in flight
    /// is superseded and its result discarded.
    pub async fn refresh(&self) -> CycleOutcome {
        wait_for_outcome(self.launch(CycleKind::Refresh)).await
    }

    /// The current working set. The same `Arc` is returned until a sync
    /// accepts a different collection.
    #[must_use]
    pub fn working_task_set(&self) -> Arc<TaskSet> {
        self.inner.tasks.borrow().clone()
    }

    /// Looks a task up in the working set's index.
    #[must_use]
    pub fn lookup_by_id(&self, id: &TaskId) -> Option<Task> {
        self.inner.tasks.borrow().get(id).cloned()
    }

    /// Current status snapshot.
    #[must_use]
    pub fn status(&self) -> SyncStatus {
        self.inner.status.borrow().clone()
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.inner.status.borrow().is_loading
    }

    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.inner.status.borrow().last_error.clone()
    }

    /// Receiver that changes only when the working set is replaced.
    #[must_use]
    pub fn subscribe_tasks(&self) -> watch::Receiver<Arc<TaskSet>> {
        self.inner.tasks.subscribe()
    }

    /// Receiver for status changes.
    #[must_use]
    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.inner.status.subscribe()
    }

    /// Clears the error indicator.
    pub fn dismiss_error(&self) {
        self.inner
            .status
            .send_if_modified(|status| status.last_error.take().is_some());
    }

    /// Writes a single record to the local cache after a successful
    /// mutation, ahead of the next sync.
    ///
    /// The working set is untouched. The next cycle rewrites the cache from
    /// the authoritative collection even if it finds no change.
    pub async fn record_optimistic_upsert(&self, task: Task) {
        let _commit = self.inner.commit_lock.lock().await;
        self.inner.cache_dirty.store(true, Ordering::SeqCst);
        let task_id = task.id.clone();
        if let Err(err) = self.inner.cache.upsert(task).await {
            tracing::warn!(%task_id, error = %err, "optimistic cache upsert failed");
        }
    }

    /// Stops the signature worker. Later cycles still run, treating every
    /// comparison as "changed".
    pub async fn shutdown(&self) {
        self.inner.engine.shutdown().await;
    }

    fn launch(&self, kind: CycleKind) -> watch::Receiver<Option<CycleOutcome>> {
        let mut slot = self.inner.in_flight.lock();
        if kind == CycleKind::Resync {
            if let Some(current) = slot.as_ref() {
                tracing::debug!(seq = current.seq, "resync coalesced into in-flight cycle");
                return current.done.clone();
            }
        }

        let seq = self.inner.latest_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let (done_tx, done_rx) = watch::channel(None);
        if let Some(previous) = slot.replace(InFlight {
            seq,
            done: done_rx.clone(),
        }) {
            tracing::debug!(superseded = previous.seq, seq, "cycle superseded");
        }
        drop(slot);

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let outcome = {
                let _guard = CycleGuard {
                    inner: &inner,
                    seq,
                };
                inner.run_cycle(seq, kind).await
            };
            // Waiters are woken only after the in-flight slot is cleared.
            let _ = done_tx.send(Some(outcome));
        });
        done_rx
    }
}

async fn wait_for_outcome(mut done: watch::Receiver<Option<CycleOutcome>>) -> CycleOutcome {
    match done.wait_for(Option::is_some).await {
        Ok(outcome) => outcome.clone().unwrap_or(CycleOutcome::Aborted),
        Err(_) => CycleOutcome::Aborted,
    }
}

/// Clears the in-flight slot when a cycle ends, even by panic.
struct CycleGuard<'a, C, R> {
    inner: &'a Inner<C, R>,
    seq: u64,
}

impl<C, R> Drop for CycleGuard<'_, C, R> {
    fn drop(&mut self) {
        let mut slot = self.inner.in_flight.lock();
        if slot.as_ref().is_some_and(|f| f.seq == self.seq) {
            *slot = None;
        }
        drop(slot);
        self.inner.update_status(self.seq, |s| s.is_loading = false);
    }
}

impl<C, R> Inner<C, R> {
    fn is_latest(&self, seq: u64) -> bool {
        self.latest_seq.load(Ordering::SeqCst) == seq
    }

    /// Applies `f` to the status unless `seq` has been superseded.
    fn update_status(&self, seq: u64, f: impl FnOnce(&mut SyncStatus)) {
        self.status.send_if_modified(|status| {
            if !self.is_latest(seq) {
                return false;
            }
            let before = status.clone();
            f(status);
            *status != before
        });
    }

    fn current_set(&self) -> Arc<TaskSet> {
        self.tasks.borrow().clone()
    }
}

impl<C, R> Inner<C, R>
where
    C: LocalCache,
    R: RemoteStore,
{
    async fn run_cycle(&self, seq: u64, kind: CycleKind) -> CycleOutcome {
        tracing::debug!(seq, ?kind, "sync cycle started");
        self.update_status(seq, |s| s.is_loading = true);

        let mut local_failed = false;
        if kind == CycleKind::Mount {
            self.update_status(seq, |s| s.state = SyncState::LoadingLocal);
            local_failed = !self.paint_from_cache(seq).await;
        }

        self.update_status(seq, |s| s.state = SyncState::FetchingRemote);
        let fetched = self.remote.fetch_all().await;
        if !self.is_latest(seq) {
            tracing::debug!(seq, "discarding superseded fetch");
            return CycleOutcome::Superseded;
        }
        self.update_status(seq, |s| s.state = SyncState::Reconciling);

        match fetched {
            Ok(records) => self.reconcile(seq, Arc::new(TaskSet::new(records))).await,
            Err(err) => {
                let message = err.to_string();
                tracing::warn!(seq, error = %message, "remote fetch failed, keeping current tasks");
                let no_data = self.current_set().is_empty();
                self.update_status(seq, |s| {
                    s.state = if local_failed && no_data {
                        SyncState::Error
                    } else {
                        SyncState::Ready
                    };
                    s.is_loading = false;
                    s.last_error = Some(message.clone());
                });
                CycleOutcome::RemoteFailed { message }
            }
        }
    }

    /// Publishes a non-empty cache snapshot. Returns `false` if the read failed.
    async fn paint_from_cache(&self, seq: u64) -> bool {
        let records = match self.cache.read_all().await {
            Ok(records) => records,
            Err(err) => {
                tracing::warn!(error = %err, "local cache read failed, treating as empty");
                return false;
            }
        };
        if records.is_empty() {
            return true;
        }

        let local = Arc::new(TaskSet::new(records));
        let _commit = self.commit_lock.lock().await;
        // Superseded mounts still paint; only an accepted fetch blocks it.
        if !self.remote_committed.load(Ordering::SeqCst) && self.current_set().is_empty() {
            tracing::debug!(seq, count = local.len(), "painted tasks from local cache");
            self.tasks.send_replace(local);
        }
        true
    }

    async fn reconcile(&self, seq: u64, fetched: Arc<TaskSet>) -> CycleOutcome {
        let current = self.current_set();
        let (fetched_sig, current_sig) =
            tokio::join!(self.engine.compute(&fetched), self.signature_of(&current));

        let unchanged = match (&fetched_sig, &current_sig) {
            (Ok(new), Ok(old)) => new == old,
            (Err(err), _) | (_, Err(err)) => {
                tracing::warn!(seq, error = %err, "signature unavailable, assuming changed");
                false
            }
        };

        let _commit = self.commit_lock.lock().await;
        if !self.is_latest(seq) {
            tracing::debug!(seq, "discarding superseded result");
            return CycleOutcome::Superseded;
        }

        self.remote_committed.store(true, Ordering::SeqCst);
        if unchanged && Arc::ptr_eq(&current, &self.current_set()) {
            if let Ok(signature) = current_sig {
                self.remember(&current, signature);
            }
            if self.cache_dirty.swap(false, Ordering::SeqCst) {
                self.write_cache(&fetched).await;
            }
            tracing::debug!(seq, count = current.len(), "sync found no changes");
            self.settle(seq);
            return CycleOutcome::Unchanged;
        }

        let task_count = fetched.len();
        self.tasks.send_replace(Arc::clone(&fetched));
        match fetched_sig {
            Ok(signature) => self.remember(&fetched, signature),
            Err(_) => *self.known.lock() = None,
        }
        self.cache_dirty.store(false, Ordering::SeqCst);
        self.write_cache(&fetched).await;
        tracing::info!(seq, task_count, "working set replaced");
        self.settle(seq);
        CycleOutcome::Replaced { task_count }
    }

    async fn signature_of(&self, set: &Arc<TaskSet>) -> Result<Signature, SignatureError> {
        let known = self
            .known
            .lock()
            .as_ref()
            .filter(|k| Arc::ptr_eq(&k.set, set))
            .map(|k| k.signature.clone());
        match known {
            Some(signature) => Ok(signature),
            None => self.engine.compute(set).await,
        }
    }

    fn remember(&self, set: &Arc<TaskSet>, signature: Signature) {
        *self.known.lock() = Some(KnownSignature {
            set: Arc::clone(set),
            signature,
        });
    }

    /// Clear-then-write of the whole collection. Failure leaves the cache dirty.
    async fn write_cache(&self, set: &TaskSet) {
        if let Err(err) = self.cache.clear_and_replace(set.tasks()).await {
            tracing::warn!(error = %err, "local cache write failed");
            self.cache_dirty.store(true, Ordering::SeqCst);
        }
    }

    fn settle(&self, seq: u64) {
        self.update_status(seq, |s| {
            s.state = SyncState::Ready;
            s.is_loading = false;
            s.last_error = None;
        });
    }
}
