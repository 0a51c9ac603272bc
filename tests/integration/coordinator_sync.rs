//! Integration tests for the sync coordinator.
//!
//! Covers the no-op guarantee, coalescing, fallback ordering, stale-result
//! discard, supersession during the mount's cache read, and the end-to-end
//! cache/remote scenarios, using scripted doubles whose responses can be
//! held back and a counting cache.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use taskgrid::cache::{CacheError, InMemoryCache, LocalCache};
use taskgrid::config::SyncConfig;
use taskgrid::remote::{InMemoryRemote, RemoteError, RemoteStore, TaskMutations};
use taskgrid::signature::{SignatureEngine, compute_signature};
use taskgrid::sync::{CycleOutcome, SyncCoordinator, SyncState};
use taskgrid_proto::signature::Signature;
use taskgrid_proto::task::{
    NewTask, Task, TaskId, TaskLabel, TaskPatch, TaskPriority, TaskStatus, Timestamp,
};

// ---------------------------------------------------------------------------
// Helper functions
// ---------------------------------------------------------------------------

/// Creates task `n` with id and code `TASK-NNNN`.
fn make_task(n: u32) -> Task {
    let code = format!("TASK-{n:04}");
    Task {
        id: TaskId::new(code.as_str()),
        code,
        title: format!("Task number {n}"),
        status: TaskStatus::Todo,
        label: TaskLabel::Feature,
        priority: TaskPriority::Medium,
        estimated_hours: f64::from(n % 8),
        archived: false,
        created_at: Timestamp::from_millis(1_700_000_000_000 + i64::from(n)),
        updated_at: Timestamp::from_millis(1_700_000_500_000 + i64::from(n)),
    }
}

fn make_tasks(count: u32) -> Vec<Task> {
    (1..=count).map(make_task).collect()
}

fn sorted_by_id(mut tasks: Vec<Task>) -> Vec<Task> {
    tasks.sort_by(|a, b| a.id.cmp(&b.id));
    tasks
}

/// One scripted answer to `fetch_all`, optionally held until a gate opens.
struct Step {
    gate: Option<oneshot::Receiver<()>>,
    response: Result<Vec<Task>, RemoteError>,
}

/// Remote double that answers from a script, then from a fallback collection.
#[derive(Default)]
struct ScriptedRemote {
    script: Mutex<VecDeque<Step>>,
    fallback: Mutex<Vec<Task>>,
    fetches: AtomicUsize,
}

impl ScriptedRemote {
    fn push(&self, response: Result<Vec<Task>, RemoteError>) {
        self.script.lock().push_back(Step {
            gate: None,
            response,
        });
    }

    /// Queues a response that is only delivered once the returned sender fires.
    fn push_gated(&self, response: Result<Vec<Task>, RemoteError>) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.script.lock().push_back(Step {
            gate: Some(rx),
            response,
        });
        tx
    }

    fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    async fn wait_for_fetches(&self, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.fetch_count() < n {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("fetch never started");
    }
}

impl RemoteStore for ScriptedRemote {
    async fn fetch_all(&self) -> Result<Vec<Task>, RemoteError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let step = self.script.lock().pop_front();
        match step {
            Some(Step { gate, response }) => {
                if let Some(gate) = gate {
                    let _ = gate.await;
                }
                response
            }
            None => Ok(self.fallback.lock().clone()),
        }
    }
}

fn coordinator<C: LocalCache + 'static, R: RemoteStore + 'static>(
    cache: C,
    remote: R,
) -> SyncCoordinator<C, R> {
    SyncCoordinator::with_config(cache, remote, &SyncConfig::default()).unwrap()
}

// ---------------------------------------------------------------------------
// No-op guarantee
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unchanged_sync_keeps_reference_and_skips_cache_write() {
    let cache = Arc::new(InMemoryCache::new());
    let remote = Arc::new(InMemoryRemote::with_tasks(make_tasks(3)));
    let coord = coordinator(Arc::clone(&cache), Arc::clone(&remote));

    assert_eq!(coord.start().await, CycleOutcome::Replaced { task_count: 3 });
    assert_eq!(cache.write_count(), 1);

    let before = coord.working_task_set();
    let tasks_rx = coord.subscribe_tasks();

    // Same content, different order and freshly allocated.
    let mut reordered = make_tasks(3);
    reordered.reverse();
    remote.replace_all(reordered);

    assert_eq!(coord.resync().await, CycleOutcome::Unchanged);
    assert!(Arc::ptr_eq(&before, &coord.working_task_set()));
    assert_eq!(cache.write_count(), 1, "no cache write on an unchanged sync");
    assert!(!tasks_rx.has_changed().unwrap(), "no republish on an unchanged sync");
    assert_eq!(remote.fetch_count(), 2);
}

// ---------------------------------------------------------------------------
// Coalescing
// ---------------------------------------------------------------------------

static COUNTED_HASHES: AtomicUsize = AtomicUsize::new(0);

fn counting_hasher(tasks: &[Task]) -> Result<Signature, serde_json::Error> {
    COUNTED_HASHES.fetch_add(1, Ordering::SeqCst);
    compute_signature(tasks)
}

#[tokio::test]
async fn overlapping_resyncs_share_one_cycle() {
    let engine = SignatureEngine::with_hasher(&SyncConfig::default(), counting_hasher).unwrap();
    let remote = Arc::new(ScriptedRemote::default());
    let gate = remote.push_gated(Ok(make_tasks(4)));
    let coord = SyncCoordinator::new(InMemoryCache::new(), Arc::clone(&remote), engine);

    let release = {
        let remote = Arc::clone(&remote);
        async move {
            remote.wait_for_fetches(1).await;
            gate.send(()).unwrap();
        }
    };
    let (first, second, ()) = tokio::join!(coord.resync(), coord.resync(), release);

    assert_eq!(first, CycleOutcome::Replaced { task_count: 4 });
    assert_eq!(second, first);
    assert_eq!(remote.fetch_count(), 1);
    // One pair: the fetched set and the (empty) working set.
    assert_eq!(COUNTED_HASHES.load(Ordering::SeqCst), 2);
}

// ---------------------------------------------------------------------------
// Fallback ordering
// ---------------------------------------------------------------------------

#[tokio::test]
async fn empty_cache_and_failing_remote_yield_empty_set_with_error() {
    let remote = InMemoryRemote::new();
    remote.set_failure(Some("503 service unavailable".to_string()));
    let coord = coordinator(InMemoryCache::new(), remote);

    let outcome = coord.start().await;

    assert!(matches!(outcome, CycleOutcome::RemoteFailed { .. }));
    assert!(coord.working_task_set().is_empty());
    let status = coord.status();
    assert!(status.last_error.unwrap().contains("503"));
    assert!(!status.is_loading);
    assert_eq!(status.state, SyncState::Ready);
}

#[tokio::test]
async fn remote_failure_after_success_keeps_last_known_good() {
    let remote = Arc::new(InMemoryRemote::with_tasks(make_tasks(5)));
    let coord = coordinator(InMemoryCache::new(), Arc::clone(&remote));
    coord.start().await;
    let before = coord.working_task_set();

    remote.set_failure(Some("timeout".to_string()));
    assert!(matches!(coord.resync().await, CycleOutcome::RemoteFailed { .. }));
    assert!(Arc::ptr_eq(&before, &coord.working_task_set()));
    assert_eq!(coord.status().state, SyncState::Ready);

    // Recovery clears the indicator without republishing unchanged data.
    remote.set_failure(None);
    assert_eq!(coord.resync().await, CycleOutcome::Unchanged);
    assert!(coord.last_error().is_none());
}

// ---------------------------------------------------------------------------
// Stale-result discard
// ---------------------------------------------------------------------------

#[tokio::test]
async fn superseded_cycle_cannot_overwrite_newer_commit() {
    let cache = Arc::new(InMemoryCache::new());
    let remote = Arc::new(ScriptedRemote::default());
    let gate_a = remote.push_gated(Ok(make_tasks(2)));
    remote.push(Ok(make_tasks(3)));
    let coord = coordinator(Arc::clone(&cache), Arc::clone(&remote));

    let cycle_a = {
        let coord = coord.clone();
        tokio::spawn(async move { coord.refresh().await })
    };
    remote.wait_for_fetches(1).await;

    let outcome_b = coord.refresh().await;
    assert_eq!(outcome_b, CycleOutcome::Replaced { task_count: 3 });
    let committed = coord.working_task_set();

    gate_a.send(()).unwrap();
    assert_eq!(cycle_a.await.unwrap(), CycleOutcome::Superseded);

    assert!(Arc::ptr_eq(&committed, &coord.working_task_set()));
    assert_eq!(coord.working_task_set().len(), 3);
    assert_eq!(sorted_by_id(cache.read_all().await.unwrap()), make_tasks(3));
    assert_eq!(cache.write_count(), 1);
    assert!(!coord.is_loading());
}

#[tokio::test]
async fn resync_joins_in_flight_refresh() {
    let remote = Arc::new(ScriptedRemote::default());
    let gate = remote.push_gated(Ok(make_tasks(1)));
    let coord = coordinator(InMemoryCache::new(), Arc::clone(&remote));

    let refresh = {
        let coord = coord.clone();
        tokio::spawn(async move { coord.refresh().await })
    };
    remote.wait_for_fetches(1).await;

    let release = async move {
        tokio::task::yield_now().await;
        gate.send(()).unwrap();
    };
    let (joined, ()) = tokio::join!(coord.resync(), release);
    assert_eq!(joined, CycleOutcome::Replaced { task_count: 1 });
    assert_eq!(refresh.await.unwrap(), joined);
    assert_eq!(remote.fetch_count(), 1);
}

// ---------------------------------------------------------------------------
// Supersession during mount
// ---------------------------------------------------------------------------

/// Cache double whose first `read_all` is held until a gate opens.
struct GatedCache {
    inner: InMemoryCache,
    gate: Mutex<Option<oneshot::Receiver<()>>>,
    reads: AtomicUsize,
}

impl GatedCache {
    fn with_tasks(tasks: Vec<Task>) -> (Self, oneshot::Sender<()>) {
        let (tx, rx) = oneshot::channel();
        let cache = Self {
            inner: InMemoryCache::with_tasks(tasks),
            gate: Mutex::new(Some(rx)),
            reads: AtomicUsize::new(0),
        };
        (cache, tx)
    }

    async fn wait_for_reads(&self, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.reads.load(Ordering::SeqCst) < n {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("cache read never started");
    }
}

impl LocalCache for GatedCache {
    async fn read_all(&self) -> Result<Vec<Task>, CacheError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        self.inner.read_all().await
    }

    async fn clear_and_replace(&self, tasks: &[Task]) -> Result<(), CacheError> {
        self.inner.clear_and_replace(tasks).await
    }

    async fn upsert(&self, task: Task) -> Result<(), CacheError> {
        self.inner.upsert(task).await
    }
}

#[tokio::test]
async fn refresh_during_cache_read_keeps_painted_tasks_when_remote_fails() {
    let (cache, gate) = GatedCache::with_tasks(make_tasks(5));
    let cache = Arc::new(cache);
    let remote = InMemoryRemote::new();
    remote.set_failure(Some("offline".to_string()));
    let coord = coordinator(Arc::clone(&cache), remote);

    let mount = {
        let coord = coord.clone();
        tokio::spawn(async move { coord.start().await })
    };
    cache.wait_for_reads(1).await;

    assert!(matches!(
        coord.refresh().await,
        CycleOutcome::RemoteFailed { .. }
    ));
    gate.send(()).unwrap();
    assert_eq!(mount.await.unwrap(), CycleOutcome::Superseded);

    assert_eq!(coord.working_task_set().len(), 5);
    let status = coord.status();
    assert_eq!(status.state, SyncState::Ready);
    assert!(!status.is_loading);
    assert!(status.last_error.unwrap().contains("offline"));
}

#[tokio::test]
async fn late_cache_paint_never_replaces_committed_remote_tasks() {
    let (cache, gate) = GatedCache::with_tasks(make_tasks(5));
    let cache = Arc::new(cache);
    let coord = coordinator(Arc::clone(&cache), InMemoryRemote::with_tasks(make_tasks(3)));

    let mount = {
        let coord = coord.clone();
        tokio::spawn(async move { coord.start().await })
    };
    cache.wait_for_reads(1).await;

    assert_eq!(coord.refresh().await, CycleOutcome::Replaced { task_count: 3 });
    let committed = coord.working_task_set();
    gate.send(()).unwrap();
    assert_eq!(mount.await.unwrap(), CycleOutcome::Superseded);

    assert!(Arc::ptr_eq(&committed, &coord.working_task_set()));
    assert_eq!(coord.working_task_set().tasks(), make_tasks(3).as_slice());
}

#[tokio::test]
async fn failed_refresh_over_painted_set_keeps_it_until_next_sync() {
    let cache = Arc::new(InMemoryCache::with_tasks(make_tasks(5)));
    let remote = Arc::new(ScriptedRemote::default());
    let mount_gate = remote.push_gated(Ok(make_tasks(2)));
    remote.push(Err(RemoteError::Unavailable("offline".to_string())));
    *remote.fallback.lock() = make_tasks(5);
    let coord = coordinator(Arc::clone(&cache), Arc::clone(&remote));

    let mount = {
        let coord = coord.clone();
        tokio::spawn(async move { coord.start().await })
    };
    remote.wait_for_fetches(1).await;
    let painted = coord.working_task_set();
    assert_eq!(painted.len(), 5);

    assert!(matches!(
        coord.refresh().await,
        CycleOutcome::RemoteFailed { .. }
    ));
    assert!(Arc::ptr_eq(&painted, &coord.working_task_set()));
    assert_eq!(coord.status().state, SyncState::Ready);
    assert!(coord.last_error().is_some());

    // The mount's older fetch result is discarded when it finally arrives.
    mount_gate.send(()).unwrap();
    assert_eq!(mount.await.unwrap(), CycleOutcome::Superseded);
    assert!(Arc::ptr_eq(&painted, &coord.working_task_set()));

    assert_eq!(coord.resync().await, CycleOutcome::Unchanged);
    assert!(Arc::ptr_eq(&painted, &coord.working_task_set()));
    assert!(coord.last_error().is_none());
    assert_eq!(cache.write_count(), 0);
}

// ---------------------------------------------------------------------------
// End-to-end scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cached_fifty_matching_remote_is_a_no_op() {
    let cache = Arc::new(InMemoryCache::with_tasks(make_tasks(50)));
    let remote = Arc::new(ScriptedRemote::default());
    let mut shuffled = make_tasks(50);
    shuffled.rotate_left(17);
    shuffled.swap(0, 49);
    let gate = remote.push_gated(Ok(shuffled));
    let coord = coordinator(Arc::clone(&cache), Arc::clone(&remote));

    let mount = {
        let coord = coord.clone();
        tokio::spawn(async move { coord.start().await })
    };
    remote.wait_for_fetches(1).await;

    // Painted from the cache while the fetch is outstanding.
    let painted = coord.working_task_set();
    assert_eq!(painted.len(), 50);
    assert!(coord.is_loading());
    assert_eq!(coord.status().state, SyncState::FetchingRemote);

    gate.send(()).unwrap();
    assert_eq!(mount.await.unwrap(), CycleOutcome::Unchanged);

    assert!(Arc::ptr_eq(&painted, &coord.working_task_set()));
    assert!(!coord.is_loading());
    assert_eq!(coord.status().state, SyncState::Ready);
    assert_eq!(cache.write_count(), 0);
}

#[tokio::test]
async fn empty_cache_adopts_three_remote_tasks() {
    let cache = Arc::new(InMemoryCache::new());
    let remote = InMemoryRemote::with_tasks(make_tasks(3));
    let coord = coordinator(Arc::clone(&cache), remote);

    assert_eq!(coord.start().await, CycleOutcome::Replaced { task_count: 3 });

    assert_eq!(coord.working_task_set().tasks(), make_tasks(3).as_slice());
    assert_eq!(sorted_by_id(cache.read_all().await.unwrap()), make_tasks(3));
}

#[tokio::test]
async fn changed_status_replaces_working_set() {
    let remote = Arc::new(InMemoryRemote::with_tasks(make_tasks(50)));
    let coord = coordinator(InMemoryCache::new(), Arc::clone(&remote));
    coord.start().await;
    let before = coord.working_task_set();
    let target = TaskId::new("TASK-0007");
    assert_eq!(coord.lookup_by_id(&target).unwrap().status, TaskStatus::Todo);

    let mut next = make_tasks(50);
    next[6].status = TaskStatus::Done;
    remote.replace_all(next);

    assert_eq!(coord.resync().await, CycleOutcome::Replaced { task_count: 50 });
    assert!(!Arc::ptr_eq(&before, &coord.working_task_set()));
    assert_eq!(coord.lookup_by_id(&target).unwrap().status, TaskStatus::Done);
}

// ---------------------------------------------------------------------------
// Signature failures
// ---------------------------------------------------------------------------

fn exploding_hasher(_: &[Task]) -> Result<Signature, serde_json::Error> {
    panic!("worker crashed")
}

fn sluggish_hasher(tasks: &[Task]) -> Result<Signature, serde_json::Error> {
    std::thread::sleep(Duration::from_millis(200));
    compute_signature(tasks)
}

#[tokio::test]
async fn worker_failure_assumes_changed() {
    let engine = SignatureEngine::with_hasher(&SyncConfig::default(), exploding_hasher).unwrap();
    let cache = Arc::new(InMemoryCache::with_tasks(make_tasks(3)));
    let coord = SyncCoordinator::new(
        Arc::clone(&cache),
        InMemoryRemote::with_tasks(make_tasks(3)),
        engine,
    );

    assert_eq!(coord.start().await, CycleOutcome::Replaced { task_count: 3 });
    assert!(!coord.is_loading());
    assert_eq!(cache.write_count(), 1);
}

#[tokio::test]
async fn worker_timeout_assumes_changed() {
    let config = SyncConfig {
        signature_timeout: Duration::from_millis(20),
        ..SyncConfig::default()
    };
    let engine = SignatureEngine::with_hasher(&config, sluggish_hasher).unwrap();
    let coord = SyncCoordinator::new(
        InMemoryCache::new(),
        InMemoryRemote::with_tasks(make_tasks(2)),
        engine,
    );

    let outcome = tokio::time::timeout(Duration::from_secs(2), coord.start())
        .await
        .expect("sync must not hang on a slow worker");
    assert_eq!(outcome, CycleOutcome::Replaced { task_count: 2 });
    assert_eq!(coord.status().state, SyncState::Ready);
}

// ---------------------------------------------------------------------------
// Mutations
// ---------------------------------------------------------------------------

#[tokio::test]
async fn mutation_then_refresh_reaches_working_set_and_cache() {
    let cache = Arc::new(InMemoryCache::new());
    let remote = Arc::new(InMemoryRemote::with_tasks(make_tasks(2)));
    let coord = coordinator(Arc::clone(&cache), Arc::clone(&remote));
    coord.start().await;

    let created = remote.create(NewTask::titled("Ship it")).await.unwrap();
    assert_eq!(created.code, "TASK-0003");
    coord.record_optimistic_upsert(created.clone()).await;
    assert!(coord.lookup_by_id(&created.id).is_none(), "optimistic write is cache-only");

    assert_eq!(coord.refresh().await, CycleOutcome::Replaced { task_count: 3 });
    assert_eq!(coord.lookup_by_id(&created.id).unwrap().title, "Ship it");

    let patch = TaskPatch {
        status: Some(TaskStatus::Canceled),
        ..TaskPatch::default()
    };
    remote.update(&created.id, patch).await.unwrap();
    remote.delete(&[TaskId::new("TASK-0001")]).await.unwrap();
    assert_eq!(coord.refresh().await, CycleOutcome::Replaced { task_count: 2 });

    let cached = cache.read_all().await.unwrap();
    assert_eq!(cached.len(), 2);
    assert!(cached.iter().any(|t| t.id == created.id && t.status == TaskStatus::Canceled));
}
