//! End-to-end sessions over the file-backed cache and JSON store.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::path::Path;

use taskgrid::cache::{FileCache, LocalCache};
use taskgrid::config::SyncConfig;
use taskgrid::remote::{JsonFileRemote, RemoteStore, TaskMutations};
use taskgrid::sync::{CycleOutcome, SyncCoordinator, SyncState};
use taskgrid::views::{DerivedViews, PageRequest, SortSpec, TaskFilter, ViewQuery};
use taskgrid_proto::task::{NewTask, TaskId, TaskPatch, TaskStatus};

type Session = SyncCoordinator<FileCache, JsonFileRemote>;

const STORE: &str = r#"[
    {"id": "a1", "code": "TASK-0001", "title": "Write docs", "status": "todo",
     "label": "documentation", "priority": "low", "estimated_hours": 2,
     "created_at": "2024-03-01T09:00:00Z", "updated_at": "2024-03-02T09:00:00Z"},
    {"id": "b2", "code": "TASK-0002", "title": "Fix login crash", "status": "in-progress",
     "label": "bug", "priority": "high", "estimatedHours": 5.5,
     "createdAt": 1709283600000, "updatedAt": "not a date"},
    {"id": "c3", "code": "TASK-0003", "title": "Dark mode", "status": "done",
     "label": "feature", "priority": "medium", "archived": true}
]"#;

fn session(store: &Path, cache: &Path) -> Session {
    SyncCoordinator::with_config(
        FileCache::new(cache),
        JsonFileRemote::new(store),
        &SyncConfig::default(),
    )
    .unwrap()
}

#[tokio::test]
async fn first_session_populates_cache_and_second_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let store = dir.path().join("tasks.json");
    let cache_path = dir.path().join("cache").join("tasks.bin");
    std::fs::write(&store, STORE).unwrap();

    let first = session(&store, &cache_path);
    assert_eq!(first.start().await, CycleOutcome::Replaced { task_count: 3 });
    first.shutdown().await;
    let modified = std::fs::metadata(&cache_path).unwrap().modified().unwrap();

    let second = session(&store, &cache_path);
    assert_eq!(second.start().await, CycleOutcome::Unchanged);
    assert_eq!(second.working_task_set().len(), 3);
    assert_eq!(
        std::fs::metadata(&cache_path).unwrap().modified().unwrap(),
        modified,
        "unchanged sync must not rewrite the cache"
    );
    // Lenient ingestion clamps a bad `updated_at` up to `created_at`.
    let crash = second.lookup_by_id(&TaskId::new("b2")).unwrap();
    assert_eq!(crash.updated_at, crash.created_at);
    second.shutdown().await;
}

#[tokio::test]
async fn corrupt_cache_is_replaced_from_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = dir.path().join("tasks.json");
    let cache_path = dir.path().join("tasks.bin");
    std::fs::write(&store, STORE).unwrap();
    std::fs::write(&cache_path, b"\x09not a snapshot").unwrap();

    let coord = session(&store, &cache_path);
    assert_eq!(coord.start().await, CycleOutcome::Replaced { task_count: 3 });
    assert_eq!(coord.status().state, SyncState::Ready);

    let cached = FileCache::new(&cache_path).read_all().await.unwrap();
    assert_eq!(cached.len(), 3);
}

#[tokio::test]
async fn unreadable_cache_and_store_enter_error_state() {
    let dir = tempfile::tempdir().unwrap();
    let store = dir.path().join("tasks.json");
    let cache_path = dir.path().join("tasks.bin");
    std::fs::write(&store, "{ this is not json").unwrap();
    std::fs::write(&cache_path, b"\x09not a snapshot").unwrap();

    let coord = session(&store, &cache_path);
    assert!(matches!(
        coord.start().await,
        CycleOutcome::RemoteFailed { .. }
    ));
    let status = coord.status();
    assert_eq!(status.state, SyncState::Error);
    assert!(status.last_error.is_some());
    assert!(!status.is_loading);
    assert!(coord.working_task_set().is_empty());
}

#[tokio::test]
async fn mutations_flow_through_store_cache_and_views() {
    let dir = tempfile::tempdir().unwrap();
    let store_path = dir.path().join("tasks.json");
    let cache_path = dir.path().join("tasks.bin");
    std::fs::write(&store_path, STORE).unwrap();

    let store = JsonFileRemote::new(&store_path);
    let coord = SyncCoordinator::with_config(
        FileCache::new(&cache_path),
        store.clone(),
        &SyncConfig::default(),
    )
    .unwrap();
    coord.start().await;

    let mut new = NewTask::titled("Add CSV export");
    new.status = TaskStatus::Todo;
    let created = store.create(new).await.unwrap();
    assert_eq!(created.code, "TASK-0004");
    coord.record_optimistic_upsert(created.clone()).await;
    assert_eq!(coord.refresh().await, CycleOutcome::Replaced { task_count: 4 });

    let patch = TaskPatch {
        status: Some(TaskStatus::Done),
        ..TaskPatch::default()
    };
    store.update(&TaskId::new("a1"), patch).await.unwrap();
    assert_eq!(store.delete(&[TaskId::new("c3")]).await.unwrap(), 1);
    assert_eq!(coord.refresh().await, CycleOutcome::Replaced { task_count: 3 });

    // The store file and the cache agree with the working set.
    assert_eq!(store.fetch_all().await.unwrap().len(), 3);
    let cached = FileCache::new(&cache_path).read_all().await.unwrap();
    assert_eq!(cached.as_slice(), coord.working_task_set().tasks());

    let views = DerivedViews::new();
    let done = views.view(
        &coord.working_task_set(),
        &ViewQuery {
            filter: TaskFilter {
                statuses: [TaskStatus::Done].into_iter().collect(),
                ..TaskFilter::default()
            },
            sort: Some("code".parse::<SortSpec>().unwrap()),
            page: PageRequest::default(),
        },
    );
    assert_eq!(done.total_rows, 1);
    assert_eq!(done.rows[0].id, TaskId::new("a1"));
    coord.shutdown().await;
}
