//! `taskgrid`: task table over a JSON task store with a local cache.
//!
//! Every command mounts a sync coordinator: cached tasks are read first,
//! the store is fetched, and the cache is only rewritten when the content
//! signature changed. Mutations go to the store and are followed by a
//! refresh. Configuration via CLI flags, environment variables, or config
//! file (`~/.config/taskgrid/config.toml`).
//!
//! ```bash
//! taskgrid --remote tasks.json list --status todo --sort priority:desc
//! taskgrid --remote tasks.json create "Write release notes" --priority high
//! TASKGRID_REMOTE=tasks.json taskgrid update <id> --status done
//! ```

use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;

use taskgrid::cache::FileCache;
use taskgrid::config::{CliArgs, ClientConfig, Command, ConfigError, ViewArgs};
use taskgrid::remote::{JsonFileRemote, RemoteError, TaskMutations};
use taskgrid::signature::SignatureError;
use taskgrid::sync::{CycleOutcome, SyncCoordinator, SyncState};
use taskgrid::views::{
    DerivedViews, FacetCounts, PageRequest, ParseSortError, SortSpec, TaskFilter, ViewPage,
    ViewQuery,
};
use taskgrid_proto::task::{
    NewTask, ParseEnumError, Task, TaskId, TaskLabel, TaskPatch, TaskPriority, TaskStatus,
};

type Coordinator = SyncCoordinator<FileCache, JsonFileRemote>;

/// Errors reported by the command-line front end.
#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Signature(#[from] SignatureError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    InvalidValue(#[from] ParseEnumError),

    #[error(transparent)]
    InvalidSort(#[from] ParseSortError),

    #[error("nothing to update: pass at least one field")]
    EmptyUpdate,

    #[error("no task with id {0}")]
    UnknownTask(String),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();

    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(2);
        }
    };

    // Logs go to a file; stdout carries command output.
    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());
    tracing::info!("taskgrid starting");

    let command = cli.command.unwrap_or_else(|| Command::List(ViewArgs::default()));
    let result = run(command, &config).await;

    tracing::info!("taskgrid exiting");
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initialize file-based logging.
///
/// Returns a [`WorkerGuard`] that must be held until shutdown to ensure all
/// buffered log entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("taskgrid.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

async fn run(command: Command, config: &ClientConfig) -> Result<(), CliError> {
    let remote = JsonFileRemote::new(config.require_remote()?);
    let cache = FileCache::new(&config.cache_path);
    let coordinator = SyncCoordinator::with_config(cache, remote.clone(), &config.sync)?;

    let result = dispatch(command, config, &coordinator, &remote).await;
    coordinator.shutdown().await;
    result
}

async fn dispatch(
    command: Command,
    config: &ClientConfig,
    coordinator: &Coordinator,
    remote: &JsonFileRemote,
) -> Result<(), CliError> {
    match command {
        Command::List(args) => {
            let query = view_query(&args, config.page_size)?;
            sync(coordinator).await;
            let views = DerivedViews::new();
            let page = views.view(&coordinator.working_task_set(), &query);
            print_table(&page, &config.timestamp_format);
        }
        Command::Facets(args) => {
            let query = view_query(&args, config.page_size)?;
            sync(coordinator).await;
            let views = DerivedViews::new();
            print_facets(&views.facets(&coordinator.working_task_set(), &query.filter));
        }
        Command::Show { id } => {
            sync(coordinator).await;
            let task = coordinator
                .lookup_by_id(&TaskId::new(id.as_str()))
                .ok_or(CliError::UnknownTask(id))?;
            print_task(&task, &config.timestamp_format);
        }
        Command::Create {
            title,
            status,
            label,
            priority,
            estimate,
        } => {
            let mut new = NewTask::titled(title);
            if let Some(s) = status {
                new.status = s.parse::<TaskStatus>()?;
            }
            if let Some(l) = label {
                new.label = l.parse::<TaskLabel>()?;
            }
            if let Some(p) = priority {
                new.priority = p.parse::<TaskPriority>()?;
            }
            if let Some(hours) = estimate {
                new.estimated_hours = hours;
            }
            let created = remote.create(new).await?;
            println!("created {} ({})", created.code, created.id);
            coordinator.record_optimistic_upsert(created).await;
            report(&coordinator.refresh().await);
        }
        Command::Update {
            id,
            title,
            status,
            label,
            priority,
            estimate,
            archived,
        } => {
            let patch = TaskPatch {
                title,
                status: status.map(|s| s.parse::<TaskStatus>()).transpose()?,
                label: label.map(|l| l.parse::<TaskLabel>()).transpose()?,
                priority: priority.map(|p| p.parse::<TaskPriority>()).transpose()?,
                estimated_hours: estimate,
                archived,
            };
            if patch.is_empty() {
                return Err(CliError::EmptyUpdate);
            }
            let updated = remote.update(&TaskId::new(id), patch).await?;
            println!("updated {} ({})", updated.code, updated.id);
            coordinator.record_optimistic_upsert(updated).await;
            report(&coordinator.refresh().await);
        }
        Command::Delete { ids } => {
            let ids: Vec<TaskId> = ids.into_iter().map(TaskId::new).collect();
            let removed = remote.delete(&ids).await?;
            println!("deleted {removed} of {} task(s)", ids.len());
            report(&coordinator.refresh().await);
        }
    }
    Ok(())
}

/// Mounts the coordinator and reports a degraded sync on stderr.
async fn sync(coordinator: &Coordinator) {
    report(&coordinator.start().await);
    let status = coordinator.status();
    if status.state == SyncState::Error {
        eprintln!("warning: no task data available from cache or store");
    }
}

fn report(outcome: &CycleOutcome) {
    match outcome {
        CycleOutcome::RemoteFailed { message } => {
            eprintln!("warning: showing cached tasks, store unavailable: {message}");
        }
        CycleOutcome::Aborted => eprintln!("warning: sync did not complete"),
        CycleOutcome::Unchanged | CycleOutcome::Replaced { .. } | CycleOutcome::Superseded => {}
    }
}

fn view_query(args: &ViewArgs, default_page_size: usize) -> Result<ViewQuery, CliError> {
    let filter = TaskFilter {
        title_query: args.query.clone(),
        statuses: args
            .statuses
            .iter()
            .map(|s| s.parse::<TaskStatus>())
            .collect::<Result<_, _>>()?,
        labels: args
            .labels
            .iter()
            .map(|s| s.parse::<TaskLabel>())
            .collect::<Result<_, _>>()?,
        priorities: args
            .priorities
            .iter()
            .map(|s| s.parse::<TaskPriority>())
            .collect::<Result<_, _>>()?,
        include_archived: args.archived,
    };
    let sort = args
        .sort
        .as_deref()
        .map(str::parse::<SortSpec>)
        .transpose()?;
    Ok(ViewQuery {
        filter,
        sort,
        page: PageRequest {
            index: args.page,
            size: args.page_size.unwrap_or(default_page_size),
        },
    })
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}

fn print_table(page: &ViewPage, timestamp_format: &str) {
    println!(
        "{:<10} {:<40} {:<12} {:<14} {:<8} {:>6}  {}",
        "CODE", "TITLE", "STATUS", "LABEL", "PRIORITY", "EST", "UPDATED"
    );
    for task in &page.rows {
        println!(
            "{:<10} {:<40} {:<12} {:<14} {:<8} {:>6.1}  {}",
            task.code,
            truncate(&task.title, 40),
            task.status,
            task.label,
            task.priority,
            task.estimated_hours,
            task.updated_at.format(timestamp_format),
        );
    }
    println!(
        "page {}/{} ({} task(s))",
        page.page_index + 1,
        page.page_count,
        page.total_rows
    );
}

fn print_facets(counts: &FacetCounts) {
    println!("status:");
    for (status, n) in &counts.statuses {
        println!("  {status:<14} {n}");
    }
    println!("label:");
    for (label, n) in &counts.labels {
        println!("  {label:<14} {n}");
    }
    println!("priority:");
    for (priority, n) in &counts.priorities {
        println!("  {priority:<14} {n}");
    }
}

fn print_task(task: &Task, timestamp_format: &str) {
    println!("id:        {}", task.id);
    println!("code:      {}", task.code);
    println!("title:     {}", task.title);
    println!("status:    {}", task.status);
    println!("label:     {}", task.label);
    println!("priority:  {}", task.priority);
    println!("estimate:  {}h", task.estimated_hours);
    println!("archived:  {}", task.archived);
    println!("created:   {}", task.created_at.format(timestamp_format));
    println!("updated:   {}", task.updated_at.format(timestamp_format));
}
