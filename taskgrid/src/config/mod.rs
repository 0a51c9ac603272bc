//! Configuration system for the `taskgrid` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/taskgrid/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::{Path, PathBuf};
use std::time::Duration;

use taskgrid_proto::task::Timestamp;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// No remote store path was given on the command line, in the
    /// environment, or in the config file.
    #[error("no remote store configured (use --remote, TASKGRID_REMOTE, or [store] remote_path)")]
    MissingRemote,

    /// `[display] timestamp_format` is not a valid strftime pattern.
    #[error("invalid timestamp_format {0:?}")]
    InvalidTimestampFormat(String),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    store: StoreFileConfig,
    sync: SyncFileConfig,
    display: DisplayFileConfig,
}

/// `[store]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct StoreFileConfig {
    remote_path: Option<PathBuf>,
    cache_path: Option<PathBuf>,
}

/// `[sync]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SyncFileConfig {
    signature_timeout_ms: Option<u64>,
    worker_queue_capacity: Option<usize>,
    memo_capacity: Option<usize>,
}

/// `[display]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct DisplayFileConfig {
    page_size: Option<usize>,
    timestamp_format: Option<String>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Synchronization and signature-worker settings (used by `SignatureEngine`
/// and `SyncCoordinator`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Upper bound on a single signature request, queueing included.
    pub signature_timeout: Duration,
    /// Capacity of the worker's request queue.
    pub worker_queue_capacity: usize,
    /// Number of recent signatures the worker remembers. Zero disables the memo.
    pub memo_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            signature_timeout: Duration::from_secs(5),
            worker_queue_capacity: 64,
            memo_capacity: 8,
        }
    }
}

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- Store --
    /// JSON file acting as the authoritative remote store.
    pub remote_path: Option<PathBuf>,
    /// Local cache snapshot file.
    pub cache_path: PathBuf,

    // -- Sync --
    /// Signature worker and coordinator settings.
    pub sync: SyncConfig,

    // -- Display --
    /// Default number of rows per page. Zero shows every row.
    pub page_size: usize,
    /// Timestamp display format string (chrono).
    pub timestamp_format: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            remote_path: None,
            cache_path: default_cache_path(),
            sync: SyncConfig::default(),
            page_size: 20,
            timestamp_format: "%Y-%m-%d %H:%M".to_string(),
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// CLI args and env vars are parsed via `clap`. If `--config` is given
    /// and the file does not exist, returns an error. If no `--config` is
    /// given, the default path (`~/.config/taskgrid/config.toml`) is tried
    /// and silently ignored if missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed, or if it names an invalid timestamp format.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Self::resolve(cli, &file)
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default. This is separated from `load()` to
    /// enable unit testing without CLI parsing.
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        if let Some(pattern) = file
            .display
            .timestamp_format
            .as_ref()
            .filter(|p| !Timestamp::is_valid_format(p))
        {
            return Err(ConfigError::InvalidTimestampFormat(pattern.clone()));
        }

        Ok(Self {
            remote_path: cli
                .remote
                .clone()
                .or_else(|| file.store.remote_path.clone()),
            cache_path: cli
                .cache
                .clone()
                .or_else(|| file.store.cache_path.clone())
                .unwrap_or(defaults.cache_path),
            sync: SyncConfig {
                signature_timeout: file
                    .sync
                    .signature_timeout_ms
                    .map_or(defaults.sync.signature_timeout, Duration::from_millis),
                worker_queue_capacity: file
                    .sync
                    .worker_queue_capacity
                    .unwrap_or(defaults.sync.worker_queue_capacity),
                memo_capacity: file
                    .sync
                    .memo_capacity
                    .unwrap_or(defaults.sync.memo_capacity),
            },
            page_size: file.display.page_size.unwrap_or(defaults.page_size),
            timestamp_format: file
                .display
                .timestamp_format
                .clone()
                .unwrap_or(defaults.timestamp_format),
        })
    }

    /// Returns the configured remote store path.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingRemote`] if none was configured.
    pub fn require_remote(&self) -> Result<&Path, ConfigError> {
        self.remote_path
            .as_deref()
            .ok_or(ConfigError::MissingRemote)
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Task table with local cache and signature-gated sync")]
pub struct CliArgs {
    /// JSON file acting as the authoritative task store.
    #[arg(long, env = "TASKGRID_REMOTE")]
    pub remote: Option<PathBuf>,

    /// Local cache snapshot file (default: `~/.cache/taskgrid/cache.bin`).
    #[arg(long, env = "TASKGRID_CACHE")]
    pub cache: Option<PathBuf>,

    /// Path to config file (default: `~/.config/taskgrid/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "TASKGRID_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/taskgrid.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Command to run (default: `list`).
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Filter, sort, and paging flags shared by `list` and `facets`.
#[derive(clap::Args, Debug, Default, Clone)]
pub struct ViewArgs {
    /// Case-insensitive substring matched against title and code.
    #[arg(long, short = 'q')]
    pub query: Option<String>,

    /// Only show these statuses (repeatable).
    #[arg(long = "status")]
    pub statuses: Vec<String>,

    /// Only show these labels (repeatable).
    #[arg(long = "label")]
    pub labels: Vec<String>,

    /// Only show these priorities (repeatable).
    #[arg(long = "priority")]
    pub priorities: Vec<String>,

    /// Include archived tasks.
    #[arg(long)]
    pub archived: bool,

    /// Sort column, optionally suffixed with `:asc` or `:desc`.
    #[arg(long)]
    pub sort: Option<String>,

    /// Zero-based page index.
    #[arg(long, default_value_t = 0)]
    pub page: usize,

    /// Rows per page (default from config; 0 shows every row).
    #[arg(long)]
    pub page_size: Option<usize>,
}

/// Subcommands of the `taskgrid` binary.
#[derive(clap::Subcommand, Debug, Clone)]
pub enum Command {
    /// Sync, then print a filtered, sorted, paginated table.
    List(ViewArgs),

    /// Sync, then print facet counts for the filtered set.
    Facets(ViewArgs),

    /// Print a single task.
    Show {
        /// Task id.
        id: String,
    },

    /// Create a task in the remote store.
    Create {
        /// Task title.
        title: String,
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        label: Option<String>,
        #[arg(long)]
        priority: Option<String>,
        /// Estimated effort in hours.
        #[arg(long)]
        estimate: Option<f64>,
    },

    /// Update fields of a task in the remote store.
    Update {
        /// Task id.
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        label: Option<String>,
        #[arg(long)]
        priority: Option<String>,
        #[arg(long)]
        estimate: Option<f64>,
        /// Archive (`true`) or restore (`false`) the task.
        #[arg(long)]
        archived: Option<bool>,
    },

    /// Delete tasks from the remote store.
    Delete {
        /// Task ids.
        #[arg(required = true)]
        ids: Vec<String>,
    },
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Default location of the local cache snapshot.
fn default_cache_path() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("taskgrid")
        .join("cache.bin")
}

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&Path>) -> Result<ConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ConfigFile::default());
        };
        config_dir.join("taskgrid").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
