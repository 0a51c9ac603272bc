//! Task data model for `TaskGrid`.
//!
//! [`Task`] is the strict, at-rest shape held by the working set and the
//! local cache. [`RawTask`] is the lenient ingestion shape used when
//! decoding remote or legacy records, where timestamps may arrive as
//! numbers, RFC 3339 strings, or garbage.

use std::fmt::{self, Write as _};
use std::str::FromStr;

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Utc};
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum allowed task title length in characters.
pub const MAX_TASK_TITLE_LENGTH: usize = 256;

/// Opaque, immutable task identifier assigned by the remote store.
///
/// Used as the cache key, the table row key, and the canonical sort key
/// when computing content signatures.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Wraps an existing identifier string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh time-ordered identifier (UUID v7).
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Milliseconds since the Unix epoch.
///
/// Always numeric at rest, so comparisons and signatures never depend on
/// how the source happened to spell the date.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// The Unix epoch, used for missing or unparseable dates.
    pub const EPOCH: Self = Self(0);

    /// Creates a timestamp from milliseconds since the epoch.
    #[must_use]
    pub const fn from_millis(ms: i64) -> Self {
        Self(ms)
    }

    /// Returns milliseconds since the epoch.
    #[must_use]
    pub const fn as_millis(self) -> i64 {
        self.0
    }

    /// Returns the current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        Self(Utc::now().timestamp_millis())
    }

    /// Parses an RFC 3339 date or a decimal millisecond count.
    ///
    /// Returns `None` for anything else.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
            return Some(Self(dt.timestamp_millis()));
        }
        text.parse::<i64>().ok().map(Self)
    }

    /// Formats the timestamp in UTC with a `chrono` format string.
    ///
    /// Falls back to RFC 3339 if `pattern` is not a valid format.
    #[must_use]
    pub fn format(self, pattern: &str) -> String {
        let Some(dt) = DateTime::<Utc>::from_timestamp_millis(self.0) else {
            return self.0.to_string();
        };
        let mut out = String::new();
        if write!(out, "{}", dt.format(pattern)).is_err() {
            return dt.to_rfc3339();
        }
        out
    }

    /// Returns `true` if `pattern` contains only valid strftime specifiers.
    #[must_use]
    pub fn is_valid_format(pattern: &str) -> bool {
        StrftimeItems::new(pattern).all(|item| !matches!(item, Item::Error))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match DateTime::<Utc>::from_timestamp_millis(self.0) {
            Some(dt) => write!(f, "{}", dt.to_rfc3339()),
            None => write!(f, "{}ms", self.0),
        }
    }
}

/// Error returned when parsing an enum value from its string form.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind}: {value:?} (expected one of: {expected})")]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
    expected: &'static str,
}

/// Implements `Display` + `FromStr` over the kebab-case names that serde
/// also uses, and an `ALL` constant in declaration order.
macro_rules! string_enum {
    ($ty:ident, $kind:literal, { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            /// Every variant, in sort order.
            pub const ALL: &'static [Self] = &[$(Self::$variant),+];

            /// Returns the wire name of this variant.
            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $name),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.pad(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($name => Ok(Self::$variant),)+
                    _ => Err(ParseEnumError {
                        kind: $kind,
                        value: s.to_string(),
                        expected: concat!($($name, " "),+),
                    }),
                }
            }
        }
    };
}

/// Workflow status of a task.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    /// Not started.
    #[default]
    Todo,
    /// Actively being worked on.
    InProgress,
    /// Finished.
    Done,
    /// Abandoned.
    Canceled,
}

string_enum!(TaskStatus, "status", {
    Todo => "todo",
    InProgress => "in-progress",
    Done => "done",
    Canceled => "canceled",
});

/// Category label of a task.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum TaskLabel {
    /// Defect report.
    Bug,
    /// New functionality.
    #[default]
    Feature,
    /// Documentation work.
    Documentation,
    /// Improvement to existing functionality.
    Enhancement,
}

string_enum!(TaskLabel, "label", {
    Bug => "bug",
    Feature => "feature",
    Documentation => "documentation",
    Enhancement => "enhancement",
});

/// Priority of a task.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum TaskPriority {
    /// Low priority.
    Low,
    /// Medium priority.
    #[default]
    Medium,
    /// High priority.
    High,
}

string_enum!(TaskPriority, "priority", {
    Low => "low",
    Medium => "medium",
    High => "high",
});

/// A task as mirrored from the remote store.
///
/// Invariant: `updated_at >= created_at`. The remote store is the only
/// origin of tasks; the cache and the working set only mirror them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Remote-assigned identifier.
    pub id: TaskId,
    /// Short human-readable code such as `TASK-0007`.
    pub code: String,
    /// Free-text title.
    pub title: String,
    /// Workflow status.
    pub status: TaskStatus,
    /// Category label.
    pub label: TaskLabel,
    /// Priority.
    pub priority: TaskPriority,
    /// Estimated effort in hours (finite, non-negative).
    pub estimated_hours: f64,
    /// Whether the task is archived.
    pub archived: bool,
    /// Creation time.
    pub created_at: Timestamp,
    /// Last modification time.
    pub updated_at: Timestamp,
}

// ---------------------------------------------------------------------------
// Lenient ingestion
// ---------------------------------------------------------------------------

/// A timestamp field as found in untrusted input.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    /// Integer milliseconds since the epoch.
    Millis(i64),
    /// Fractional milliseconds since the epoch.
    Fractional(f64),
    /// Date string (RFC 3339 or decimal milliseconds).
    Text(String),
    /// Anything else (objects, arrays, booleans).
    Unrecognized(IgnoredAny),
}

impl RawTimestamp {
    /// Resolves to a [`Timestamp`], or `None` if the value is unusable.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn resolve(&self) -> Option<Timestamp> {
        match self {
            Self::Millis(ms) => Some(Timestamp::from_millis(*ms)),
            // Truncation toward zero is the intended millisecond rounding.
            Self::Fractional(ms) if ms.is_finite() => Some(Timestamp::from_millis(*ms as i64)),
            Self::Text(text) => Timestamp::parse(text),
            Self::Fractional(_) | Self::Unrecognized(_) => None,
        }
    }
}

/// Lenient shape of a task record from the remote store or legacy data.
///
/// Converting into [`Task`] never fails: malformed timestamps become the
/// epoch, invalid estimates become zero, and `updated_at` is clamped up
/// to `created_at`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawTask {
    /// Remote-assigned identifier (required).
    pub id: String,
    /// Human-readable code; defaults to the identifier.
    #[serde(default)]
    pub code: Option<String>,
    /// Title.
    #[serde(default)]
    pub title: String,
    /// Status.
    #[serde(default)]
    pub status: TaskStatus,
    /// Label.
    #[serde(default)]
    pub label: TaskLabel,
    /// Priority.
    #[serde(default)]
    pub priority: TaskPriority,
    /// Estimated hours.
    #[serde(default, alias = "estimatedHours")]
    pub estimated_hours: Option<f64>,
    /// Archived flag.
    #[serde(default)]
    pub archived: Option<bool>,
    /// Creation time in any accepted spelling.
    #[serde(default, alias = "createdAt")]
    pub created_at: Option<RawTimestamp>,
    /// Modification time in any accepted spelling.
    #[serde(default, alias = "updatedAt")]
    pub updated_at: Option<RawTimestamp>,
}

impl RawTask {
    /// Normalizes this record into a strict [`Task`].
    #[must_use]
    pub fn into_task(self) -> Task {
        let created_at = resolve_field(&self.id, "created_at", self.created_at.as_ref());
        let updated_at = resolve_field(&self.id, "updated_at", self.updated_at.as_ref());
        let estimated_hours = match self.estimated_hours {
            Some(hours) if hours.is_finite() && hours >= 0.0 => hours,
            Some(hours) => {
                tracing::warn!(task_id = %self.id, hours, "invalid estimate, using 0");
                0.0
            }
            None => 0.0,
        };

        Task {
            code: self.code.unwrap_or_else(|| self.id.clone()),
            id: TaskId::new(self.id),
            title: self.title,
            status: self.status,
            label: self.label,
            priority: self.priority,
            estimated_hours,
            archived: self.archived.unwrap_or(false),
            created_at,
            updated_at: updated_at.max(created_at),
        }
    }
}

impl From<RawTask> for Task {
    fn from(raw: RawTask) -> Self {
        raw.into_task()
    }
}

fn resolve_field(task_id: &str, field: &'static str, raw: Option<&RawTimestamp>) -> Timestamp {
    match raw {
        Some(value) => value.resolve().unwrap_or_else(|| {
            tracing::warn!(task_id, field, ?value, "unparseable timestamp, using epoch");
            Timestamp::EPOCH
        }),
        None => Timestamp::EPOCH,
    }
}

// ---------------------------------------------------------------------------
// Mutation payloads
// ---------------------------------------------------------------------------

/// Validation failures for mutation payloads.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskValidationError {
    /// Task title cannot be empty.
    #[error("task title cannot be empty")]
    TitleEmpty,
    /// Task title exceeds the maximum length.
    #[error("task title too long (max 256 characters)")]
    TitleTooLong,
    /// Estimate is negative, NaN, or infinite.
    #[error("estimated hours must be a finite, non-negative number")]
    InvalidEstimate,
}

fn validate_title(title: &str) -> Result<(), TaskValidationError> {
    if title.is_empty() {
        return Err(TaskValidationError::TitleEmpty);
    }
    if title.chars().count() > MAX_TASK_TITLE_LENGTH {
        return Err(TaskValidationError::TitleTooLong);
    }
    Ok(())
}

fn validate_estimate(hours: f64) -> Result<(), TaskValidationError> {
    if hours.is_finite() && hours >= 0.0 {
        Ok(())
    } else {
        Err(TaskValidationError::InvalidEstimate)
    }
}

/// Payload of a create request; the store assigns id, code, and timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    /// Title.
    pub title: String,
    /// Initial status.
    #[serde(default)]
    pub status: TaskStatus,
    /// Label.
    #[serde(default)]
    pub label: TaskLabel,
    /// Priority.
    #[serde(default)]
    pub priority: TaskPriority,
    /// Estimated hours.
    #[serde(default)]
    pub estimated_hours: f64,
}

impl NewTask {
    /// Creates a payload with default status, label, priority, and estimate.
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            status: TaskStatus::default(),
            label: TaskLabel::default(),
            priority: TaskPriority::default(),
            estimated_hours: 0.0,
        }
    }

    /// Checks the title and estimate.
    ///
    /// # Errors
    ///
    /// Returns the first [`TaskValidationError`] found.
    pub fn validate(&self) -> Result<(), TaskValidationError> {
        validate_title(&self.title)?;
        validate_estimate(self.estimated_hours)
    }

    /// Builds the stored task. `now` becomes both timestamps.
    #[must_use]
    pub fn into_task(self, id: TaskId, code: String, now: Timestamp) -> Task {
        Task {
            id,
            code,
            title: self.title,
            status: self.status,
            label: self.label,
            priority: self.priority,
            estimated_hours: self.estimated_hours,
            archived: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Targeted update; `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskPatch {
    /// New title.
    #[serde(default)]
    pub title: Option<String>,
    /// New status.
    #[serde(default)]
    pub status: Option<TaskStatus>,
    /// New label.
    #[serde(default)]
    pub label: Option<TaskLabel>,
    /// New priority.
    #[serde(default)]
    pub priority: Option<TaskPriority>,
    /// New estimate.
    #[serde(default)]
    pub estimated_hours: Option<f64>,
    /// New archived flag.
    #[serde(default)]
    pub archived: Option<bool>,
}

impl TaskPatch {
    /// Returns `true` if no field would change.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.status.is_none()
            && self.label.is_none()
            && self.priority.is_none()
            && self.estimated_hours.is_none()
            && self.archived.is_none()
    }

    /// Checks any provided title and estimate.
    ///
    /// # Errors
    ///
    /// Returns the first [`TaskValidationError`] found.
    pub fn validate(&self) -> Result<(), TaskValidationError> {
        if let Some(title) = &self.title {
            validate_title(title)?;
        }
        if let Some(hours) = self.estimated_hours {
            validate_estimate(hours)?;
        }
        Ok(())
    }

    /// Applies the patch and bumps `updated_at`.
    ///
    /// The new `updated_at` is `now`, or one millisecond past the previous
    /// value if the clock has not advanced, so every update is observable.
    pub fn apply_to(&self, task: &mut Task, now: Timestamp) {
        if let Some(title) = &self.title {
            task.title.clone_from(title);
        }
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(label) = self.label {
            task.label = label;
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(hours) = self.estimated_hours {
            task.estimated_hours = hours;
        }
        if let Some(archived) = self.archived {
            task.archived = archived;
        }
        let bumped = Timestamp::from_millis(task.updated_at.as_millis().saturating_add(1));
        task.updated_at = now.max(bumped);
    }
}
