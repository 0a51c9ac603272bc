//! Canonical serialization and hashing of task collections.
//!
//! Each task is rendered as a fixed-field JSON record with numeric
//! timestamps, the records are ordered by id (then by their own bytes, so
//! even duplicate ids cannot make the result order-dependent), joined into
//! a JSON array, and hashed with SHA-256.

use serde::Serialize;
use sha2::{Digest, Sha256};

use taskgrid_proto::signature::Signature;
use taskgrid_proto::task::{Task, TaskLabel, TaskPriority, TaskStatus};

/// JSON has no spelling for non-finite numbers and serde_json writes them
/// all as `null`, so they are hashed as distinct strings instead.
#[derive(Serialize)]
#[serde(untagged)]
enum CanonicalHours {
    Finite(f64),
    NonFinite(&'static str),
}

impl From<f64> for CanonicalHours {
    fn from(hours: f64) -> Self {
        if hours.is_nan() {
            Self::NonFinite("NaN")
        } else if hours.is_infinite() {
            Self::NonFinite(if hours > 0.0 { "inf" } else { "-inf" })
        } else if hours == 0.0 {
            // -0.0 and 0.0 compare equal but print differently.
            Self::Finite(0.0)
        } else {
            Self::Finite(hours)
        }
    }
}

/// Fixed shape hashed for every task.
#[derive(Serialize)]
struct CanonicalTask<'a> {
    id: &'a str,
    code: &'a str,
    title: &'a str,
    status: TaskStatus,
    label: TaskLabel,
    priority: TaskPriority,
    estimated_hours: CanonicalHours,
    archived: bool,
    created_at: i64,
    updated_at: i64,
}

impl<'a> From<&'a Task> for CanonicalTask<'a> {
    fn from(task: &'a Task) -> Self {
        Self {
            id: task.id.as_str(),
            code: &task.code,
            title: &task.title,
            status: task.status,
            label: task.label,
            priority: task.priority,
            estimated_hours: task.estimated_hours.into(),
            archived: task.archived,
            created_at: task.created_at.as_millis(),
            updated_at: task.updated_at.as_millis(),
        }
    }
}

/// Produces the canonical byte form of a collection.
///
/// # Errors
///
/// Returns an error if a record cannot be serialized.
pub fn canonical_bytes(tasks: &[Task]) -> Result<Vec<u8>, serde_json::Error> {
    let mut records = tasks
        .iter()
        .map(|task| Ok((task.id.as_str(), serde_json::to_vec(&CanonicalTask::from(task))?)))
        .collect::<Result<Vec<(&str, Vec<u8>)>, serde_json::Error>>()?;
    records.sort_unstable();

    let body: usize = records.iter().map(|(_, bytes)| bytes.len() + 1).sum();
    let mut out = Vec::with_capacity(body + 2);
    out.push(b'[');
    for (i, (_, bytes)) in records.iter().enumerate() {
        if i > 0 {
            out.push(b',');
        }
        out.extend_from_slice(bytes);
    }
    out.push(b']');
    Ok(out)
}

/// Computes the content signature of a collection.
///
/// Equal for collections with the same task content in any order; any
/// change to any field of any task changes the result.
///
/// # Errors
///
/// Returns an error if a record cannot be serialized.
pub fn compute_signature(tasks: &[Task]) -> Result<Signature, serde_json::Error> {
    let bytes = canonical_bytes(tasks)?;
    Ok(Signature::new(hex::encode(Sha256::digest(&bytes))))
}
