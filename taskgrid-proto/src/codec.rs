//! Persisted snapshot format for the local task cache.
//!
//! A snapshot is a version tag plus every cached record, encoded with
//! postcard. The whole snapshot is rewritten on every accepted sync, so a
//! reader never sees a mix of old and new records.

use serde::{Deserialize, Serialize};

use crate::task::Task;

/// Version written by [`encode_snapshot`] and required by [`decode_snapshot`].
pub const SNAPSHOT_VERSION: u32 = 1;

/// Error type for snapshot encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// The snapshot was written by an incompatible version.
    #[error("unsupported snapshot version {found} (expected {expected})")]
    UnsupportedVersion {
        /// Version found in the snapshot.
        found: u32,
        /// Version this build reads.
        expected: u32,
    },
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    version: u32,
    records: &'a [Task],
}

#[derive(Deserialize)]
struct SnapshotHeader {
    version: u32,
}

#[derive(Deserialize)]
struct Snapshot {
    #[allow(dead_code)]
    version: u32,
    records: Vec<Task>,
}

/// Encodes every record into a versioned snapshot.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if a record cannot be serialized.
pub fn encode_snapshot(records: &[Task]) -> Result<Vec<u8>, CodecError> {
    let snapshot = SnapshotRef {
        version: SNAPSHOT_VERSION,
        records,
    };
    postcard::to_allocvec(&snapshot).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes a snapshot produced by [`encode_snapshot`].
///
/// # Errors
///
/// Returns `CodecError::UnsupportedVersion` if the version tag differs, or
/// `CodecError::Serialization` if the bytes are corrupt or truncated.
pub fn decode_snapshot(bytes: &[u8]) -> Result<Vec<Task>, CodecError> {
    // The version is the leading field, so it can be read on its own.
    let (header, _) = postcard::take_from_bytes::<SnapshotHeader>(bytes)
        .map_err(|e| CodecError::Serialization(e.to_string()))?;
    if header.version != SNAPSHOT_VERSION {
        return Err(CodecError::UnsupportedVersion {
            found: header.version,
            expected: SNAPSHOT_VERSION,
        });
    }
    let snapshot: Snapshot =
        postcard::from_bytes(bytes).map_err(|e| CodecError::Serialization(e.to_string()))?;
    Ok(snapshot.records)
}
