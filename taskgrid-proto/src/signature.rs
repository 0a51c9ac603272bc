//! Message protocol between the sync coordinator and the signature worker.
//!
//! Every request carries a [`CorrelationId`]; every reply echoes it, so
//! overlapping requests are matched to their originators rather than to
//! whatever message arrived last. The JSON form is tagged
//! `{"type": "<snake_case_variant>", ...}` and ignores unknown fields.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Current shape of the worker protocol.
pub const PROTOCOL_VERSION: u32 = 1;

/// Identifies one signature request and its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(u64);

impl CorrelationId {
    /// Wraps a raw id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw id.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// Order-independent fingerprint of a task collection (lowercase hex).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signature(String);

impl Signature {
    /// Wraps an encoded digest.
    pub fn new(digest: impl Into<String>) -> Self {
        Self(digest.into())
    }

    /// Returns the encoded digest.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the first 12 characters, for log lines.
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A request to fingerprint a task collection.
///
/// Generic over the payload so the in-process worker can receive a shared
/// immutable set while the JSON form carries a plain task list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureRequest<T> {
    /// Echoed in the reply.
    pub correlation_id: CorrelationId,
    /// The collection to fingerprint.
    pub tasks: T,
}

/// The worker's answer to one [`SignatureRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignatureReply {
    /// Computation succeeded.
    Signature {
        /// Id of the originating request.
        correlation_id: CorrelationId,
        /// The computed fingerprint.
        signature: Signature,
    },
    /// Computation failed for this request only.
    Error {
        /// Id of the originating request.
        correlation_id: CorrelationId,
        /// Human-readable failure description.
        message: String,
    },
}

impl SignatureReply {
    /// Returns the id of the request this reply answers.
    #[must_use]
    pub const fn correlation_id(&self) -> CorrelationId {
        match self {
            Self::Signature { correlation_id, .. } | Self::Error { correlation_id, .. } => {
                *correlation_id
            }
        }
    }

    /// Converts into the signature or the worker's error message.
    ///
    /// # Errors
    ///
    /// Returns the message of an [`SignatureReply::Error`].
    pub fn into_result(self) -> Result<Signature, String> {
        match self {
            Self::Signature { signature, .. } => Ok(signature),
            Self::Error { message, .. } => Err(message),
        }
    }
}

/// Serializes a reply as a single JSON line, as written to debug logs.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_reply(reply: &SignatureReply) -> Result<String, serde_json::Error> {
    serde_json::to_string(reply)
}
