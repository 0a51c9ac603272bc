//! The long-lived background thread that computes signatures.
//!
//! One worker per session. It blocks on its request queue, so hashing a
//! large collection never occupies a tokio executor thread, and answers
//! every request on the reply channel with the request's correlation id.

use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;

use lru::LruCache;
use tokio::sync::mpsc;

use taskgrid_proto::signature::{PROTOCOL_VERSION, Signature, SignatureReply, SignatureRequest};
use taskgrid_proto::task::Task;

use crate::sync::TaskSet;

use super::SignatureError;

/// A request as carried on the in-process queue.
pub type Job = SignatureRequest<Arc<TaskSet>>;

/// Function used by the worker to fingerprint a collection.
pub type Hasher = fn(&[Task]) -> Result<Signature, serde_json::Error>;

/// Bounded memo of recent signatures, keyed by task-set identity.
///
/// Each entry retains its `Arc`, so the allocation behind a cached key
/// cannot be freed and reused by a different set while the entry lives.
struct SignatureMemo {
    entries: LruCache<usize, (Arc<TaskSet>, Signature)>,
}

impl SignatureMemo {
    fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: LruCache::new(capacity),
        }
    }

    fn key(set: &Arc<TaskSet>) -> usize {
        Arc::as_ptr(set) as usize
    }

    fn get(&mut self, set: &Arc<TaskSet>) -> Option<Signature> {
        self.entries
            .get(&Self::key(set))
            .filter(|(cached, _)| Arc::ptr_eq(cached, set))
            .map(|(_, signature)| signature.clone())
    }

    fn put(&mut self, set: &Arc<TaskSet>, signature: Signature) {
        self.entries
            .put(Self::key(set), (Arc::clone(set), signature));
    }
}

/// Handle to the worker thread.
pub struct SignatureWorker {
    handle: Option<JoinHandle<()>>,
}

impl SignatureWorker {
    /// Starts the worker thread.
    ///
    /// Returns the worker handle, the request queue (bounded by
    /// `queue_capacity`), and the reply stream. The thread exits once every
    /// request sender is dropped or the reply stream is closed.
    ///
    /// # Errors
    ///
    /// Returns [`SignatureError::Spawn`] if the OS refuses to create the thread.
    pub fn spawn(
        queue_capacity: usize,
        memo_capacity: usize,
        hasher: Hasher,
    ) -> Result<(Self, mpsc::Sender<Job>, mpsc::UnboundedReceiver<SignatureReply>), SignatureError>
    {
        let (job_tx, job_rx) = mpsc::channel::<Job>(queue_capacity.max(1));
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();
        let memo = NonZeroUsize::new(memo_capacity).map(SignatureMemo::new);

        let handle = std::thread::Builder::new()
            .name("taskgrid-signature".to_string())
            .spawn(move || run(job_rx, &reply_tx, memo, hasher))
            .map_err(SignatureError::Spawn)?;

        tracing::debug!(
            protocol_version = PROTOCOL_VERSION,
            queue_capacity,
            memo_capacity,
            "signature worker started"
        );
        Ok((
            Self {
                handle: Some(handle),
            },
            job_tx,
            reply_rx,
        ))
    }

    /// Takes the thread handle so it can be joined once the queue is closed.
    pub(crate) fn take_handle(&mut self) -> Option<JoinHandle<()>> {
        self.handle.take()
    }
}

fn run(
    mut jobs: mpsc::Receiver<Job>,
    replies: &mpsc::UnboundedSender<SignatureReply>,
    mut memo: Option<SignatureMemo>,
    hasher: Hasher,
) {
    let (mut computed, mut memo_hits) = (0u64, 0u64);
    while let Some(job) = jobs.blocking_recv() {
        let correlation_id = job.correlation_id;
        let cached = memo.as_mut().and_then(|m| m.get(&job.tasks));
        let reply = if let Some(signature) = cached {
            memo_hits += 1;
            SignatureReply::Signature {
                correlation_id,
                signature,
            }
        } else {
            computed += 1;
            match compute(&job.tasks, hasher) {
                Ok(signature) => {
                    if let Some(m) = memo.as_mut() {
                        m.put(&job.tasks, signature.clone());
                    }
                    SignatureReply::Signature {
                        correlation_id,
                        signature,
                    }
                }
                Err(message) => {
                    tracing::warn!(%correlation_id, error = %message, "signature computation failed");
                    SignatureReply::Error {
                        correlation_id,
                        message,
                    }
                }
            }
        };
        // Drop our reference before replying so memo eviction alone governs retention.
        drop(job);
        if replies.send(reply).is_err() {
            break;
        }
    }
    tracing::debug!(
        computed,
        memo_hits,
        "signature worker stopped"
    );
}

fn compute(set: &TaskSet, hasher: Hasher) -> Result<Signature, String> {
    match panic::catch_unwind(AssertUnwindSafe(|| hasher(set.tasks()))) {
        Ok(Ok(signature)) => Ok(signature),
        Ok(Err(err)) => Err(format!("canonicalization failed: {err}")),
        Err(payload) => Err(panic_message(payload.as_ref())),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .map_or_else(
            || "signature worker panicked".to_string(),
            |msg| format!("signature worker panicked: {msg}"),
        )
}
