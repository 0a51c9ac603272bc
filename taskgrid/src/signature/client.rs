//! Request/response broker in front of the signature worker.
//!
//! Each call allocates a [`CorrelationId`] and parks a oneshot sender in
//! the pending map. A single dispatcher task drains the worker's reply
//! stream and completes the waiter whose id matches, so concurrent
//! requests cannot receive each other's answers.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use taskgrid_proto::signature::{
    CorrelationId, Signature, SignatureReply, SignatureRequest, encode_reply,
};

use crate::sync::TaskSet;

use super::SignatureError;
use super::worker::Job;

type Waiter = oneshot::Sender<Result<Signature, SignatureError>>;
type PendingMap = Arc<Mutex<HashMap<CorrelationId, Waiter>>>;

/// Promise-style front end to the worker's message queue.
pub struct SignatureClient {
    next_id: AtomicU64,
    pending: PendingMap,
    requests: RwLock<Option<mpsc::Sender<Job>>>,
    timeout: Duration,
    dispatcher: JoinHandle<()>,
}

impl SignatureClient {
    /// Creates the broker and spawns its dispatcher task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        requests: mpsc::Sender<Job>,
        replies: mpsc::UnboundedReceiver<SignatureReply>,
        timeout: Duration,
    ) -> Self {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let dispatcher = tokio::spawn(dispatch(replies, Arc::clone(&pending)));
        Self {
            next_id: AtomicU64::new(1),
            pending,
            requests: RwLock::new(Some(requests)),
            timeout,
            dispatcher,
        }
    }

    /// Requests the signature of `tasks` and waits for the matching reply.
    ///
    /// The whole exchange, including queueing behind other requests, is
    /// bounded by the configured timeout.
    ///
    /// # Errors
    ///
    /// - [`SignatureError::Timeout`] if no reply arrives in time.
    /// - [`SignatureError::WorkerGone`] if the worker or dispatcher stopped.
    /// - [`SignatureError::Computation`] if the worker reported a failure.
    pub async fn compute(&self, tasks: Arc<TaskSet>) -> Result<Signature, SignatureError> {
        let Some(requests) = self.requests.read().clone() else {
            return Err(SignatureError::WorkerGone);
        };
        let correlation_id = CorrelationId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(correlation_id, tx);

        let request = SignatureRequest {
            correlation_id,
            tasks,
        };
        let exchange = async {
            requests
                .send(request)
                .await
                .map_err(|_| SignatureError::WorkerGone)?;
            rx.await.map_err(|_| SignatureError::WorkerGone)?
        };
        let result = tokio::time::timeout(self.timeout, exchange)
            .await
            .unwrap_or(Err(SignatureError::Timeout(self.timeout)));

        // The dispatcher has already removed the entry unless we gave up early.
        self.pending.lock().remove(&correlation_id);
        if let Err(err) = &result {
            tracing::debug!(%correlation_id, error = %err, "signature request failed");
        }
        result
    }

    /// Closes the request queue. Later calls fail with
    /// [`SignatureError::WorkerGone`]; the worker exits once it has drained
    /// what was already queued.
    pub fn close(&self) {
        self.requests.write().take();
    }

    /// Number of requests currently awaiting a reply.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }
}

impl Drop for SignatureClient {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

/// Routes each reply to the waiter registered under its correlation id.
async fn dispatch(mut replies: mpsc::UnboundedReceiver<SignatureReply>, pending: PendingMap) {
    while let Some(reply) = replies.recv().await {
        let correlation_id = reply.correlation_id();
        let waiter = pending.lock().remove(&correlation_id);
        match waiter {
            Some(tx) => {
                let result = reply.into_result().map_err(SignatureError::Computation);
                // The caller may have timed out and dropped its receiver.
                let _ = tx.send(result);
            }
            None => {
                let line = encode_reply(&reply).unwrap_or_default();
                tracing::debug!(
                    %correlation_id,
                    reply = %line,
                    "dropping reply with no waiting request"
                );
            }
        }
    }
    // Worker is gone: dropping the senders wakes every waiter with an error.
    let orphaned = std::mem::take(&mut *pending.lock());
    if !orphaned.is_empty() {
        tracing::warn!(count = orphaned.len(), "signature worker stopped with requests in flight");
    }
}
