//! Content signatures computed off the interactive path.
//!
//! [`SignatureEngine`] owns the single [`worker::SignatureWorker`] thread
//! for the session and the [`client::SignatureClient`] broker in front of
//! it. The coordinator only ever calls [`SignatureEngine::compute`].

pub mod canonical;
pub mod client;
pub mod worker;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use taskgrid_proto::signature::Signature;

use crate::config::SyncConfig;
use crate::sync::TaskSet;

pub use canonical::compute_signature;
pub use client::SignatureClient;
pub use worker::{Hasher, SignatureWorker};

/// Errors that can occur while requesting a signature.
#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    /// The worker thread could not be started.
    #[error("failed to start signature worker: {0}")]
    Spawn(#[source] std::io::Error),

    /// The worker or its reply channel has stopped.
    #[error("signature worker is not running")]
    WorkerGone,

    /// No reply arrived within the configured bound.
    #[error("signature request timed out after {0:?}")]
    Timeout(Duration),

    /// The worker reported a failure for this request.
    #[error("signature computation failed: {0}")]
    Computation(String),
}

/// The session's signature service: one worker thread plus its broker.
pub struct SignatureEngine {
    client: SignatureClient,
    worker: Mutex<SignatureWorker>,
}

impl SignatureEngine {
    /// Starts the worker with the canonical SHA-256 hasher.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`SignatureError::Spawn`] if the worker thread cannot start.
    pub fn spawn(config: &SyncConfig) -> Result<Self, SignatureError> {
        Self::with_hasher(config, compute_signature)
    }

    /// Starts the worker with a custom hasher.
    ///
    /// # Errors
    ///
    /// Returns [`SignatureError::Spawn`] if the worker thread cannot start.
    pub fn with_hasher(config: &SyncConfig, hasher: Hasher) -> Result<Self, SignatureError> {
        let (worker, requests, replies) =
            SignatureWorker::spawn(config.worker_queue_capacity, config.memo_capacity, hasher)?;
        Ok(Self {
            client: SignatureClient::new(requests, replies, config.signature_timeout),
            worker: Mutex::new(worker),
        })
    }

    /// Computes the signature of `tasks` on the worker thread.
    ///
    /// # Errors
    ///
    /// See [`SignatureClient::compute`].
    pub async fn compute(&self, tasks: &Arc<TaskSet>) -> Result<Signature, SignatureError> {
        self.client.compute(Arc::clone(tasks)).await
    }

    /// Stops the worker and waits for its thread to exit.
    ///
    /// Requests issued afterwards fail with [`SignatureError::WorkerGone`],
    /// which callers already treat as "signature unavailable".
    pub async fn shutdown(&self) {
        self.client.close();
        let handle = self.worker.lock().take_handle();
        if let Some(handle) = handle {
            match tokio::task::spawn_blocking(move || handle.join()).await {
                Ok(Ok(())) => tracing::debug!("signature worker joined"),
                Ok(Err(_)) => tracing::warn!("signature worker thread panicked"),
                Err(err) => tracing::warn!(error = %err, "failed to join signature worker"),
            }
        }
    }
}
