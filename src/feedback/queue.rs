//! Task queue collaborator for batch jobs

use super::BatchHandle;
use crate::error::{EnsembleError, Result};
use crate::types::Symbol;
use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

/// One chunk of a submitted batch
#[derive(Debug, Clone, PartialEq)]
pub struct BatchJob {
    pub handle: BatchHandle,
    pub session: String,
    pub symbols: Vec<Symbol>,
    /// Zero-based chunk position within the batch
    pub chunk: usize,
    /// Wait this long before processing
    pub delay_ms: u64,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Connectivity check
    async fn ping(&self) -> Result<()>;

    async fn push(&self, job: BatchJob) -> Result<()>;

    /// Next job, or `None` once the queue is closed and drained
    async fn pop(&self) -> Option<BatchJob>;
}

/// Channel-backed queue living in the same process
pub struct InMemoryTaskQueue {
    tx: mpsc::Sender<BatchJob>,
    rx: Mutex<mpsc::Receiver<BatchJob>>,
}

impl InMemoryTaskQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn ping(&self) -> Result<()> {
        if self.tx.is_closed() {
            Err(EnsembleError::QueueUnavailable("channel closed".into()))
        } else {
            Ok(())
        }
    }

    async fn push(&self, job: BatchJob) -> Result<()> {
        self.tx
            .send(job)
            .await
            .map_err(|_| EnsembleError::QueueUnavailable("channel closed".into()))
    }

    async fn pop(&self) -> Option<BatchJob> {
        self.rx.lock().await.recv().await
    }
}
