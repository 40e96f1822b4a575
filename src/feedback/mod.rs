//! Batch feedback loop
//!
//! Symbols arrive in batches, are split into chunks of `batch_size` and pushed
//! through the task queue. For every symbol:
//!
//! ```text
//! previous prediction graded (record_outcome) → symbol stored → fresh prediction → broadcast
//! ```
//!
//! If the queue cannot be reached after `queue_retries` timed pings, the same
//! chunks are processed in-process before `submit_batch` returns. A push that
//! fails mid-batch waits for the chunks already queued, then finishes the rest
//! in-process, so a session's symbols are always stored in submission order.

pub mod generator;
pub mod queue;
pub mod store;

#[cfg(test)]
mod tests;

pub use generator::{GenerationMode, SymbolGenerator};
pub use queue::{BatchJob, InMemoryTaskQueue, TaskQueue};
pub use store::{InMemorySequenceStore, SequenceStore};

use crate::config::BatchConfig;
use crate::ensemble::EnsembleCoordinator;
use crate::error::{EnsembleError, Result};
use crate::types::{symbols_from_raw, EnsembleResult, Symbol};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct BatchHandle(Uuid);

impl BatchHandle {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for BatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-submission overrides
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub session: String,
    pub batch_size: Option<usize>,
    pub delay_ms: Option<u64>,
}

impl BatchOptions {
    pub fn new(session: impl Into<String>) -> Self {
        Self {
            session: session.into(),
            batch_size: None,
            delay_ms: None,
        }
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }

    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = Some(delay_ms);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    Queued,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl BatchState {
    fn is_finished(self) -> bool {
        matches!(self, BatchState::Completed | BatchState::Cancelled | BatchState::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMode {
    Queued,
    Synchronous,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchStatus {
    pub processed: usize,
    pub remaining: usize,
    pub status: BatchState,
    pub mode: ProcessingMode,
    pub error: Option<String>,
}

/// Broadcast after every processed symbol
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionEvent {
    pub session: String,
    pub batch: BatchHandle,
    /// The symbol that was just observed
    pub observed: Symbol,
    /// Whether the previous emitted prediction matched `observed`
    pub previous_correct: Option<bool>,
    /// Prediction for the symbol after `observed`
    pub result: EnsembleResult,
}

#[derive(Debug, Clone)]
struct BatchProgress {
    total: usize,
    processed: usize,
    state: BatchState,
    mode: ProcessingMode,
    error: Option<String>,
}

/// Batch progress by handle, bounded in finished entries
#[derive(Debug, Default)]
struct BatchRegistry {
    progress: HashMap<BatchHandle, BatchProgress>,
    order: VecDeque<BatchHandle>,
}

impl BatchRegistry {
    fn insert(&mut self, handle: BatchHandle, progress: BatchProgress, retained: usize) {
        self.progress.insert(handle, progress);
        self.order.push_back(handle);

        // unfinished batches are never dropped
        while self.order.len() > retained {
            let progress = &self.progress;
            let Some(pos) = self
                .order
                .iter()
                .position(|h| progress.get(h).map_or(true, |p| p.state.is_finished()))
            else {
                break;
            };
            if let Some(old) = self.order.remove(pos) {
                self.progress.remove(&old);
            }
        }
    }

    fn get(&self, handle: &BatchHandle) -> Option<&BatchProgress> {
        self.progress.get(handle)
    }

    fn get_mut(&mut self, handle: &BatchHandle) -> Option<&mut BatchProgress> {
        self.progress.get_mut(handle)
    }

    fn len(&self) -> usize {
        self.progress.len()
    }
}

pub struct BatchFeedbackLoop {
    config: BatchConfig,
    coordinator: Arc<EnsembleCoordinator>,
    store: Arc<dyn SequenceStore>,
    queue: Option<Arc<dyn TaskQueue>>,
    events: broadcast::Sender<PredictionEvent>,
    batches: RwLock<BatchRegistry>,
    /// Bumped whenever any batch makes progress or finishes
    progress: watch::Sender<u64>,
    shutdown: watch::Sender<bool>,
    /// Session of the last prediction; held for the whole of each item
    last_session: Mutex<Option<String>>,
}

impl BatchFeedbackLoop {
    pub fn new(
        config: BatchConfig,
        coordinator: Arc<EnsembleCoordinator>,
        store: Arc<dyn SequenceStore>,
        queue: Option<Arc<dyn TaskQueue>>,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let (shutdown, _) = watch::channel(false);
        let (progress, _) = watch::channel(0);
        Self {
            config,
            coordinator,
            store,
            queue,
            events,
            batches: RwLock::new(BatchRegistry::default()),
            progress,
            shutdown,
            last_session: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PredictionEvent> {
        self.events.subscribe()
    }

    pub fn coordinator(&self) -> &Arc<EnsembleCoordinator> {
        &self.coordinator
    }

    fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Validate and schedule a batch of raw symbols
    pub async fn submit_batch(&self, symbols: &[i64], options: BatchOptions) -> Result<BatchHandle> {
        let symbols = symbols_from_raw(symbols)?;
        if self.is_shutdown() {
            return Err(EnsembleError::Cancelled);
        }

        let handle = BatchHandle::new();
        let batch_size = options.batch_size.unwrap_or(self.config.batch_size).max(1);
        let delay_ms = options.delay_ms.unwrap_or(self.config.batch_delay_ms);
        let jobs: Vec<BatchJob> = symbols
            .chunks(batch_size)
            .enumerate()
            .map(|(chunk, part)| BatchJob {
                handle,
                session: options.session.clone(),
                symbols: part.to_vec(),
                chunk,
                delay_ms: if chunk == 0 { 0 } else { delay_ms },
            })
            .collect();

        let queue = match self.queue.clone() {
            Some(queue) => self.queue_available(queue.as_ref()).await.then_some(queue),
            None => None,
        };
        let mode = if queue.is_some() {
            ProcessingMode::Queued
        } else {
            ProcessingMode::Synchronous
        };

        self.batches.write().insert(
            handle,
            BatchProgress {
                total: symbols.len(),
                processed: 0,
                state: if symbols.is_empty() { BatchState::Completed } else { BatchState::Queued },
                mode,
                error: None,
            },
            self.config.retained_batches.max(1),
        );
        info!(
            "Batch {} accepted: {} symbols in {} chunks ({:?})",
            handle,
            symbols.len(),
            jobs.len(),
            mode
        );

        let mut jobs = jobs.into_iter();
        if let Some(queue) = queue {
            let mut queued = 0;
            for job in jobs.by_ref() {
                let len = job.symbols.len();
                if let Err(e) = queue.push(job.clone()).await {
                    warn!("Queue push failed for batch {}: {}, continuing in-process", handle, e);
                    self.set_mode(handle, ProcessingMode::Synchronous);
                    self.wait_for_processed(handle, queued).await;
                    self.process_job(job).await;
                    break;
                }
                queued += len;
            }
        }
        // anything left here runs synchronously
        for job in jobs {
            self.process_job(job).await;
        }

        Ok(handle)
    }

    pub fn get_batch_status(&self, handle: BatchHandle) -> Result<BatchStatus> {
        let batches = self.batches.read();
        let progress = batches
            .get(&handle)
            .ok_or_else(|| EnsembleError::UnknownBatch(handle.to_string()))?;
        Ok(BatchStatus {
            processed: progress.processed,
            remaining: progress.total - progress.processed,
            status: progress.state,
            mode: progress.mode,
            error: progress.error.clone(),
        })
    }

    /// Stop the remaining items of one batch
    pub fn cancel_batch(&self, handle: BatchHandle) -> Result<()> {
        let mut batches = self.batches.write();
        let progress = batches
            .get_mut(&handle)
            .ok_or_else(|| EnsembleError::UnknownBatch(handle.to_string()))?;
        if !progress.state.is_finished() {
            progress.state = BatchState::Cancelled;
        }
        drop(batches);
        self.notify_progress();
        Ok(())
    }

    /// Stop consuming the queue; unfinished batches become cancelled
    pub fn cancel(&self) {
        self.shutdown.send_replace(true);
        for progress in self.batches.write().progress.values_mut() {
            if !progress.state.is_finished() {
                progress.state = BatchState::Cancelled;
            }
        }
        info!("Batch feedback loop cancelled");
    }

    /// Consume the task queue until it closes or the loop is cancelled
    pub fn spawn_worker(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let queue = self.queue.clone()?;
        let this = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();

        Some(tokio::spawn(async move {
            loop {
                if *shutdown.borrow() {
                    break;
                }
                tokio::select! {
                    _ = shutdown.changed() => break,
                    job = queue.pop() => match job {
                        Some(job) => this.process_job(job).await,
                        None => {
                            debug!("Task queue closed");
                            break;
                        }
                    },
                }
            }
            debug!("Batch worker stopped");
        }))
    }

    async fn queue_available(&self, queue: &dyn TaskQueue) -> bool {
        let timeout = Duration::from_millis(self.config.queue_timeout_ms);
        for attempt in 1..=self.config.queue_retries.max(1) {
            match tokio::time::timeout(timeout, queue.ping()).await {
                Ok(Ok(())) => return true,
                Ok(Err(e)) => warn!("Queue ping {} failed: {}", attempt, e),
                Err(_) => warn!("Queue ping {} timed out after {:?}", attempt, timeout),
            }
        }
        warn!("Task queue unavailable, falling back to synchronous processing");
        false
    }

    /// Batches currently held for status queries
    pub fn tracked_batches(&self) -> usize {
        self.batches.read().len()
    }

    fn notify_progress(&self) {
        self.progress.send_modify(|n| *n = n.wrapping_add(1));
    }

    /// Wait until `count` symbols of `handle` are processed, or it finishes
    async fn wait_for_processed(&self, handle: BatchHandle, count: usize) {
        let mut progress = self.progress.subscribe();
        let mut shutdown = self.shutdown.subscribe();
        loop {
            let pending = self
                .batches
                .read()
                .get(&handle)
                .is_some_and(|p| p.processed < count && !p.state.is_finished());
            if !pending || *shutdown.borrow() {
                return;
            }
            debug!("Batch {} waiting for queued chunks before continuing in-process", handle);
            tokio::select! {
                _ = progress.changed() => {}
                _ = shutdown.changed() => return,
            }
        }
    }

    fn set_mode(&self, handle: BatchHandle, mode: ProcessingMode) {
        if let Some(progress) = self.batches.write().get_mut(&handle) {
            progress.mode = mode;
        }
    }

    fn batch_state(&self, handle: BatchHandle) -> Option<BatchState> {
        self.batches.read().get(&handle).map(|p| p.state)
    }

    async fn process_job(&self, job: BatchJob) {
        if job.delay_ms > 0 {
            let mut shutdown = self.shutdown.subscribe();
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(job.delay_ms)) => {}
                _ = shutdown.changed() => {}
            }
        }

        for symbol in job.symbols {
            if self.is_shutdown() {
                return;
            }
            match self.batch_state(job.handle) {
                Some(state) if state.is_finished() => return,
                None => return,
                _ => {}
            }

            if let Some(progress) = self.batches.write().get_mut(&job.handle) {
                progress.state = BatchState::Running;
            }

            if let Err(e) = self.process_item(job.handle, &job.session, symbol).await {
                warn!("Batch {} failed at chunk {}: {}", job.handle, job.chunk, e);
                if let Some(progress) = self.batches.write().get_mut(&job.handle) {
                    progress.state = BatchState::Failed;
                    progress.error = Some(e.to_string());
                }
                self.notify_progress();
                return;
            }

            if let Some(progress) = self.batches.write().get_mut(&job.handle) {
                progress.processed += 1;
                if progress.processed == progress.total {
                    progress.state = BatchState::Completed;
                    info!("Batch {} completed ({} symbols)", job.handle, progress.total);
                }
            }
            self.notify_progress();
        }
    }

    /// Grade, store, predict, broadcast; one symbol at a time
    async fn process_item(&self, batch: BatchHandle, session: &str, symbol: Symbol) -> Result<()> {
        let mut last_session = self.last_session.lock().await;

        let previous_correct = if last_session.as_deref() == Some(session) {
            match self.coordinator.record_outcome(symbol) {
                Ok(summary) => summary.and_then(|s| s.ensemble_correct),
                Err(e) => {
                    // only this feedback event is lost
                    warn!("Feedback for {} rejected: {}", symbol, e);
                    None
                }
            }
        } else {
            self.coordinator.discard_pending();
            None
        };

        self.store.append(session, symbol).await?;
        let tail = self.store.tail(session, self.config.history_tail).await?;

        let coordinator = Arc::clone(&self.coordinator);
        let result = tokio::task::spawn_blocking(move || coordinator.predict(&tail))
            .await
            .map_err(|e| EnsembleError::StateUpdate(format!("prediction task failed: {e}")))?;
        *last_session = Some(session.to_string());

        // no subscribers is fine
        let _ = self.events.send(PredictionEvent {
            session: session.to_string(),
            batch,
            observed: symbol,
            previous_correct,
            result,
        });
        Ok(())
    }
}
