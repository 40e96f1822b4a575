//! Tests for the batch feedback loop

use super::queue::MockTaskQueue;
use super::*;
use crate::config::Config;
use crate::predictors::generate;
use crate::types::GeneratorFamily;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};

fn batch_config() -> BatchConfig {
    BatchConfig {
        batch_delay_ms: 0,
        queue_timeout_ms: 50,
        ..BatchConfig::default()
    }
}

fn feedback_loop(
    queue: Option<Arc<dyn TaskQueue>>,
) -> (Arc<BatchFeedbackLoop>, Arc<InMemorySequenceStore>) {
    feedback_loop_with(batch_config(), queue)
}

fn feedback_loop_with(
    config: BatchConfig,
    queue: Option<Arc<dyn TaskQueue>>,
) -> (Arc<BatchFeedbackLoop>, Arc<InMemorySequenceStore>) {
    let coordinator = Arc::new(EnsembleCoordinator::new(&Config::default()));
    let store = Arc::new(InMemorySequenceStore::new());
    let feedback = Arc::new(BatchFeedbackLoop::new(config, coordinator, store.clone(), queue));
    (feedback, store)
}

/// In-memory queue that refuses every push after the first `accept`
struct FlakyQueue {
    inner: InMemoryTaskQueue,
    accept: usize,
    pushed: AtomicUsize,
}

impl FlakyQueue {
    fn new(accept: usize) -> Self {
        Self {
            inner: InMemoryTaskQueue::new(16),
            accept,
            pushed: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl TaskQueue for FlakyQueue {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn push(&self, job: BatchJob) -> Result<()> {
        if self.pushed.fetch_add(1, Ordering::SeqCst) < self.accept {
            self.inner.push(job).await
        } else {
            Err(EnsembleError::QueueUnavailable("queue full".into()))
        }
    }

    async fn pop(&self) -> Option<BatchJob> {
        self.inner.pop().await
    }
}

async fn wait_until_finished(feedback: &BatchFeedbackLoop, handle: BatchHandle) -> BatchStatus {
    for _ in 0..500 {
        let status = feedback.get_batch_status(handle).unwrap();
        if status.status.is_finished() {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("batch {handle} did not finish");
}

fn cycle(len: usize) -> Vec<i64> {
    (0..len as i64).map(|i| i % 4).collect()
}

#[tokio::test]
async fn test_queued_batch_is_processed() {
    let (feedback, store) = feedback_loop(Some(Arc::new(InMemoryTaskQueue::new(16))));
    let worker = feedback.spawn_worker().unwrap();
    let mut events = feedback.subscribe();

    let raw = cycle(12);
    let handle = feedback
        .submit_batch(&raw, BatchOptions::new("s1").with_batch_size(5))
        .await
        .unwrap();

    for expected in &raw {
        let event = events.recv().await.unwrap();
        assert_eq!(event.batch, handle);
        assert_eq!(event.session, "s1");
        assert_eq!(event.observed.value() as i64, *expected);
    }

    let status = wait_until_finished(&feedback, handle).await;
    assert_eq!(status.status, BatchState::Completed);
    assert_eq!(status.mode, ProcessingMode::Queued);
    assert_eq!(status.processed, 12);
    assert_eq!(status.remaining, 0);

    assert_eq!(store.len("s1").await.unwrap(), 12);
    // the first symbol had nothing to grade
    assert_eq!(feedback.coordinator().history_len(), 11);

    feedback.cancel();
    worker.await.unwrap();
}

#[tokio::test]
async fn test_unreachable_queue_falls_back_to_synchronous() {
    let mut queue = MockTaskQueue::new();
    queue
        .expect_ping()
        .times(3)
        .returning(|| Err(EnsembleError::QueueUnavailable("connection refused".into())));
    queue.expect_push().never();

    let (feedback, store) = feedback_loop(Some(Arc::new(queue)));
    let handle = feedback
        .submit_batch(&cycle(7), BatchOptions::new("fallback").with_batch_size(3))
        .await
        .unwrap();

    // synchronous processing is done by the time submit returns
    let status = feedback.get_batch_status(handle).unwrap();
    assert_eq!(status.status, BatchState::Completed);
    assert_eq!(status.mode, ProcessingMode::Synchronous);
    assert_eq!(status.processed, 7);
    assert_eq!(store.len("fallback").await.unwrap(), 7);
}

#[tokio::test]
async fn test_failed_push_continues_in_process() {
    let mut queue = MockTaskQueue::new();
    queue.expect_ping().returning(|| Ok(()));
    queue
        .expect_push()
        .times(1)
        .returning(|_| Err(EnsembleError::QueueUnavailable("queue full".into())));

    let (feedback, store) = feedback_loop(Some(Arc::new(queue)));
    let handle = feedback
        .submit_batch(&cycle(6), BatchOptions::new("push").with_batch_size(2))
        .await
        .unwrap();

    let status = feedback.get_batch_status(handle).unwrap();
    assert_eq!(status.status, BatchState::Completed);
    assert_eq!(status.mode, ProcessingMode::Synchronous);
    assert_eq!(store.len("push").await.unwrap(), 6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_push_failure_keeps_session_order() {
    let (feedback, store) = feedback_loop(Some(Arc::new(FlakyQueue::new(1))));
    let worker = feedback.spawn_worker().unwrap();

    // first chunk goes through the worker, the second is refused
    let raw: Vec<i64> = [0; 8].into_iter().chain([3; 8]).collect();
    let handle = feedback
        .submit_batch(&raw, BatchOptions::new("order").with_batch_size(8))
        .await
        .unwrap();

    let status = feedback.get_batch_status(handle).unwrap();
    assert_eq!(status.status, BatchState::Completed);
    assert_eq!(status.mode, ProcessingMode::Synchronous);
    assert_eq!(status.processed, 16);

    let stored: Vec<i64> = store
        .tail("order", 100)
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.value() as i64)
        .collect();
    assert_eq!(stored, raw);
    assert_eq!(feedback.coordinator().history_len(), 15);

    feedback.cancel();
    worker.await.unwrap();
}

#[tokio::test]
async fn test_push_failure_wait_ends_on_cancel() {
    // nobody consumes the queued chunk; cancel releases the waiting submit
    let (feedback, store) = feedback_loop(Some(Arc::new(FlakyQueue::new(1))));
    let submitter = {
        let feedback = Arc::clone(&feedback);
        tokio::spawn(async move {
            feedback
                .submit_batch(&cycle(6), BatchOptions::new("stuck").with_batch_size(3))
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!submitter.is_finished());
    feedback.cancel();

    let handle = submitter.await.unwrap().unwrap();
    assert_eq!(feedback.get_batch_status(handle).unwrap().status, BatchState::Cancelled);
    assert_eq!(store.len("stuck").await.unwrap(), 0);
}

#[tokio::test]
async fn test_finished_batches_are_pruned() {
    let config = BatchConfig {
        retained_batches: 2,
        ..batch_config()
    };
    let (feedback, _) = feedback_loop_with(config, None);

    let mut handles = Vec::new();
    for _ in 0..4 {
        handles.push(feedback.submit_batch(&[1, 2], BatchOptions::new("prune")).await.unwrap());
    }

    assert_eq!(feedback.tracked_batches(), 2);
    assert!(matches!(
        feedback.get_batch_status(handles[0]),
        Err(EnsembleError::UnknownBatch(_))
    ));
    assert!(feedback.get_batch_status(handles[1]).is_err());
    assert_eq!(feedback.get_batch_status(handles[3]).unwrap().status, BatchState::Completed);
}

#[tokio::test]
async fn test_unfinished_batches_are_kept() {
    let config = BatchConfig {
        retained_batches: 2,
        ..batch_config()
    };
    // no worker, so every batch stays queued
    let (feedback, _) = feedback_loop_with(config, Some(Arc::new(InMemoryTaskQueue::new(16))));

    let mut handles = Vec::new();
    for _ in 0..3 {
        handles.push(feedback.submit_batch(&[0, 1], BatchOptions::new("keep")).await.unwrap());
    }

    assert_eq!(feedback.tracked_batches(), 3);
    for handle in handles {
        assert_eq!(feedback.get_batch_status(handle).unwrap().status, BatchState::Queued);
    }
}

#[tokio::test]
async fn test_invalid_symbol_is_rejected() {
    let (feedback, store) = feedback_loop(None);

    let result = feedback.submit_batch(&[0, 1, 5], BatchOptions::new("bad")).await;

    assert!(matches!(result, Err(EnsembleError::InvalidSymbol(5))));
    assert_eq!(store.len("bad").await.unwrap(), 0);
}

#[tokio::test]
async fn test_unknown_batch() {
    let (feedback, _) = feedback_loop(None);
    let handle = BatchHandle::new();

    assert!(matches!(
        feedback.get_batch_status(handle),
        Err(EnsembleError::UnknownBatch(_))
    ));
    assert!(feedback.cancel_batch(handle).is_err());
}

#[tokio::test]
async fn test_cancelled_batch_is_skipped() {
    let (feedback, store) = feedback_loop(Some(Arc::new(InMemoryTaskQueue::new(16))));

    // no worker yet, so the jobs wait in the queue
    let handle = feedback
        .submit_batch(&cycle(9), BatchOptions::new("cancel").with_batch_size(3))
        .await
        .unwrap();
    assert_eq!(feedback.get_batch_status(handle).unwrap().status, BatchState::Queued);

    feedback.cancel_batch(handle).unwrap();
    let worker = feedback.spawn_worker().unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let status = feedback.get_batch_status(handle).unwrap();
    assert_eq!(status.status, BatchState::Cancelled);
    assert_eq!(status.processed, 0);
    assert_eq!(status.remaining, 9);
    assert_eq!(store.len("cancel").await.unwrap(), 0);

    feedback.cancel();
    worker.await.unwrap();
    assert!(matches!(
        feedback.submit_batch(&[0], BatchOptions::new("cancel")).await,
        Err(EnsembleError::Cancelled)
    ));
}

#[tokio::test]
async fn test_session_switch_discards_pending_prediction() {
    let (feedback, store) = feedback_loop(None);
    let mut events = feedback.subscribe();

    feedback
        .submit_batch(&[0, 1, 2], BatchOptions::new("a"))
        .await
        .unwrap();
    feedback
        .submit_batch(&[3, 3], BatchOptions::new("b"))
        .await
        .unwrap();

    let sessions: Vec<String> = (0..5).map(|_| events.try_recv().unwrap().session).collect();
    assert_eq!(sessions, ["a", "a", "a", "b", "b"]);

    assert_eq!(store.len("a").await.unwrap(), 3);
    assert_eq!(store.len("b").await.unwrap(), 2);
    // two graded in "a", the first of "b" discarded, one graded in "b"
    assert_eq!(feedback.coordinator().history_len(), 3);
}

#[tokio::test]
async fn test_empty_batch_completes_immediately() {
    let (feedback, _) = feedback_loop(None);
    let handle = feedback.submit_batch(&[], BatchOptions::new("empty")).await.unwrap();

    let status = feedback.get_batch_status(handle).unwrap();
    assert_eq!(status.status, BatchState::Completed);
    assert_eq!(status.remaining, 0);
}

#[test]
fn test_store_tail() {
    let store = InMemorySequenceStore::new();
    tokio_test::block_on(async {
        for value in [0, 1, 2, 3, 0] {
            store.append("s", Symbol::from_index(value)).await.unwrap();
        }
        let tail = store.tail("s", 3).await.unwrap();
        assert_eq!(tail, vec![Symbol::from_index(2), Symbol::from_index(3), Symbol::from_index(0)]);
        assert_eq!(store.tail("s", 100).await.unwrap().len(), 5);
        assert!(store.tail("missing", 3).await.unwrap().is_empty());
    });
}

#[test]
fn test_generator_is_reproducible() {
    let a = SymbolGenerator::new(GenerationMode::Uniform, 7).take(50);
    let b = SymbolGenerator::new(GenerationMode::Uniform, 7).take(50);
    assert_eq!(a, b);
}

#[test]
fn test_noiseless_cycle() {
    let mut generator = SymbolGenerator::new(GenerationMode::Cycle { period: 3, noise: 0.0 }, 1);
    let values: Vec<u8> = generator.take(7).into_iter().map(Symbol::value).collect();
    assert_eq!(values, vec![0, 1, 2, 0, 1, 2, 0]);
}

#[test]
fn test_deterministic_mode_matches_generator() {
    let mode = GenerationMode::Deterministic {
        family: GeneratorFamily::XorShift,
        seed: 321,
    };
    let produced = SymbolGenerator::new(mode, 0).take(40);
    assert_eq!(produced, generate(GeneratorFamily::XorShift, 321, 40));
}
