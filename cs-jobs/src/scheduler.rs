//! Bounded segment dispatch
//!
//! Segments are admitted in index order to at most `max_concurrent` workers
//! (`buffer_unordered`) and complete in any order. Before running a segment,
//! each worker takes a token from the [`AcceleratorPool`] and holds it for
//! the whole segment. The token is an RAII permit, so it is returned on every
//! exit path. A pool shared by several jobs caps segment concurrency across
//! all of them.

use crate::error::StageError;
use crate::models::SegmentSpec;
use crate::runner::{SegmentResult, StageRunner};
use futures::stream::{self, Stream, StreamExt};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

/// Stage name reported when no accelerator token could be acquired
pub const ACCELERATOR_STAGE: &str = "accelerator";

/// Counted pool of accelerator-resource tokens
#[derive(Debug, Clone)]
pub struct AcceleratorPool {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// One unit of accelerator budget; returned to the pool on drop
#[derive(Debug)]
pub struct AcceleratorToken {
    _permit: OwnedSemaphorePermit,
}

impl AcceleratorPool {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a free token
    ///
    /// Fails only once the pool has been closed.
    pub async fn acquire(&self) -> Result<AcceleratorToken, StageError> {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .map(|permit| AcceleratorToken { _permit: permit })
            .map_err(|_| StageError::Unavailable("accelerator pool closed".to_string()))
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Tokens not currently held
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Refuse all further acquisitions; held tokens stay valid
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }
}

/// Dispatches a job's segments under the concurrency cap
#[derive(Debug, Clone)]
pub struct ConcurrencyScheduler {
    pool: AcceleratorPool,
    max_concurrent: usize,
}

impl ConcurrencyScheduler {
    /// Scheduler with its own pool of `max_concurrent` tokens
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            pool: AcceleratorPool::new(max_concurrent),
            max_concurrent,
        }
    }

    /// Scheduler drawing tokens from a pool shared with other jobs
    pub fn with_pool(max_concurrent: usize, pool: AcceleratorPool) -> Self {
        Self {
            pool,
            max_concurrent: max_concurrent.max(1),
        }
    }

    pub fn pool(&self) -> &AcceleratorPool {
        &self.pool
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Run every segment through `runner`, yielding results as they finish
    ///
    /// Once the job's control is stopped no further segment is admitted:
    /// segments not yet dispatched resolve to `Cancelled` without running,
    /// and workers waiting for a token give up.
    pub fn schedule(
        &self,
        runner: Arc<StageRunner>,
        segments: Vec<(usize, SegmentSpec)>,
    ) -> impl Stream<Item = SegmentResult> + Send + 'static {
        let pool = self.pool.clone();
        let max_concurrent = self.max_concurrent;

        stream::iter(segments)
            .map(move |(index, spec)| {
                let runner = runner.clone();
                let pool = pool.clone();
                async move {
                    let control = runner.control().clone();
                    if control.is_stopped() {
                        return SegmentResult::cancelled(index);
                    }

                    let token = tokio::select! {
                        biased;
                        _ = control.token().cancelled() => {
                            return SegmentResult::cancelled(index);
                        }
                        token = pool.acquire() => token,
                    };
                    let token = match token {
                        Ok(token) => token,
                        Err(e) => return runner.fail(index, ACCELERATOR_STAGE, e.to_string()),
                    };
                    if control.is_stopped() {
                        drop(token);
                        return SegmentResult::cancelled(index);
                    }

                    debug!(
                        job_id = %runner.job_id(),
                        segment_index = index,
                        tokens_free = pool.available(),
                        "Accelerator token acquired"
                    );
                    let result = runner.run(index, spec).await;
                    drop(token);
                    result
                }
            })
            .buffer_unordered(max_concurrent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioBuffer, MemorySource};
    use crate::control::JobControl;
    use crate::models::{FailurePolicy, StageDefinition};
    use crate::runner::{ProgressSink, SegmentOutcome};
    use crate::stages::{StageContext, StageExecutor};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;
    use uuid::Uuid;

    struct NullSink;

    impl ProgressSink for NullSink {
        fn segment_started(&self, _: usize) {}
        fn stage_progress(&self, _: usize, _: &str, _: f32) {}
    }

    /// Tracks how many executions overlap
    struct Gauge {
        running: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
        runs: Arc<AtomicUsize>,
    }

    impl StageExecutor for Gauge {
        fn name(&self) -> &str {
            "voice"
        }

        fn execute(&self, input: AudioBuffer, _: &StageContext) -> Result<AudioBuffer, StageError> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.runs.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(20));
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(input)
        }
    }

    fn runner(dir: &TempDir, stage: Gauge, control: Arc<JobControl>) -> Arc<StageRunner> {
        Arc::new(StageRunner::new(
            Uuid::new_v4(),
            vec![(
                StageDefinition::new("voice", 1.0),
                Arc::new(stage) as Arc<dyn StageExecutor>,
            )],
            Arc::new(MemorySource::new(AudioBuffer::silence(100, 10, 1))),
            dir.path(),
            FailurePolicy::AbortSegment,
            control,
            Arc::new(NullSink),
        ))
    }

    fn gauge() -> (Gauge, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let peak = Arc::new(AtomicUsize::new(0));
        let runs = Arc::new(AtomicUsize::new(0));
        let stage = Gauge {
            running: Arc::new(AtomicUsize::new(0)),
            peak: peak.clone(),
            runs: runs.clone(),
        };
        (stage, peak, runs)
    }

    fn segments(n: usize) -> Vec<(usize, SegmentSpec)> {
        (0..n)
            .map(|i| (i, SegmentSpec::new(i as f64, i as f64 + 1.0)))
            .collect()
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_cap() {
        let dir = TempDir::new().unwrap();
        let (stage, peak, runs) = gauge();
        let scheduler = ConcurrencyScheduler::new(2);
        let results: Vec<_> = scheduler
            .schedule(runner(&dir, stage, Arc::new(JobControl::new())), segments(6))
            .collect()
            .await;

        assert_eq!(results.len(), 6);
        assert!(results.iter().all(|r| r.is_completed()));
        assert_eq!(runs.load(Ordering::SeqCst), 6);
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(scheduler.pool().available(), 2);
    }

    #[tokio::test]
    async fn test_shared_pool_caps_below_worker_count() {
        let dir = TempDir::new().unwrap();
        let (stage, peak, _) = gauge();
        let pool = AcceleratorPool::new(1);
        let scheduler = ConcurrencyScheduler::with_pool(4, pool.clone());
        let results: Vec<_> = scheduler
            .schedule(runner(&dir, stage, Arc::new(JobControl::new())), segments(4))
            .collect()
            .await;

        assert_eq!(results.len(), 4);
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn test_stopped_job_admits_nothing() {
        let dir = TempDir::new().unwrap();
        let (stage, _, runs) = gauge();
        let control = Arc::new(JobControl::new());
        control.cancel();
        let results: Vec<_> = ConcurrencyScheduler::new(2)
            .schedule(runner(&dir, stage, control), segments(3))
            .collect()
            .await;

        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert!(results.iter().all(|r| r.outcome == SegmentOutcome::Cancelled));
    }

    #[tokio::test]
    async fn test_closed_pool_fails_segment_as_accelerator_stage() {
        let dir = TempDir::new().unwrap();
        let (stage, _, runs) = gauge();
        let scheduler = ConcurrencyScheduler::new(1);
        scheduler.pool().close();
        let results: Vec<_> = scheduler
            .schedule(runner(&dir, stage, Arc::new(JobControl::new())), segments(1))
            .collect()
            .await;

        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert!(matches!(
            &results[0].outcome,
            SegmentOutcome::Failed { stage, .. } if stage == ACCELERATOR_STAGE
        ));
    }

    #[tokio::test]
    async fn test_token_returned_after_drop() {
        let pool = AcceleratorPool::new(2);
        let a = pool.acquire().await.unwrap();
        let _b = pool.acquire().await.unwrap();
        assert_eq!(pool.available(), 0);
        drop(a);
        assert_eq!(pool.available(), 1);
    }
}
