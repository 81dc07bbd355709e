//! Job lifecycle management
//!
//! [`JobManager`] owns the job registry and drives every job through
//!
//! ```text
//! queued ─dispatch─▶ running ─all segments terminal─▶ completed
//!    │                  ├─abort-job failure / zero successes─▶ failed
//!    └─cancel─▶ cancelled ◀─cancel──┘
//! ```
//!
//! `submit` validates and records the job, then returns; dispatch happens on a
//! spawned task. Every state change is published on the [`EventBus`] as well
//! as being readable through `get_progress` / `get_job`.

use crate::assembler;
use crate::audio::AudioSource;
use crate::config::{ServiceConfig, DEFAULT_EVENT_CAPACITY};
use crate::control::JobControl;
use crate::error::{JobError, JobResult};
use crate::metadata;
use crate::models::{
    validate_segment_specs, Job, JobConfig, JobId, JobSummary, SegmentSpec, SegmentStatus,
    StageDefinition,
};
use crate::progress::{JobProgressSnapshot, ProgressAggregator};
use crate::runner::{ProgressSink, SegmentOutcome, SegmentResult, StageRunner};
use crate::scheduler::{AcceleratorPool, ConcurrencyScheduler};
use crate::segmenter;
use crate::stages::{StageExecutor, StageRegistry};
use crate::store::{JobHandle, JobState, JobStore};
use chrono::Utc;
use cs_common::events::{EventBus, JobEvent, JobStatus, SegmentOutcomeData};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Name of the assembled artifact inside a job's working directory
pub const RESULT_FILE_NAME: &str = "result.wav";

pub struct JobManager {
    store: Arc<JobStore>,
    registry: Arc<StageRegistry>,
    events: EventBus,
    work_dir: PathBuf,
    shared_pool: Option<AcceleratorPool>,
}

impl JobManager {
    /// Manager with a fresh registry store and per-job accelerator pools
    pub fn new(registry: StageRegistry, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            store: Arc::new(JobStore::new()),
            registry: Arc::new(registry),
            events: EventBus::new(DEFAULT_EVENT_CAPACITY),
            work_dir: work_dir.into(),
            shared_pool: None,
        }
    }

    /// Manager set up from the service configuration
    pub fn from_config(config: &ServiceConfig, registry: StageRegistry) -> Self {
        let manager = Self::new(registry, config.work_dir.clone())
            .with_event_bus(EventBus::new(config.event_capacity));
        match config.accelerator_slots {
            Some(slots) => manager.with_shared_pool(AcceleratorPool::new(slots)),
            None => manager,
        }
    }

    /// Use an existing store (shared with another manager or a test)
    pub fn with_store(mut self, store: Arc<JobStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    /// Draw accelerator tokens for every job from one pool
    pub fn with_shared_pool(mut self, pool: AcceleratorPool) -> Self {
        self.shared_pool = Some(pool);
        self
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    pub fn registry(&self) -> &StageRegistry {
        &self.registry
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.events
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Validate and record a job, then dispatch it in the background
    ///
    /// # Errors
    /// `InvalidConfiguration` for a bad config, an enabled stage with no
    /// registered executor, or a segment list that does not fit the config
    /// and source. Nothing is recorded in that case.
    pub fn submit(
        &self,
        config: JobConfig,
        source: Arc<dyn AudioSource>,
        segments: Vec<SegmentSpec>,
    ) -> JobResult<JobId> {
        self.submit_with_token(config, source, segments, None)
    }

    /// Segment the whole source with the job's own length and overlap, then submit
    pub fn submit_segmented(
        &self,
        config: JobConfig,
        source: Arc<dyn AudioSource>,
    ) -> JobResult<JobId> {
        config.validate()?;
        let segments = segmenter::segment(source.duration(), config.segment_length, config.overlap)?;
        self.submit(config, source, segments)
    }

    /// Submit with an external stop signal
    ///
    /// Cancelling `parent` (a deadline, a shutdown) has exactly the effect of
    /// calling [`JobManager::cancel`].
    pub fn submit_with_token(
        &self,
        config: JobConfig,
        source: Arc<dyn AudioSource>,
        segments: Vec<SegmentSpec>,
        parent: Option<&CancellationToken>,
    ) -> JobResult<JobId> {
        config.validate()?;
        let stages = self.resolve_stages(&config)?;
        validate_segment_specs(&segments, &config, source.duration())?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| JobError::Internal(format!("no Tokio runtime to dispatch on: {}", e)))?;

        let id = Uuid::new_v4();
        let job = Job::new(id, config.clone(), &segments);
        metadata::persist(&self.work_dir, &job);
        let aggregator = ProgressAggregator::new(id, &config, segments.len());
        let control = Arc::new(match parent {
            Some(token) => JobControl::with_parent(token),
            None => JobControl::new(),
        });
        let handle = Arc::new(JobHandle::new(job, aggregator, control));
        self.store.insert(handle.clone());

        info!(
            job_id = %id,
            segments = segments.len(),
            max_concurrent = config.max_concurrent_segments,
            policy = ?config.failure_policy,
            "Job queued"
        );
        self.events.emit_lossy(JobEvent::JobQueued {
            job_id: id,
            segments_total: segments.len(),
            timestamp: Utc::now(),
        });

        let run = JobRun {
            handle,
            stages,
            source,
            segments,
            config,
            events: self.events.clone(),
            work_dir: self.work_dir.clone(),
            output_dir: self.work_dir.join(id.to_string()),
            shared_pool: self.shared_pool.clone(),
        };
        runtime.spawn(run.execute());

        Ok(id)
    }

    /// Latest progress snapshot; no side effects
    pub fn get_progress(&self, id: JobId) -> JobResult<JobProgressSnapshot> {
        Ok(self.handle(id)?.read(|state| state.aggregator.snapshot()))
    }

    /// Full job record
    pub fn get_job(&self, id: JobId) -> JobResult<Job> {
        Ok(self.handle(id)?.read(|state| state.job.clone()))
    }

    /// Request cancellation
    ///
    /// Idempotent and non-blocking. A queued job is cancelled on the spot. A
    /// running job stops admitting segments, its undispatched segments become
    /// `cancelled` immediately, and it converges to `cancelled` once in-flight
    /// stages finish. A terminal job is left untouched.
    pub fn cancel(&self, id: JobId) -> JobResult<()> {
        let handle = self.handle(id)?;
        let control = handle.control().clone();

        let finished = handle.update(|state| match state.job.status {
            status if status.is_terminal() => {
                debug!(job_id = %id, status = %status, "Cancel ignored for terminal job");
                None
            }
            JobStatus::Queued => {
                control.cancel();
                Some(close_job(
                    state,
                    &self.work_dir,
                    JobStatus::Cancelled,
                    "Cancelled before dispatch".to_string(),
                    None,
                    None,
                ))
            }
            _ => {
                control.cancel();
                self.cancel_undispatched(state);
                None
            }
        });

        info!(job_id = %id, "Cancellation requested");
        if let Some(event) = finished {
            self.events.emit_lossy(event);
        }
        Ok(())
    }

    /// Summaries newest first, optionally filtered by status
    pub fn list(&self, status: Option<JobStatus>, limit: Option<usize>) -> Vec<JobSummary> {
        self.store
            .summaries()
            .into_iter()
            .filter(|summary| status.map_or(true, |s| summary.status == s))
            .take(limit.unwrap_or(usize::MAX))
            .collect()
    }

    /// Remove a terminal job and its working directory
    pub async fn delete(&self, id: JobId) -> JobResult<()> {
        let handle = self.handle(id)?;
        if !handle.status().is_terminal() {
            return Err(JobError::JobActive(id));
        }
        self.store.remove(id);

        let dir = self.work_dir.join(id.to_string());
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        info!(job_id = %id, "Job deleted");
        Ok(())
    }

    /// Subscribe to events for all jobs
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// Wait until the job is terminal, then return its record
    pub async fn wait(&self, id: JobId) -> JobResult<Job> {
        let handle = self.handle(id)?;
        let mut status = handle.watch_status();
        status
            .wait_for(|s| s.is_terminal())
            .await
            .map_err(|_| JobError::Internal(format!("status channel closed for job {}", id)))?;
        Ok(handle.read(|state| state.job.clone()))
    }

    /// Job record as last written to its metadata file
    ///
    /// Works for jobs this manager never saw, e.g. from an earlier process.
    pub fn load_job_metadata(&self, id: JobId) -> JobResult<Job> {
        metadata::load_job_metadata(&self.work_dir, id)
    }

    /// Flip every segment no worker has started to `cancelled`
    fn cancel_undispatched(&self, state: &mut JobState) {
        let job_id = state.job.id;
        let mut snapshot = None;
        for segment in state.job.segments.iter_mut() {
            if segment.status != SegmentStatus::Queued {
                continue;
            }
            segment.transition_to(SegmentStatus::Cancelled);
            snapshot = Some(
                state
                    .aggregator
                    .segment_finished(segment.index, SegmentStatus::Cancelled),
            );
            self.events.emit_lossy(JobEvent::SegmentFinished {
                job_id,
                segment_index: segment.index,
                outcome: SegmentOutcomeData::Cancelled,
                timestamp: Utc::now(),
            });
        }

        if let Some(snapshot) = snapshot {
            state.apply_snapshot(&snapshot);
            self.events.emit_lossy(progress_event(&snapshot));
        }
    }

    fn handle(&self, id: JobId) -> JobResult<Arc<JobHandle>> {
        self.store.get(id).ok_or(JobError::NotFound(id))
    }

    fn resolve_stages(
        &self,
        config: &JobConfig,
    ) -> JobResult<Vec<(StageDefinition, Arc<dyn StageExecutor>)>> {
        config
            .enabled_stages()
            .into_iter()
            .map(|stage| match self.registry.get(&stage.name) {
                Some(executor) => Ok((stage, executor)),
                None => Err(JobError::InvalidConfiguration(format!(
                    "no executor registered for stage '{}'",
                    stage.name
                ))),
            })
            .collect()
    }
}

/// Move a job to a terminal status
///
/// Segments still open are marked `cancelled` first, so a job can never be
/// terminal with running segments.
fn close_job(
    state: &mut JobState,
    work_dir: &Path,
    status: JobStatus,
    message: String,
    error_message: Option<String>,
    result_path: Option<PathBuf>,
) -> JobEvent {
    for segment in state.job.segments.iter_mut() {
        if !segment.status.is_terminal() {
            segment.transition_to(SegmentStatus::Cancelled);
            segment.stage_progress.clear();
            state.aggregator.segment_finished(segment.index, SegmentStatus::Cancelled);
        }
    }

    state.job.error_message = error_message.clone();
    state.job.result_path = result_path.clone();
    let snapshot = state.aggregator.finish(status, message);
    state.apply_snapshot(&snapshot);
    state.job.transition_to(status);
    metadata::persist(work_dir, &state.job);

    JobEvent::JobFinished {
        job_id: state.job.id,
        status: state.job.status,
        degraded: state.job.degraded,
        result_path: result_path.map(|p| p.display().to_string()),
        error_message,
        timestamp: Utc::now(),
    }
}

fn progress_event(snapshot: &JobProgressSnapshot) -> JobEvent {
    JobEvent::ProgressUpdated {
        job_id: snapshot.job_id,
        progress: snapshot.progress,
        current_stage: snapshot.current_stage.clone(),
        message: snapshot.message.clone(),
        segments_completed: snapshot.segments_completed,
        segments_total: snapshot.segments_total,
    }
}

/// Mirrors runner progress onto the job record and the event bus
///
/// Progress events are published while the job lock is held, so subscribers
/// see them in the order the aggregator produced them.
struct JobTracker {
    handle: Arc<JobHandle>,
    events: EventBus,
}

impl JobTracker {
    fn segment_finished(&self, result: &SegmentResult) {
        let index = result.index;
        self.handle.update(|state| {
            let status = match &result.outcome {
                SegmentOutcome::Completed { .. } => SegmentStatus::Completed,
                SegmentOutcome::Failed { .. } => SegmentStatus::Failed,
                SegmentOutcome::Cancelled => SegmentStatus::Cancelled,
            };

            if let Some(segment) = state.job.segment_mut(index) {
                if segment.status.is_terminal() {
                    // Cancelled on the spot by `cancel` before a worker reached it
                    debug!(
                        job_id = %self.handle.id(),
                        segment_index = index,
                        status = %segment.status,
                        "Segment already closed"
                    );
                    return;
                }
                if status == SegmentStatus::Completed && segment.status == SegmentStatus::Queued {
                    segment.transition_to(SegmentStatus::Running);
                }
                if segment.transition_to(status) {
                    match &result.outcome {
                        SegmentOutcome::Completed { output_path } => {
                            segment.output_path = Some(output_path.clone());
                            segment.preview_path = Some(output_path.clone());
                        }
                        SegmentOutcome::Failed { stage, error } => {
                            segment.error = Some(format!("{}: {}", stage, error));
                        }
                        SegmentOutcome::Cancelled => segment.stage_progress.clear(),
                    }
                }
            }

            let snapshot = state.aggregator.segment_finished(index, status);
            state.apply_snapshot(&snapshot);

            self.events.emit_lossy(JobEvent::SegmentFinished {
                job_id: self.handle.id(),
                segment_index: index,
                outcome: result.outcome_data(),
                timestamp: Utc::now(),
            });
            self.events.emit_lossy(progress_event(&snapshot));
        });
    }
}

impl ProgressSink for JobTracker {
    fn segment_started(&self, segment_index: usize) {
        let started = self.handle.update(|state| {
            match state.job.segment_mut(segment_index) {
                Some(segment) if segment.status == SegmentStatus::Queued => {
                    segment.transition_to(SegmentStatus::Running);
                }
                _ => return false,
            }
            let snapshot = state.aggregator.segment_started(segment_index);
            state.apply_snapshot(&snapshot);
            true
        });
        if started {
            self.events.emit_lossy(JobEvent::SegmentStarted {
                job_id: self.handle.id(),
                segment_index,
                timestamp: Utc::now(),
            });
        }
    }

    fn stage_progress(&self, segment_index: usize, stage: &str, fraction: f32) {
        self.handle.update(|state| {
            let before = state.aggregator.snapshot();
            let snapshot = state.aggregator.update(segment_index, stage, fraction);

            // The record follows the aggregator even when the job-level
            // snapshot did not move
            let done = state.aggregator.stage_fraction(segment_index, stage);
            if let (Some(done), Some(segment)) = (done, state.job.segment_mut(segment_index)) {
                if !segment.status.is_terminal() && done > 0.0 {
                    let entry = segment.stage_progress.entry(stage.to_string()).or_insert(0.0);
                    *entry = entry.max(done as f32);
                }
            }

            if snapshot == before {
                return;
            }
            state.apply_snapshot(&snapshot);
            self.events.emit_lossy(progress_event(&snapshot));
        });
    }
}

/// Everything a dispatched job needs, moved onto its task
struct JobRun {
    handle: Arc<JobHandle>,
    stages: Vec<(StageDefinition, Arc<dyn StageExecutor>)>,
    source: Arc<dyn AudioSource>,
    segments: Vec<SegmentSpec>,
    config: JobConfig,
    events: EventBus,
    work_dir: PathBuf,
    output_dir: PathBuf,
    shared_pool: Option<AcceleratorPool>,
}

/// Terminal decision for a job that ran
struct Outcome {
    status: JobStatus,
    message: String,
    error: Option<String>,
    result_path: Option<PathBuf>,
}

impl Outcome {
    fn failed(reason: String) -> Self {
        Self {
            status: JobStatus::Failed,
            message: "Job failed".to_string(),
            error: Some(reason),
            result_path: None,
        }
    }
}

impl JobRun {
    async fn execute(self) {
        let job_id = self.handle.id();
        let control = self.handle.control().clone();

        // Queued → running, unless cancelled while waiting for dispatch
        let dispatch = self.handle.update(|state| {
            if state.job.status != JobStatus::Queued {
                return Err(None);
            }
            if control.is_stopped() {
                return Err(Some(close_job(
                    state,
                    &self.work_dir,
                    JobStatus::Cancelled,
                    "Cancelled before dispatch".to_string(),
                    None,
                    None,
                )));
            }
            state.job.transition_to(JobStatus::Running);
            let snapshot = state.aggregator.start();
            state.apply_snapshot(&snapshot);
            metadata::persist(&self.work_dir, &state.job);
            Ok(())
        });
        match dispatch {
            Ok(()) => {}
            Err(Some(event)) => {
                info!(job_id = %job_id, "Job cancelled before dispatch");
                self.events.emit_lossy(event);
                return;
            }
            Err(None) => return,
        }

        let max_concurrent = self.config.max_concurrent_segments;
        info!(job_id = %job_id, max_concurrent, "Job started");
        self.events.emit_lossy(JobEvent::JobStarted {
            job_id,
            max_concurrent_segments: max_concurrent,
            timestamp: Utc::now(),
        });

        let tracker = Arc::new(JobTracker {
            handle: self.handle.clone(),
            events: self.events.clone(),
        });
        let runner = Arc::new(StageRunner::new(
            job_id,
            self.stages.clone(),
            self.source.clone(),
            self.output_dir.clone(),
            self.config.failure_policy,
            control.clone(),
            tracker.clone(),
        ));
        let scheduler = match &self.shared_pool {
            Some(pool) => ConcurrencyScheduler::with_pool(max_concurrent, pool.clone()),
            None => ConcurrencyScheduler::new(max_concurrent),
        };

        let segments = self.segments.iter().copied().enumerate().collect();
        let mut results = Box::pin(scheduler.schedule(runner, segments));
        while let Some(result) = results.next().await {
            tracker.segment_finished(&result);
        }

        let outcome = self.decide(&control).await;
        match outcome.status {
            JobStatus::Completed => info!(
                job_id = %job_id,
                result = ?outcome.result_path,
                message = %outcome.message,
                "Job completed"
            ),
            JobStatus::Cancelled => info!(job_id = %job_id, "Job cancelled"),
            _ => error!(job_id = %job_id, error = ?outcome.error, "Job failed"),
        }

        let event = self.handle.update(|state| {
            close_job(
                state,
                &self.work_dir,
                outcome.status,
                outcome.message,
                outcome.error,
                outcome.result_path,
            )
        });
        self.events.emit_lossy(event);
    }

    async fn decide(&self, control: &JobControl) -> Outcome {
        if let Some(reason) = control.abort_reason() {
            return Outcome::failed(reason);
        }
        if control.is_stopped() {
            return Outcome {
                status: JobStatus::Cancelled,
                message: "Cancelled".to_string(),
                error: None,
                result_path: None,
            };
        }

        let (completed, failed) = self.handle.read(|state| {
            (
                state.job.count_segments(SegmentStatus::Completed),
                state.job.count_segments(SegmentStatus::Failed),
            )
        });
        if completed == 0 {
            return Outcome::failed(format!("All {} segments failed", failed));
        }

        if failed > 0 && !self.config.allow_partial_result {
            warn!(
                job_id = %self.handle.id(),
                failed,
                completed,
                "Degraded job, partial result not requested"
            );
            return Outcome {
                status: JobStatus::Completed,
                message: format!(
                    "Completed with {} of {} segments failed; no result assembled",
                    failed,
                    completed + failed
                ),
                error: None,
                result_path: None,
            };
        }

        let segments = self.handle.read(|state| state.job.segments.clone());
        let overlap = self.config.overlap;
        let curve = self.config.crossfade_curve;
        let out_path = self.output_dir.join(RESULT_FILE_NAME);
        let partial = failed > 0;

        let assembled = tokio::task::spawn_blocking(move || {
            if partial {
                assembler::assemble_partial(&segments, overlap, curve, &out_path)
            } else {
                assembler::assemble(&segments, overlap, curve, &out_path)
            }
        })
        .await;

        match assembled {
            Ok(Ok(path)) => Outcome {
                status: JobStatus::Completed,
                message: if partial {
                    format!("Completed with {} failed segments; partial result", failed)
                } else {
                    "Completed".to_string()
                },
                error: None,
                result_path: Some(path),
            },
            Ok(Err(e)) => Outcome::failed(format!("Assembly failed: {}", e)),
            Err(e) => Outcome::failed(format!("Assembly panicked: {}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioBuffer, MemorySource};
    use crate::models::StageDefinition;
    use tempfile::TempDir;

    fn source(seconds: usize) -> Arc<dyn AudioSource> {
        Arc::new(MemorySource::new(AudioBuffer::silence(seconds * 100, 100, 1)))
    }

    fn manager(dir: &TempDir) -> JobManager {
        JobManager::new(StageRegistry::with_builtin_pipeline(), dir.path())
    }

    #[tokio::test]
    async fn test_invalid_config_creates_no_record() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        let config = JobConfig {
            segment_length: 5.0,
            overlap: 5.0,
            ..Default::default()
        };
        let result = manager.submit(config, source(10), vec![SegmentSpec::new(0.0, 5.0)]);
        assert!(matches!(result, Err(JobError::InvalidConfiguration(_))));
        assert!(manager.list(None, None).is_empty());
    }

    #[tokio::test]
    async fn test_unregistered_stage_rejected() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        let config = JobConfig {
            stages: vec![StageDefinition::new("denoise", 1.0)],
            ..Default::default()
        };
        let result = manager.submit(config, source(10), vec![SegmentSpec::new(0.0, 10.0)]);
        assert!(matches!(result, Err(JobError::InvalidConfiguration(_))));
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        let id = Uuid::new_v4();
        assert!(matches!(manager.get_progress(id), Err(JobError::NotFound(_))));
        assert!(matches!(manager.get_job(id), Err(JobError::NotFound(_))));
        assert!(matches!(manager.cancel(id), Err(JobError::NotFound(_))));
        assert!(matches!(manager.delete(id).await, Err(JobError::NotFound(_))));
        assert!(matches!(manager.wait(id).await, Err(JobError::NotFound(_))));
    }

    #[test]
    fn test_submit_outside_runtime_is_an_error() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        let result = manager.submit(JobConfig::default(), source(10), vec![SegmentSpec::new(0.0, 10.0)]);
        assert!(matches!(result, Err(JobError::Internal(_))));
    }

    #[tokio::test]
    async fn test_segmented_submit_completes() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        let config = JobConfig {
            segment_length: 4.0,
            overlap: 0.5,
            ..Default::default()
        };
        let id = manager.submit_segmented(config, source(10)).unwrap();
        let job = manager.wait(id).await.unwrap();

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.segments.len(), 3);
        let result = crate::audio::read_wav(job.result_path.as_ref().unwrap()).unwrap();
        assert!((result.duration_secs() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_segment_record_follows_accepted_stage_fractions() {
        let config = JobConfig::default();
        let id = Uuid::new_v4();
        let specs = [SegmentSpec::new(0.0, 30.0), SegmentSpec::new(29.5, 40.0)];
        let aggregator = ProgressAggregator::new(id, &config, specs.len());
        let job = Job::new(id, config, &specs);
        let handle = Arc::new(JobHandle::new(job, aggregator, Arc::new(JobControl::new())));
        handle.update(|state| {
            state.job.transition_to(JobStatus::Running);
            state.aggregator.start();
        });
        let tracker = JobTracker {
            handle: handle.clone(),
            events: EventBus::new(16),
        };

        tracker.segment_started(0);
        tracker.segment_started(1);
        tracker.stage_progress(0, "voice", 0.9);
        tracker.stage_progress(1, "voice", 0.501);
        let before = handle.read(|state| state.aggregator.snapshot());

        // Job-level snapshot does not move, the segment's own record does
        tracker.stage_progress(1, "voice", 0.502);
        let (snapshot, job) = handle.read(|state| (state.aggregator.snapshot(), state.job.clone()));
        assert_eq!(snapshot, before);
        assert!((job.segments[1].stage_progress["voice"] - 0.502).abs() < 1e-6);
        assert!((job.segments[0].stage_progress["voice"] - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_tracker_ignores_segments_already_closed() {
        let config = JobConfig::default();
        let id = Uuid::new_v4();
        let specs = [SegmentSpec::new(0.0, 30.0)];
        let aggregator = ProgressAggregator::new(id, &config, specs.len());
        let job = Job::new(id, config, &specs);
        let handle = Arc::new(JobHandle::new(job, aggregator, Arc::new(JobControl::new())));
        let events = EventBus::new(16);
        let mut rx = events.subscribe();
        handle.update(|state| {
            state.job.transition_to(JobStatus::Running);
            state.aggregator.start();
            state.job.segments[0].transition_to(SegmentStatus::Cancelled);
            state.aggregator.segment_finished(0, SegmentStatus::Cancelled);
        });
        let tracker = JobTracker {
            handle: handle.clone(),
            events,
        };

        tracker.segment_started(0);
        tracker.stage_progress(0, "pitch", 1.0);
        tracker.segment_finished(&SegmentResult::cancelled(0));

        let job = handle.read(|state| state.job.clone());
        assert_eq!(job.segments[0].status, SegmentStatus::Cancelled);
        assert!(job.segments[0].stage_progress.is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_delete_requires_terminal_job() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        let id = manager
            .submit(JobConfig::default(), source(10), vec![SegmentSpec::new(0.0, 10.0)])
            .unwrap();
        manager.wait(id).await.unwrap();

        let job_dir = dir.path().join(id.to_string());
        assert!(job_dir.exists());
        manager.delete(id).await.unwrap();
        assert!(!job_dir.exists());
        assert!(matches!(manager.get_job(id), Err(JobError::NotFound(_))));
    }
}
