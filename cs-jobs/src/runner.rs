//! Per-segment stage pipeline
//!
//! [`StageRunner`] runs the enabled stages of one job, in configured order, on
//! one segment at a time. Stage 0 consumes the raw segment audio read from the
//! job's source; every later stage consumes the previous stage's output. The
//! final buffer is written to `<work_dir>/<job_id>/segment_NNN.wav`.

use crate::audio::{write_wav, AudioBuffer, AudioSource};
use crate::control::JobControl;
use crate::error::StageError;
use crate::models::{FailurePolicy, JobId, SegmentSpec, StageDefinition};
use crate::stages::{StageContext, StageExecutor};
use cs_common::events::SegmentOutcomeData;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Stage name reported when reading the segment's source audio fails
pub const INPUT_STAGE: &str = "input";
/// Stage name reported when writing the segment's output fails
pub const OUTPUT_STAGE: &str = "output";

/// Receives progress from running segments
pub trait ProgressSink: Send + Sync {
    /// A worker holds an accelerator token and began the segment
    fn segment_started(&self, segment_index: usize);

    /// `fraction` of `stage` is done for the segment
    fn stage_progress(&self, segment_index: usize, stage: &str, fraction: f32);
}

/// How a segment ended
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentOutcome {
    Completed { output_path: PathBuf },
    Failed { stage: String, error: String },
    Cancelled,
}

/// Terminal result of one segment
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentResult {
    pub index: usize,
    pub outcome: SegmentOutcome,
}

impl SegmentResult {
    pub fn cancelled(index: usize) -> Self {
        Self {
            index,
            outcome: SegmentOutcome::Cancelled,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.outcome, SegmentOutcome::Completed { .. })
    }

    /// Event payload for this outcome
    pub fn outcome_data(&self) -> SegmentOutcomeData {
        match &self.outcome {
            SegmentOutcome::Completed { output_path } => SegmentOutcomeData::Completed {
                output_path: output_path.display().to_string(),
            },
            SegmentOutcome::Failed { stage, error } => SegmentOutcomeData::Failed {
                stage: stage.clone(),
                error: error.clone(),
            },
            SegmentOutcome::Cancelled => SegmentOutcomeData::Cancelled,
        }
    }
}

/// Calls `release()` on drop, so accelerator memory is freed on every exit
/// path including a panicking executor
struct ReleaseGuard<'a>(&'a dyn StageExecutor);

impl Drop for ReleaseGuard<'_> {
    fn drop(&mut self) {
        self.0.release();
    }
}

/// Runs the stage list for one segment
pub struct StageRunner {
    job_id: JobId,
    stages: Vec<(StageDefinition, Arc<dyn StageExecutor>)>,
    source: Arc<dyn AudioSource>,
    output_dir: PathBuf,
    policy: FailurePolicy,
    control: Arc<JobControl>,
    sink: Arc<dyn ProgressSink>,
}

impl StageRunner {
    pub fn new(
        job_id: JobId,
        stages: Vec<(StageDefinition, Arc<dyn StageExecutor>)>,
        source: Arc<dyn AudioSource>,
        output_dir: impl Into<PathBuf>,
        policy: FailurePolicy,
        control: Arc<JobControl>,
        sink: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            job_id,
            stages,
            source,
            output_dir: output_dir.into(),
            policy,
            control,
            sink,
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn control(&self) -> &Arc<JobControl> {
        &self.control
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Output file for a segment
    pub fn output_path(&self, index: usize) -> PathBuf {
        self.output_dir.join(format!("segment_{:03}.wav", index))
    }

    /// Run every stage on one segment
    ///
    /// Cancellation is checked before each stage and before the output is
    /// written; a stage that is already running is never interrupted.
    pub async fn run(&self, index: usize, spec: SegmentSpec) -> SegmentResult {
        self.sink.segment_started(index);
        debug!(
            job_id = %self.job_id,
            segment_index = index,
            start = spec.start_time,
            end = spec.end_time,
            "Segment started"
        );

        let source = self.source.clone();
        let read = tokio::task::spawn_blocking(move || {
            source.read_range(spec.start_time, spec.end_time)
        })
        .await;
        let mut buffer = match read {
            Ok(Ok(buffer)) => buffer,
            Ok(Err(e)) => return self.fail(index, INPUT_STAGE, e.to_string()),
            Err(e) => return self.fail(index, INPUT_STAGE, format!("reader panicked: {}", e)),
        };

        for (definition, executor) in &self.stages {
            if self.control.is_stopped() {
                return self.stopped(index, &definition.name);
            }

            let ctx = self.context(index, spec, &definition.name);
            let executor = executor.clone();
            let input = buffer;
            let outcome = tokio::task::spawn_blocking(move || {
                let _release = ReleaseGuard(executor.as_ref());
                executor.execute(input, &ctx)
            })
            .await;

            buffer = match outcome {
                Ok(Ok(output)) => output,
                Ok(Err(StageError::Cancelled)) if self.control.is_stopped() => {
                    return self.stopped(index, &definition.name);
                }
                Ok(Err(e)) => return self.fail(index, &definition.name, e.to_string()),
                Err(e) => {
                    return self.fail(index, &definition.name, format!("executor panicked: {}", e))
                }
            };

            self.sink.stage_progress(index, &definition.name, 1.0);
            debug!(
                job_id = %self.job_id,
                segment_index = index,
                stage = %definition.name,
                "Stage completed"
            );
        }

        if self.control.is_stopped() {
            return self.stopped(index, OUTPUT_STAGE);
        }

        let path = self.output_path(index);
        match write_output(path.clone(), buffer).await {
            Ok(()) => {
                info!(
                    job_id = %self.job_id,
                    segment_index = index,
                    output = %path.display(),
                    "Segment completed"
                );
                SegmentResult {
                    index,
                    outcome: SegmentOutcome::Completed { output_path: path },
                }
            }
            Err(e) => self.fail(index, OUTPUT_STAGE, e),
        }
    }

    /// Record a stage failure and apply the failure policy
    pub fn fail(&self, index: usize, stage: &str, error: String) -> SegmentResult {
        error!(
            job_id = %self.job_id,
            segment_index = index,
            stage = %stage,
            error = %error,
            policy = ?self.policy,
            "Stage failed"
        );

        if self.policy == FailurePolicy::AbortJob {
            self.control.abort(format!(
                "Stage '{}' failed on segment {}: {}",
                stage, index, error
            ));
        }

        SegmentResult {
            index,
            outcome: SegmentOutcome::Failed {
                stage: stage.to_string(),
                error,
            },
        }
    }

    fn stopped(&self, index: usize, next_stage: &str) -> SegmentResult {
        warn!(
            job_id = %self.job_id,
            segment_index = index,
            stage = %next_stage,
            "Segment stopped before stage"
        );
        SegmentResult::cancelled(index)
    }

    fn context(&self, index: usize, spec: SegmentSpec, stage: &str) -> StageContext {
        let sink = self.sink.clone();
        let stage_name = stage.to_string();
        StageContext::new(
            self.job_id,
            index,
            stage,
            spec.start_time,
            spec.end_time,
            self.control.token().clone(),
            Arc::new(move |fraction| sink.stage_progress(index, &stage_name, fraction)),
        )
    }
}

async fn write_output(path: PathBuf, buffer: AudioBuffer) -> Result<(), String> {
    tokio::task::spawn_blocking(move || write_wav(&path, &buffer))
        .await
        .map_err(|e| format!("writer panicked: {}", e))?
        .map_err(|e| e.to_string())
}
