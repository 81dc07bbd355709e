//! Job-level progress aggregation
//!
//! Turns per-segment, per-stage fraction reports into one job percentage:
//!
//! ```text
//! segment  = Σ weight(stage) × fraction(stage)          (enabled stages only)
//! job      = 100 × (finished + max(in-flight segment)) / total
//! ```
//!
//! `finished` counts completed and failed segments. Only the single most
//! advanced in-flight segment contributes its partial fraction. With several
//! segments running at once this is an approximation rather than an average:
//! when a new segment starts while an older one is nearly done, the number can
//! sit still for a while. It is never allowed to go backwards while the job is
//! running.
//!
//! The aggregator has no locking of its own; the job store serializes access
//! so updates from concurrent workers apply one at a time.

use crate::models::{JobConfig, JobId, SegmentStatus, StageDefinition};
use cs_common::events::JobStatus;
use serde::{Deserialize, Serialize};

/// Point-in-time view of a job's progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobProgressSnapshot {
    pub job_id: JobId,
    pub status: JobStatus,
    /// Percentage complete (0.0 - 100.0)
    pub progress: f64,
    /// Most recently reported stage across in-flight segments
    pub current_stage: String,
    pub segments_completed: usize,
    pub segments_failed: usize,
    pub segments_total: usize,
    pub message: String,
    pub degraded: bool,
}

#[derive(Debug, Clone)]
struct SegmentProgress {
    status: SegmentStatus,
    /// Fraction per enabled stage, same order as `ProgressAggregator::stages`
    fractions: Vec<f64>,
}

impl SegmentProgress {
    fn weighted(&self, stages: &[StageDefinition]) -> f64 {
        stages
            .iter()
            .zip(&self.fractions)
            .map(|(stage, fraction)| stage.weight * fraction)
            .sum::<f64>()
            .clamp(0.0, 1.0)
    }
}

/// Accumulates stage progress for one job
#[derive(Debug, Clone)]
pub struct ProgressAggregator {
    job_id: JobId,
    /// Enabled stages with normalized weights
    stages: Vec<StageDefinition>,
    segments: Vec<SegmentProgress>,
    status: JobStatus,
    progress: f64,
    current_stage: String,
    message: String,
    completed: usize,
    failed: usize,
    cancelled: usize,
}

impl ProgressAggregator {
    pub fn new(job_id: JobId, config: &JobConfig, segments_total: usize) -> Self {
        let stages = config.enabled_stages();
        let segments = (0..segments_total)
            .map(|_| SegmentProgress {
                status: SegmentStatus::Queued,
                fractions: vec![0.0; stages.len()],
            })
            .collect();

        Self {
            job_id,
            stages,
            segments,
            status: JobStatus::Queued,
            progress: 0.0,
            current_stage: "initialization".to_string(),
            message: format!("Queued {} segments", segments_total),
            completed: 0,
            failed: 0,
            cancelled: 0,
        }
    }

    /// Job dispatched
    pub fn start(&mut self) -> JobProgressSnapshot {
        if self.status == JobStatus::Queued {
            self.status = JobStatus::Running;
            self.message = format!("Processing {} segments", self.segments.len());
        }
        self.snapshot()
    }

    /// A worker began running a segment
    pub fn segment_started(&mut self, segment_index: usize) -> JobProgressSnapshot {
        if let Some(segment) = self.segments.get_mut(segment_index) {
            if segment.status == SegmentStatus::Queued {
                segment.status = SegmentStatus::Running;
                self.message = format!(
                    "Segment {}/{} started",
                    segment_index + 1,
                    self.segments.len()
                );
            }
        }
        self.snapshot()
    }

    /// Record `fraction` done for one stage of one segment
    ///
    /// Reports for unknown segments or stages, for segments already terminal,
    /// or that would move a stage backwards are ignored. The returned snapshot
    /// is identical to the previous one in that case.
    pub fn update(
        &mut self,
        segment_index: usize,
        stage_name: &str,
        fraction: f32,
    ) -> JobProgressSnapshot {
        let Some(stage_pos) = self.stages.iter().position(|s| s.name == stage_name) else {
            return self.snapshot();
        };
        let total = self.segments.len();
        let Some(segment) = self.segments.get_mut(segment_index) else {
            return self.snapshot();
        };
        if segment.status.is_terminal() || !fraction.is_finite() {
            return self.snapshot();
        }

        let fraction = (fraction as f64).clamp(0.0, 1.0);
        if fraction <= segment.fractions[stage_pos] {
            return self.snapshot();
        }
        segment.fractions[stage_pos] = fraction;
        if segment.status == SegmentStatus::Queued {
            segment.status = SegmentStatus::Running;
        }

        self.current_stage = stage_name.to_string();
        self.message = format!(
            "Segment {}/{}: {} {:.0}%",
            segment_index + 1,
            total,
            stage_name,
            fraction * 100.0
        );
        self.recompute();
        self.snapshot()
    }

    /// A segment reached a terminal state
    ///
    /// Completed and failed segments count as finished. A cancelled segment's
    /// partial stage progress is discarded.
    pub fn segment_finished(
        &mut self,
        segment_index: usize,
        status: SegmentStatus,
    ) -> JobProgressSnapshot {
        let total = self.segments.len();
        let Some(segment) = self.segments.get_mut(segment_index) else {
            return self.snapshot();
        };
        if segment.status.is_terminal() || !status.is_terminal() {
            return self.snapshot();
        }

        segment.status = status;
        match status {
            JobStatus::Completed => {
                segment.fractions.iter_mut().for_each(|f| *f = 1.0);
                self.completed += 1;
            }
            JobStatus::Failed => self.failed += 1,
            _ => {
                segment.fractions.iter_mut().for_each(|f| *f = 0.0);
                self.cancelled += 1;
            }
        }

        self.message = format!(
            "Segment {}/{} {} ({} of {} finished)",
            segment_index + 1,
            total,
            status,
            self.completed + self.failed,
            total
        );
        self.recompute();
        self.snapshot()
    }

    /// Job reached a terminal state
    pub fn finish(&mut self, status: JobStatus, message: impl Into<String>) -> JobProgressSnapshot {
        if !self.status.is_terminal() && status.is_terminal() {
            self.status = status;
            if status == JobStatus::Completed {
                self.progress = 100.0;
                self.current_stage = "completed".to_string();
            }
            self.message = message.into();
        }
        self.snapshot()
    }

    /// Latest snapshot; repeated calls without updates in between are equal
    pub fn snapshot(&self) -> JobProgressSnapshot {
        JobProgressSnapshot {
            job_id: self.job_id,
            status: self.status,
            progress: self.progress,
            current_stage: self.current_stage.clone(),
            segments_completed: self.completed,
            segments_failed: self.failed,
            segments_total: self.segments.len(),
            message: self.message.clone(),
            degraded: self.failed > 0,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn progress(&self) -> f64 {
        self.progress
    }

    /// Accepted fraction of one stage of one segment
    pub fn stage_fraction(&self, segment_index: usize, stage_name: &str) -> Option<f64> {
        let stage_pos = self.stages.iter().position(|s| s.name == stage_name)?;
        self.segments
            .get(segment_index)
            .map(|segment| segment.fractions[stage_pos])
    }

    pub fn segments_cancelled(&self) -> usize {
        self.cancelled
    }

    fn recompute(&mut self) {
        let total = self.segments.len();
        if total == 0 || self.status.is_terminal() {
            return;
        }

        let partial = self
            .segments
            .iter()
            .filter(|s| !s.status.is_terminal())
            .map(|s| s.weighted(&self.stages))
            .fold(0.0f64, f64::max);
        let finished = (self.completed + self.failed) as f64;

        let next = (100.0 * (finished + partial) / total as f64).min(100.0);
        if next > self.progress {
            self.progress = next;
        }
    }
}
