//! Job and segment records
//!
//! A job moves `queued → running → {completed, failed, cancelled}`; each of
//! its segments follows the same state machine independently. Records are
//! owned by the job store and only mutated through the job manager.

use super::job_config::JobConfig;
use crate::error::{JobError, JobResult};
use chrono::{DateTime, Utc};
use cs_common::events::JobStatus;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::warn;
use uuid::Uuid;

pub type JobId = Uuid;

/// Segments share the job state machine
pub type SegmentStatus = JobStatus;

/// Slack allowed when comparing caller-provided segment times
const TIME_EPSILON: f64 = 1e-6;

/// Time bounds of one segment, in seconds from the start of the source
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SegmentSpec {
    pub start_time: f64,
    pub end_time: f64,
}

impl SegmentSpec {
    pub fn new(start_time: f64, end_time: f64) -> Self {
        Self {
            start_time,
            end_time,
        }
    }

    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }
}

/// Check a caller-provided segment list against the job config
///
/// Segments must be non-empty, ordered, no longer than the configured
/// length, inside `[0, total_duration]`, and contiguous: each one starts no
/// later than the previous end and overlaps it by at most `overlap`.
pub fn validate_segment_specs(
    specs: &[SegmentSpec],
    config: &JobConfig,
    total_duration: f64,
) -> JobResult<()> {
    let invalid = |msg: String| Err(JobError::InvalidConfiguration(msg));

    if specs.is_empty() {
        return invalid("segment list must not be empty".to_string());
    }

    for (i, spec) in specs.iter().enumerate() {
        if !spec.start_time.is_finite() || !spec.end_time.is_finite() {
            return invalid(format!("segment {} has non-finite bounds", i));
        }
        if spec.start_time < 0.0 || spec.end_time <= spec.start_time {
            return invalid(format!(
                "segment {} has invalid bounds [{}, {})",
                i, spec.start_time, spec.end_time
            ));
        }
        if spec.duration() > config.segment_length + TIME_EPSILON {
            return invalid(format!(
                "segment {} is {:.3}s, longer than segment length {}s",
                i,
                spec.duration(),
                config.segment_length
            ));
        }
        if spec.end_time > total_duration + TIME_EPSILON {
            return invalid(format!(
                "segment {} ends at {} past source duration {}",
                i, spec.end_time, total_duration
            ));
        }
    }

    for (i, pair) in specs.windows(2).enumerate() {
        let (prev, next) = (&pair[0], &pair[1]);
        if next.start_time > prev.end_time + TIME_EPSILON {
            return invalid(format!("gap between segments {} and {}", i, i + 1));
        }
        if next.start_time < prev.end_time - config.overlap - TIME_EPSILON
            || next.start_time < prev.start_time
        {
            return invalid(format!(
                "segments {} and {} overlap by more than {}s",
                i,
                i + 1,
                config.overlap
            ));
        }
    }

    Ok(())
}

/// One time slice of the source and its processing state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// Stable position; defines assembly order
    pub index: usize,
    pub start_time: f64,
    pub end_time: f64,
    pub status: SegmentStatus,
    /// Fraction done per stage name (0.0 - 1.0)
    pub stage_progress: BTreeMap<String, f32>,
    pub output_path: Option<PathBuf>,
    pub preview_path: Option<PathBuf>,
    pub error: Option<String>,
}

impl Segment {
    pub fn new(index: usize, spec: SegmentSpec) -> Self {
        Self {
            index,
            start_time: spec.start_time,
            end_time: spec.end_time,
            status: SegmentStatus::Queued,
            stage_progress: BTreeMap::new(),
            output_path: None,
            preview_path: None,
            error: None,
        }
    }

    pub fn spec(&self) -> SegmentSpec {
        SegmentSpec::new(self.start_time, self.end_time)
    }

    /// Apply a status change if the state machine allows it
    pub fn transition_to(&mut self, next: SegmentStatus) -> bool {
        if !self.status.can_transition_to(next) {
            warn!(
                segment_index = self.index,
                from = %self.status,
                to = %next,
                "Ignoring illegal segment transition"
            );
            return false;
        }
        self.status = next;
        true
    }
}

/// Complete job record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    pub config: JobConfig,
    pub segments: Vec<Segment>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Percentage complete (0.0 - 100.0)
    pub progress: f64,
    pub current_stage: String,
    pub message: String,
    /// Some segments failed but the job completed anyway
    pub degraded: bool,
    pub error_message: Option<String>,
    pub result_path: Option<PathBuf>,
}

impl Job {
    pub fn new(id: JobId, config: JobConfig, specs: &[SegmentSpec]) -> Self {
        let now = Utc::now();
        Self {
            id,
            status: JobStatus::Queued,
            config,
            segments: specs
                .iter()
                .enumerate()
                .map(|(index, spec)| Segment::new(index, *spec))
                .collect(),
            created_at: now,
            updated_at: now,
            started_at: None,
            ended_at: None,
            progress: 0.0,
            current_stage: "initialization".to_string(),
            message: "Job created".to_string(),
            degraded: false,
            error_message: None,
            result_path: None,
        }
    }

    /// Apply a status change if the state machine allows it
    ///
    /// `completed` is additionally refused while any segment is non-terminal.
    pub fn transition_to(&mut self, next: JobStatus) -> bool {
        if !self.status.can_transition_to(next) {
            warn!(
                job_id = %self.id,
                from = %self.status,
                to = %next,
                "Ignoring illegal job transition"
            );
            return false;
        }
        if next == JobStatus::Completed && self.segments.iter().any(|s| !s.status.is_terminal()) {
            warn!(job_id = %self.id, "Refusing completion with non-terminal segments");
            return false;
        }

        let now = Utc::now();
        self.status = next;
        self.updated_at = now;
        match next {
            JobStatus::Running => self.started_at = Some(now),
            s if s.is_terminal() => self.ended_at = Some(now),
            _ => {}
        }
        true
    }

    pub fn segment_mut(&mut self, index: usize) -> Option<&mut Segment> {
        self.segments.get_mut(index)
    }

    pub fn count_segments(&self, status: SegmentStatus) -> usize {
        self.segments.iter().filter(|s| s.status == status).count()
    }

    pub fn segments_total(&self) -> usize {
        self.segments.len()
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id,
            status: self.status,
            progress: self.progress,
            current_stage: self.current_stage.clone(),
            segments_completed: self.count_segments(SegmentStatus::Completed),
            segments_failed: self.count_segments(SegmentStatus::Failed),
            segments_total: self.segments_total(),
            degraded: self.degraded,
            created_at: self.created_at,
            updated_at: self.updated_at,
            error_message: self.error_message.clone(),
            result_path: self.result_path.clone(),
        }
    }
}

/// Registry listing entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: JobId,
    pub status: JobStatus,
    pub progress: f64,
    pub current_stage: String,
    pub segments_completed: usize,
    pub segments_failed: usize,
    pub segments_total: usize,
    pub degraded: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub error_message: Option<String>,
    pub result_path: Option<PathBuf>,
}
