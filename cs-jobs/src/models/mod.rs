//! Data models for the job core

pub mod job;
pub mod job_config;

pub use job::{
    validate_segment_specs, Job, JobId, JobSummary, Segment, SegmentSpec, SegmentStatus,
};
pub use job_config::{FailurePolicy, JobConfig, StageDefinition};
