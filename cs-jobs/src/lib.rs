//! cs-jobs library interface
//!
//! Orchestration core for long cover-generation jobs: a source is split into
//! overlapping segments, each segment runs through an ordered stage pipeline
//! under an accelerator concurrency cap, progress is aggregated per job, and
//! completed segments are stitched back together with crossfades.

pub mod assembler;
pub mod audio;
pub mod config;
pub mod control;
pub mod error;
pub mod manager;
pub mod metadata;
pub mod models;
pub mod progress;
pub mod runner;
pub mod scheduler;
pub mod segmenter;
pub mod stages;
pub mod store;

pub use crate::error::{JobError, JobResult, StageError};
pub use crate::manager::JobManager;
pub use crate::progress::JobProgressSnapshot;
pub use cs_common::events::{JobEvent, JobStatus};
