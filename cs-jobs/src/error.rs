//! Error types for cs-jobs
//!
//! The taxonomy the job core exposes to its callers:
//! - `InvalidConfiguration`: rejected at submit time, never reaches a job record
//! - `NotFound`: job ID unknown to the registry
//! - `StageFailure`: a stage executor (or the accelerator pool) failed a segment
//! - `IncompleteInput`: assembly attempted without every segment output

use thiserror::Error;
use uuid::Uuid;

/// Job core error type
#[derive(Debug, Error)]
pub enum JobError {
    /// Job configuration or segment list rejected at submit time
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Job ID unknown to the registry
    #[error("Job not found: {0}")]
    NotFound(Uuid),

    /// Operation requires a terminal job (e.g. delete while running)
    #[error("Job {0} is still active")]
    JobActive(Uuid),

    /// A stage failed for one segment
    #[error("Stage '{stage}' failed on segment {segment_index}: {source}")]
    StageFailure {
        segment_index: usize,
        stage: String,
        #[source]
        source: StageError,
    },

    /// Assembly invoked with missing segment outputs
    #[error("Incomplete input: {0}")]
    IncompleteInput(String),

    /// Audio decode/encode or format mismatch
    #[error("Audio error: {0}")]
    Audio(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// WAV read/write error
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    /// Job metadata file could not be (de)serialized
    #[error("Metadata error: {0}")]
    Metadata(#[from] serde_json::Error),

    /// cs-common error
    #[error("Common error: {0}")]
    Common(#[from] cs_common::Error),

    /// Internal error (e.g. a blocking task panicked)
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error returned by a stage executor
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StageError {
    /// Executor ran and reported a failure
    #[error("{0}")]
    Failed(String),

    /// Executor observed the cancellation check and stopped early
    #[error("cancelled")]
    Cancelled,

    /// Model/resource for this stage is unavailable
    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl StageError {
    pub fn failed(msg: impl Into<String>) -> Self {
        StageError::Failed(msg.into())
    }
}

/// Result type for job core operations
pub type JobResult<T> = Result<T, JobError>;
