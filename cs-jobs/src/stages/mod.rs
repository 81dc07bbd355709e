//! Stage executor interface and registry
//!
//! A stage is one named transformation in the per-segment pipeline (pitch
//! analysis, voice conversion, instrumental generation, mixing). The
//! orchestration core never implements the signal processing itself; it looks
//! executors up by stage name in a [`StageRegistry`] and calls them through
//! [`StageExecutor`].
//!
//! Executors are synchronous. The runner invokes them on the blocking thread
//! pool, so an executor may block on model inference or file I/O freely.

mod builtin;

pub use builtin::{GainStage, PassthroughStage, PEAK_LIMIT};

use crate::audio::AudioBuffer;
use crate::error::StageError;
use crate::models::JobId;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Callback receiving a stage's fraction done (0.0 - 1.0)
pub type ProgressCallback = Arc<dyn Fn(f32) + Send + Sync>;

/// Per-invocation context handed to an executor
///
/// Carries the segment being processed, a progress callback and the job's
/// cancellation check. Executors that run long should poll
/// [`StageContext::is_cancelled`] and return [`StageError::Cancelled`], but the
/// core never interrupts a stage that ignores it.
#[derive(Clone)]
pub struct StageContext {
    pub job_id: JobId,
    pub segment_index: usize,
    pub stage: String,
    /// Segment bounds in the source, in seconds
    pub start_time: f64,
    pub end_time: f64,
    cancel: CancellationToken,
    progress: ProgressCallback,
}

impl StageContext {
    pub fn new(
        job_id: JobId,
        segment_index: usize,
        stage: impl Into<String>,
        start_time: f64,
        end_time: f64,
        cancel: CancellationToken,
        progress: ProgressCallback,
    ) -> Self {
        Self {
            job_id,
            segment_index,
            stage: stage.into(),
            start_time,
            end_time,
            cancel,
            progress,
        }
    }

    /// Report incremental progress for this stage
    pub fn report_progress(&self, fraction: f32) {
        if fraction.is_finite() {
            (self.progress)(fraction.clamp(0.0, 1.0));
        }
    }

    /// True once the job has been cancelled or aborted
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl fmt::Debug for StageContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageContext")
            .field("job_id", &self.job_id)
            .field("segment_index", &self.segment_index)
            .field("stage", &self.stage)
            .field("start_time", &self.start_time)
            .field("end_time", &self.end_time)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// One named transformation applied to a segment's audio
pub trait StageExecutor: Send + Sync {
    /// Stage name this executor implements
    fn name(&self) -> &str;

    /// Transform `input` into the buffer consumed by the next stage
    fn execute(&self, input: AudioBuffer, ctx: &StageContext) -> Result<AudioBuffer, StageError>;

    /// Free any accelerator memory held after an execution
    ///
    /// Called once after every `execute`, whether it succeeded, failed or
    /// panicked.
    fn release(&self) {}
}

/// Executors keyed by stage name
#[derive(Clone, Default)]
pub struct StageRegistry {
    executors: HashMap<String, Arc<dyn StageExecutor>>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the default pipeline backed by built-in executors
    ///
    /// `pitch`, `voice` and `instrumental` pass audio through unchanged;
    /// `mixing` applies unity gain with peak limiting. Real models replace
    /// these entries with [`StageRegistry::register`].
    pub fn with_builtin_pipeline() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(PassthroughStage::new("pitch")));
        registry.register(Arc::new(PassthroughStage::new("voice")));
        registry.register(Arc::new(PassthroughStage::new("instrumental")));
        registry.register(Arc::new(GainStage::new("mixing", 1.0)));
        registry
    }

    /// Register an executor under its own name, replacing any previous one
    pub fn register(&mut self, executor: Arc<dyn StageExecutor>) -> &mut Self {
        let name = executor.name().to_string();
        self.register_as(name, executor)
    }

    /// Register an executor under an explicit stage name
    pub fn register_as(
        &mut self,
        name: impl Into<String>,
        executor: Arc<dyn StageExecutor>,
    ) -> &mut Self {
        let name = name.into();
        if self.executors.insert(name.clone(), executor).is_some() {
            tracing::debug!(stage = %name, "Replaced stage executor");
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn StageExecutor>> {
        self.executors.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.executors.contains_key(name)
    }

    /// Registered stage names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.executors.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

impl fmt::Debug for StageRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageRegistry")
            .field("stages", &self.names())
            .finish()
    }
}
