//! Built-in stage executors
//!
//! Stand-ins used when a model is not installed, and the simple mixing step
//! that does not need one.

use super::{StageContext, StageExecutor};
use crate::audio::AudioBuffer;
use crate::error::StageError;

/// Peak ceiling applied by [`GainStage`]
pub const PEAK_LIMIT: f32 = 0.99;

/// Identity transform
#[derive(Debug, Clone)]
pub struct PassthroughStage {
    name: String,
}

impl PassthroughStage {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl StageExecutor for PassthroughStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, input: AudioBuffer, ctx: &StageContext) -> Result<AudioBuffer, StageError> {
        if ctx.is_cancelled() {
            return Err(StageError::Cancelled);
        }
        ctx.report_progress(1.0);
        Ok(input)
    }
}

/// Scales samples by a fixed gain, then limits peaks to [`PEAK_LIMIT`]
///
/// The limiter rescales the whole buffer rather than clipping, so the
/// waveform shape is preserved.
#[derive(Debug, Clone)]
pub struct GainStage {
    name: String,
    gain: f32,
}

impl GainStage {
    pub fn new(name: impl Into<String>, gain: f32) -> Self {
        Self {
            name: name.into(),
            gain,
        }
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }
}

impl StageExecutor for GainStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(
        &self,
        mut input: AudioBuffer,
        ctx: &StageContext,
    ) -> Result<AudioBuffer, StageError> {
        if !self.gain.is_finite() {
            return Err(StageError::failed(format!("invalid gain {}", self.gain)));
        }
        if ctx.is_cancelled() {
            return Err(StageError::Cancelled);
        }

        for sample in input.samples.iter_mut() {
            *sample *= self.gain;
        }
        ctx.report_progress(0.5);

        let peak = input.peak();
        if peak > PEAK_LIMIT {
            let scale = PEAK_LIMIT / peak;
            for sample in input.samples.iter_mut() {
                *sample *= scale;
            }
        }
        ctx.report_progress(1.0);

        Ok(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    fn ctx(cancel: CancellationToken) -> StageContext {
        StageContext::new(Uuid::new_v4(), 2, "mixing", 0.0, 1.0, cancel, Arc::new(|_| {}))
    }

    #[test]
    fn test_passthrough_returns_input() {
        let input = AudioBuffer::new(vec![0.1, -0.2, 0.3], 3, 1);
        let out = PassthroughStage::new("pitch")
            .execute(input.clone(), &ctx(CancellationToken::new()))
            .unwrap();
        assert_eq!(out, input);
    }

    #[test]
    fn test_gain_limits_peak() {
        let input = AudioBuffer::new(vec![0.8, -0.4, 0.2, 0.0], 4, 1);
        let out = GainStage::new("mixing", 2.0)
            .execute(input, &ctx(CancellationToken::new()))
            .unwrap();
        assert!((out.peak() - PEAK_LIMIT).abs() < 1e-6);
        // Shape preserved: ratio between samples unchanged
        assert!((out.samples[0] / out.samples[1] + 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_gain_below_limit_untouched() {
        let input = AudioBuffer::new(vec![0.2, -0.4], 2, 1);
        let out = GainStage::new("mixing", 0.5)
            .execute(input, &ctx(CancellationToken::new()))
            .unwrap();
        assert_eq!(out.samples, vec![0.1, -0.2]);
    }

    #[test]
    fn test_builtin_stages_honor_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let input = AudioBuffer::new(vec![0.0], 1, 1);
        assert_eq!(
            PassthroughStage::new("pitch").execute(input.clone(), &ctx(cancel.clone())),
            Err(StageError::Cancelled)
        );
        assert_eq!(
            GainStage::new("mixing", 1.0).execute(input, &ctx(cancel)),
            Err(StageError::Cancelled)
        );
    }

    #[test]
    fn test_non_finite_gain_fails() {
        let result = GainStage::new("mixing", f32::INFINITY)
            .execute(AudioBuffer::new(vec![0.0], 1, 1), &ctx(CancellationToken::new()));
        assert!(matches!(result, Err(StageError::Failed(_))));
    }
}
