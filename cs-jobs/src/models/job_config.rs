//! Per-job processing configuration
//!
//! Validated once at submit time. A config that fails validation never
//! produces a job record.

use crate::error::{JobError, JobResult};
use cs_common::FadeCurve;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Default segment length in seconds
pub const DEFAULT_SEGMENT_LENGTH: f64 = 30.0;
/// Default overlap between consecutive segments in seconds
pub const DEFAULT_OVERLAP: f64 = 0.5;
/// Default accelerator budget: segments allowed to run at once
pub const DEFAULT_MAX_CONCURRENT_SEGMENTS: usize = 2;

/// What a stage failure does to the rest of the job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Mark the segment failed and keep going with the others
    #[default]
    AbortSegment,
    /// Stop admitting segments, stop in-flight ones cooperatively, fail the job
    AbortJob,
}

impl std::str::FromStr for FailurePolicy {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "abort-segment" | "abort_segment" | "segment" => Ok(FailurePolicy::AbortSegment),
            "abort-job" | "abort_job" | "job" => Ok(FailurePolicy::AbortJob),
            other => Err(JobError::InvalidConfiguration(format!(
                "unknown failure policy '{}'",
                other
            ))),
        }
    }
}

/// One named step of the per-segment pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDefinition {
    /// Stage name, also the key into the executor registry
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Relative share of a segment's progress this stage accounts for
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_enabled() -> bool {
    true
}

fn default_weight() -> f64 {
    1.0
}

impl StageDefinition {
    pub fn new(name: impl Into<String>, weight: f64) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            weight,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Standard cover pipeline: pitch analysis, voice conversion, instrumental
/// generation, mixing
pub fn default_stages() -> Vec<StageDefinition> {
    vec![
        StageDefinition::new("pitch", 0.15),
        StageDefinition::new("voice", 0.45),
        StageDefinition::new("instrumental", 0.30),
        StageDefinition::new("mixing", 0.10),
    ]
}

/// Per-job processing configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// Segment length in seconds
    pub segment_length: f64,
    /// Overlap between consecutive segments in seconds
    pub overlap: f64,
    /// Worker pool size and accelerator token budget
    pub max_concurrent_segments: usize,
    pub failure_policy: FailurePolicy,
    /// Ordered stage list; disabled stages are skipped
    pub stages: Vec<StageDefinition>,
    /// Curve used when crossfading segment boundaries
    pub crossfade_curve: FadeCurve,
    /// Assemble completed segments even when some failed
    pub allow_partial_result: bool,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            segment_length: DEFAULT_SEGMENT_LENGTH,
            overlap: DEFAULT_OVERLAP,
            max_concurrent_segments: DEFAULT_MAX_CONCURRENT_SEGMENTS,
            failure_policy: FailurePolicy::default(),
            stages: default_stages(),
            crossfade_curve: FadeCurve::default(),
            allow_partial_result: false,
        }
    }
}

impl JobConfig {
    /// Check every submit-time constraint
    pub fn validate(&self) -> JobResult<()> {
        if !self.segment_length.is_finite() || self.segment_length <= 0.0 {
            return Err(invalid(format!(
                "segment length must be > 0, got {}",
                self.segment_length
            )));
        }
        if !self.overlap.is_finite() || self.overlap < 0.0 {
            return Err(invalid(format!(
                "overlap must be >= 0, got {}",
                self.overlap
            )));
        }
        if self.overlap >= self.segment_length {
            return Err(invalid(format!(
                "overlap ({}) must be shorter than segment length ({})",
                self.overlap, self.segment_length
            )));
        }
        if self.max_concurrent_segments < 1 {
            return Err(invalid("max concurrent segments must be >= 1".to_string()));
        }

        let mut seen = HashSet::new();
        for stage in &self.stages {
            if stage.name.trim().is_empty() {
                return Err(invalid("stage name must not be empty".to_string()));
            }
            if !seen.insert(stage.name.as_str()) {
                return Err(invalid(format!("duplicate stage '{}'", stage.name)));
            }
            if !stage.weight.is_finite() || stage.weight < 0.0 {
                return Err(invalid(format!(
                    "stage '{}' has invalid weight {}",
                    stage.name, stage.weight
                )));
            }
        }

        let enabled: Vec<_> = self.stages.iter().filter(|s| s.enabled).collect();
        if enabled.is_empty() {
            return Err(invalid("at least one stage must be enabled".to_string()));
        }
        if enabled.iter().map(|s| s.weight).sum::<f64>() <= 0.0 {
            return Err(invalid("enabled stage weights must not all be zero".to_string()));
        }

        Ok(())
    }

    /// Enabled stages in configured order, weights normalized to sum to 1.0
    pub fn enabled_stages(&self) -> Vec<StageDefinition> {
        let enabled: Vec<_> = self.stages.iter().filter(|s| s.enabled).cloned().collect();
        let total: f64 = enabled.iter().map(|s| s.weight).sum();
        if total <= 0.0 {
            return enabled;
        }
        enabled
            .into_iter()
            .map(|mut s| {
                s.weight /= total;
                s
            })
            .collect()
    }
}

fn invalid(msg: String) -> JobError {
    JobError::InvalidConfiguration(msg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = JobConfig::default();
        config.validate().unwrap();
        assert_eq!(config.max_concurrent_segments, 2);
        assert_eq!(config.failure_policy, FailurePolicy::AbortSegment);
        assert_eq!(config.stages.len(), 4);
    }

    #[test]
    fn test_rejects_overlap_not_shorter_than_segment() {
        let config = JobConfig {
            segment_length: 10.0,
            overlap: 10.0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(JobError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_rejects_non_positive_segment_length() {
        for length in [0.0, -5.0, f64::NAN] {
            let config = JobConfig {
                segment_length: length,
                overlap: 0.0,
                ..Default::default()
            };
            assert!(config.validate().is_err(), "length {} accepted", length);
        }
    }

    #[test]
    fn test_rejects_zero_concurrency() {
        let config = JobConfig {
            max_concurrent_segments: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_duplicate_and_missing_stages() {
        let dup = JobConfig {
            stages: vec![StageDefinition::new("a", 1.0), StageDefinition::new("a", 1.0)],
            ..Default::default()
        };
        assert!(dup.validate().is_err());

        let none_enabled = JobConfig {
            stages: vec![StageDefinition::new("a", 1.0).disabled()],
            ..Default::default()
        };
        assert!(none_enabled.validate().is_err());
    }

    #[test]
    fn test_enabled_weights_are_normalized() {
        let config = JobConfig {
            stages: vec![
                StageDefinition::new("pitch", 1.0),
                StageDefinition::new("voice", 3.0),
                StageDefinition::new("mixing", 5.0).disabled(),
            ],
            ..Default::default()
        };
        let stages = config.enabled_stages();
        assert_eq!(stages.len(), 2);
        assert!((stages[0].weight - 0.25).abs() < 1e-12);
        assert!((stages[1].weight - 0.75).abs() < 1e-12);
        let total: f64 = stages.iter().map(|s| s.weight).sum();
        assert!((total - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_policy_serde_names() {
        assert_eq!(
            serde_json::to_string(&FailurePolicy::AbortJob).unwrap(),
            "\"abort-job\""
        );
        assert_eq!(
            "abort-segment".parse::<FailurePolicy>().unwrap(),
            FailurePolicy::AbortSegment
        );
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: JobConfig = toml::from_str("segment_length = 12.0\noverlap = 1.0\n").unwrap();
        assert_eq!(config.segment_length, 12.0);
        assert_eq!(config.max_concurrent_segments, DEFAULT_MAX_CONCURRENT_SEGMENTS);
        assert_eq!(config.stages, default_stages());
    }
}
