//! Service configuration for cs-jobs
//!
//! Loaded from `cs-jobs.toml` found via `--config`, then `CS_JOBS_CONFIG`, then
//! the platform config directory. Every key is optional.
//!
//! ```toml
//! work_dir = "/var/lib/cover-studio/jobs"
//! accelerator_slots = 2      # shared across all jobs; omit for per-job pools
//! event_capacity = 256
//!
//! [logging]
//! level = "info"
//!
//! [defaults]
//! segment_length = 30.0
//! overlap = 0.5
//! max_concurrent_segments = 2
//! failure_policy = "abort-segment"
//! crossfade_curve = "equal_power"
//! ```

use crate::error::{JobError, JobResult};
use crate::models::JobConfig;
use cs_common::config::{load_or_default, resolve_config_path, ConfigSource, LoggingConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "CS_JOBS_CONFIG";
/// Config file name under the platform config directory
pub const CONFIG_FILE_NAME: &str = "cs-jobs.toml";
/// Events buffered per subscriber before it starts lagging
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Root for per-job working directories (`<work_dir>/<job_id>/`)
    pub work_dir: PathBuf,

    /// System-wide accelerator token budget shared by all jobs
    ///
    /// When unset, each job gets a private pool sized to its
    /// `max_concurrent_segments`.
    pub accelerator_slots: Option<usize>,

    pub event_capacity: usize,

    pub logging: LoggingConfig,

    /// Job configuration used when the caller does not supply one
    pub defaults: JobConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            work_dir: cs_common::config::default_data_dir().join("jobs"),
            accelerator_slots: None,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            logging: LoggingConfig::default(),
            defaults: JobConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Resolve, read and validate the config file
    pub fn load(cli_path: Option<&Path>) -> JobResult<(Self, ConfigSource)> {
        let source = resolve_config_path(cli_path, CONFIG_ENV_VAR, CONFIG_FILE_NAME);
        let config: ServiceConfig = load_or_default(&source)?;
        config.validate()?;
        Ok((config, source))
    }

    pub fn validate(&self) -> JobResult<()> {
        if self.accelerator_slots == Some(0) {
            return Err(JobError::InvalidConfiguration(
                "accelerator_slots must be >= 1".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(JobError::InvalidConfiguration(
                "event_capacity must be >= 1".to_string(),
            ));
        }
        self.defaults.validate()
    }
}
