//! Bootstrap configuration loading
//!
//! Config file resolution follows this priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. Platform config directory (`<config_dir>/cover-studio/<file_name>`)
//! 4. Compiled defaults (no file)
//!
//! A missing or unreadable file never aborts startup: the caller gets the
//! compiled defaults and a warning is logged.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Application directory name under the platform config directory
pub const APP_DIR_NAME: &str = "cover-studio";

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Where the effective configuration came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    CommandLine(PathBuf),
    Environment(PathBuf),
    PlatformDefault(PathBuf),
    CompiledDefaults,
}

impl ConfigSource {
    pub fn path(&self) -> Option<&Path> {
        match self {
            ConfigSource::CommandLine(p)
            | ConfigSource::Environment(p)
            | ConfigSource::PlatformDefault(p) => Some(p),
            ConfigSource::CompiledDefaults => None,
        }
    }
}

/// Resolve which config file to read
///
/// CLI and environment paths are returned even if the file does not exist, so
/// the loader can warn about it; the platform path only counts when present.
pub fn resolve_config_path(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    file_name: &str,
) -> ConfigSource {
    if let Some(path) = cli_arg {
        return ConfigSource::CommandLine(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return ConfigSource::Environment(PathBuf::from(path));
        }
    }

    if let Some(path) = platform_config_path(file_name) {
        if path.exists() {
            return ConfigSource::PlatformDefault(path);
        }
    }

    ConfigSource::CompiledDefaults
}

/// `<config_dir>/cover-studio/<file_name>` for the current platform
pub fn platform_config_path(file_name: &str) -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR_NAME).join(file_name))
}

/// OS-dependent default data directory for job working files
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join(APP_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from("./cover_studio_data"))
}

/// Read and parse a TOML file
pub fn read_toml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    Ok(toml::from_str(&content)?)
}

/// Serialize `config` and write it to `path`, creating parent directories
pub fn write_toml<T: Serialize>(config: &T, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Load configuration from the resolved source, falling back to defaults
///
/// Parse errors in an existing file are reported as errors: a file that is
/// present but wrong is a misconfiguration, not a missing config.
pub fn load_or_default<T: DeserializeOwned + Default>(source: &ConfigSource) -> Result<T> {
    let Some(path) = source.path() else {
        info!("No config file found, using compiled defaults");
        return Ok(T::default());
    };

    if !path.exists() {
        warn!(
            path = %path.display(),
            "Config file does not exist, using compiled defaults"
        );
        return Ok(T::default());
    }

    info!(path = %path.display(), "Loading configuration");
    read_toml(path)
}
