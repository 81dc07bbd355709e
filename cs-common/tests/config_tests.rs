//! Configuration resolution tests
//!
//! Note: Uses serial_test to prevent environment variable races. Tests that
//! manipulate CS_TEST_CONFIG are marked with #[serial].

use cs_common::config::{load_or_default, resolve_config_path, ConfigSource, LoggingConfig};
use serde::Deserialize;
use serial_test::serial;
use std::env;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const ENV_VAR: &str = "CS_TEST_CONFIG";

#[derive(Debug, Default, Deserialize)]
struct TestConfig {
    #[serde(default)]
    workers: usize,
    #[serde(default)]
    logging: LoggingConfig,
}

#[test]
#[serial]
fn test_env_var_used_when_no_cli_arg() {
    env::set_var(ENV_VAR, "/srv/cover/cs-jobs.toml");

    let source = resolve_config_path(None, ENV_VAR, "cs-jobs.toml");
    assert_eq!(
        source,
        ConfigSource::Environment(PathBuf::from("/srv/cover/cs-jobs.toml"))
    );

    env::remove_var(ENV_VAR);
}

#[test]
#[serial]
fn test_cli_arg_overrides_env_var() {
    env::set_var(ENV_VAR, "/srv/cover/from-env.toml");

    let source = resolve_config_path(Some(Path::new("/opt/cli.toml")), ENV_VAR, "cs-jobs.toml");
    assert_eq!(source, ConfigSource::CommandLine(PathBuf::from("/opt/cli.toml")));

    env::remove_var(ENV_VAR);
}

#[test]
#[serial]
fn test_blank_env_var_is_ignored() {
    env::set_var(ENV_VAR, "   ");

    let source = resolve_config_path(None, ENV_VAR, "definitely-not-present-cs.toml");
    assert!(!matches!(source, ConfigSource::Environment(_)));

    env::remove_var(ENV_VAR);
}

#[test]
#[serial]
fn test_env_pointed_file_is_loaded() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cs.toml");
    std::fs::write(&path, "workers = 3\n[logging]\nlevel = \"debug\"\n").unwrap();
    env::set_var(ENV_VAR, &path);

    let source = resolve_config_path(None, ENV_VAR, "cs.toml");
    let config: TestConfig = load_or_default(&source).unwrap();
    assert_eq!(config.workers, 3);
    assert_eq!(config.logging.level, "debug");

    env::remove_var(ENV_VAR);
}
