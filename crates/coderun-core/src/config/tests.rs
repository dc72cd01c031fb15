//! Tests for configuration loading and environment overrides

use super::*;
use serial_test::serial;
use std::env;
use std::io::Write;
use tempfile::NamedTempFile;

const ENV_VARS: [&str; 11] = [
    "CODERUN_MEMORY_LIMIT",
    "CODERUN_CPU_LIMIT",
    "CODERUN_TIMEOUT",
    "CODERUN_TEMP_DIR",
    "CODERUN_DOCKER_HOST",
    "CODERUN_AUTO_PULL",
    "CODERUN_LOCAL_ONLY",
    "DOCKER_MEMORY_LIMIT",
    "DOCKER_CPU_LIMIT",
    "DOCKER_TIMEOUT",
    "TEMP_DIR",
];

fn clear_env() {
    for var in ENV_VARS {
        env::remove_var(var);
    }
}

#[test]
fn test_defaults_are_valid() {
    let config = SandboxConfig::default();
    assert_eq!(config.defaults.memory_limit, "256m");
    assert_eq!(config.defaults.cpu_share, 0.5);
    assert_eq!(config.defaults.timeout_seconds, 30);
    assert!(!config.local_only);
    assert!(config.validate().is_ok());
}

#[test]
fn test_partial_yaml_keeps_defaults() {
    let yaml = r#"
defaults:
  memory_limit: 128m
images:
  python: python:3.12-slim
"#;
    let config = ConfigLoader::from_str(yaml).unwrap();
    assert_eq!(config.defaults.memory_limit, "128m");
    assert_eq!(config.defaults.timeout_seconds, 30);
    assert_eq!(config.images.python, "python:3.12-slim");
    assert_eq!(config.images.javascript, "node:18-slim");
}

#[test]
fn test_invalid_yaml_is_config_error() {
    let err = ConfigLoader::from_str("defaults: [not, a, map]").unwrap_err();
    assert!(matches!(err, SandboxError::ConfigError(_)));
}

#[test]
fn test_validation_rejects_bad_values() {
    let mut config = SandboxConfig::default();
    config.defaults.timeout_seconds = 0;
    assert!(config.validate().is_err());

    let mut config = SandboxConfig::default();
    config.defaults.cpu_share = 1.5;
    assert!(config.validate().is_err());

    let mut config = SandboxConfig::default();
    config.defaults.memory_limit = "lots".to_string();
    assert!(config.validate().is_err());

    let mut config = SandboxConfig::default();
    config.images.go = String::new();
    assert!(config.validate().is_err());
}

#[tokio::test]
#[serial]
async fn test_load_from_file() {
    clear_env();
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "defaults:\n  timeout_seconds: 12\nlocal_only: true").unwrap();

    let config = load_config(file.path()).await.unwrap();
    assert_eq!(config.defaults.timeout_seconds, 12);
    assert!(config.local_only);
}

#[tokio::test]
#[serial]
async fn test_missing_file_is_config_error() {
    clear_env();
    let result = load_config("/definitely/not/here.yaml").await;
    assert!(matches!(result, Err(SandboxError::ConfigError(_))));
}

#[tokio::test]
#[serial]
async fn test_env_overrides_file_and_defaults() {
    clear_env();
    env::set_var("CODERUN_MEMORY_LIMIT", "64m");
    env::set_var("CODERUN_CPU_LIMIT", "0.2");
    env::set_var("CODERUN_TIMEOUT", "5");
    env::set_var("CODERUN_LOCAL_ONLY", "yes");

    let config = ConfigLoader::load(None).await.unwrap();
    clear_env();

    assert_eq!(config.defaults.memory_limit, "64m");
    assert_eq!(config.defaults.cpu_share, 0.2);
    assert_eq!(config.defaults.timeout_seconds, 5);
    assert!(config.local_only);
}

#[tokio::test]
#[serial]
async fn test_legacy_env_names_are_honored() {
    clear_env();
    env::set_var("DOCKER_MEMORY_LIMIT", "128m");
    env::set_var("DOCKER_TIMEOUT", "10");
    env::set_var("TEMP_DIR", "/var/tmp/coderun");
    env::set_var("CODERUN_TIMEOUT", "7");

    let config = ConfigLoader::load(None).await.unwrap();
    clear_env();

    assert_eq!(config.defaults.memory_limit, "128m");
    // The prefixed name wins when both are set.
    assert_eq!(config.defaults.timeout_seconds, 7);
    assert_eq!(config.scratch_dir, std::path::PathBuf::from("/var/tmp/coderun"));
}

#[tokio::test]
#[serial]
async fn test_invalid_env_value_is_rejected() {
    clear_env();
    env::set_var("CODERUN_TIMEOUT", "soon");
    let result = ConfigLoader::load(None).await;
    clear_env();
    assert!(matches!(result, Err(SandboxError::ConfigError(_))));

    env::set_var("CODERUN_CPU_LIMIT", "0");
    let result = ConfigLoader::load(None).await;
    clear_env();
    assert!(matches!(result, Err(SandboxError::ValidationError(_))));
}

#[tokio::test]
#[serial]
async fn test_relative_scratch_dir_is_made_absolute() {
    clear_env();
    env::set_var("CODERUN_TEMP_DIR", "./scratch");
    let config = ConfigLoader::load(None).await.unwrap();
    clear_env();

    assert!(config.scratch_dir.is_absolute());
    assert!(config.scratch_dir.ends_with("scratch"));
}
