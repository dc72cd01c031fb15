//! Configuration loader for YAML files and environment overrides
//!
//! Precedence, lowest first: built-in defaults, the YAML file, environment
//! variables. The `CODERUN_*` names win over the legacy `DOCKER_*` / `TEMP_DIR`
//! names the older deployment scripts export.

use crate::config::types::*;
use crate::errors::SandboxError;
use std::env;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Configuration loader with environment resolution
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load, apply environment overrides and validate.
    ///
    /// A missing `path` means "defaults plus environment".
    pub async fn load(path: Option<&Path>) -> Result<SandboxConfig, SandboxError> {
        let mut config = match path {
            Some(path) => Self::from_file(path).await?,
            None => SandboxConfig::default(),
        };
        Self::apply_env(&mut config)?;
        // Bind mounts are resolved by the daemon, not relative to this process.
        config.scratch_dir = std::path::absolute(&config.scratch_dir)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<SandboxConfig, SandboxError> {
        let path = path.as_ref();

        let content = fs::read_to_string(path).await.map_err(|e| {
            SandboxError::ConfigError(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        Self::from_str(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_str(content: &str) -> Result<SandboxConfig, SandboxError> {
        if content.trim().is_empty() {
            return Ok(SandboxConfig::default());
        }
        serde_yaml::from_str(content)
            .map_err(|e| SandboxError::ConfigError(format!("Failed to parse YAML: {}", e)))
    }

    /// Overlay environment variables onto `config`.
    pub fn apply_env(config: &mut SandboxConfig) -> Result<(), SandboxError> {
        if let Some(memory) = lookup("CODERUN_MEMORY_LIMIT", Some("DOCKER_MEMORY_LIMIT")) {
            config.defaults.memory_limit = memory;
        }
        if let Some(cpu) = lookup("CODERUN_CPU_LIMIT", Some("DOCKER_CPU_LIMIT")) {
            config.defaults.cpu_share = parse_value("CODERUN_CPU_LIMIT", &cpu)?;
        }
        if let Some(timeout) = lookup("CODERUN_TIMEOUT", Some("DOCKER_TIMEOUT")) {
            config.defaults.timeout_seconds = parse_value("CODERUN_TIMEOUT", &timeout)?;
        }
        if let Some(dir) = lookup("CODERUN_TEMP_DIR", Some("TEMP_DIR")) {
            config.scratch_dir = PathBuf::from(dir);
        }
        if let Some(host) = lookup("CODERUN_DOCKER_HOST", None) {
            config.docker.host = Some(host);
        }
        if let Some(flag) = lookup("CODERUN_AUTO_PULL", None) {
            config.docker.auto_pull = parse_flag("CODERUN_AUTO_PULL", &flag)?;
        }
        if let Some(flag) = lookup("CODERUN_LOCAL_ONLY", None) {
            config.local_only = parse_flag("CODERUN_LOCAL_ONLY", &flag)?;
        }
        Ok(())
    }
}

fn lookup(primary: &str, legacy: Option<&str>) -> Option<String> {
    let non_empty = |name: &str| env::var(name).ok().filter(|v| !v.trim().is_empty());
    non_empty(primary).or_else(|| legacy.and_then(non_empty))
}

fn parse_value<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T, SandboxError>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e| {
        SandboxError::ConfigError(format!("Invalid value '{}' for {}: {}", raw, name, e))
    })
}

fn parse_flag(name: &str, raw: &str) -> Result<bool, SandboxError> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(SandboxError::ConfigError(format!(
            "Invalid boolean '{}' for {}",
            raw, name
        ))),
    }
}
