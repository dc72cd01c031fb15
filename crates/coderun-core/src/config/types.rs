//! Configuration types for the execution service

use crate::errors::SandboxError;
use crate::language::Language;
use crate::limits::parse_memory_limit;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Process-wide configuration, read once at startup and shared read-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    #[serde(default)]
    pub defaults: ExecutionDefaults,
    #[serde(default)]
    pub docker: DockerConfig,
    #[serde(default)]
    pub images: ImageConfig,
    /// Directory under which per-call scratch directories are created.
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,
    /// Skip the container backend entirely and always run locally.
    #[serde(default)]
    pub local_only: bool,
}

/// Per-request defaults applied when a request omits a field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionDefaults {
    #[serde(default = "default_memory_limit")]
    pub memory_limit: String,
    #[serde(default = "default_cpu_share")]
    pub cpu_share: f64,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Lowest CPU share a request can be throttled to.
    #[serde(default = "default_cpu_floor")]
    pub cpu_floor: f64,
    #[serde(default = "default_pids_limit")]
    pub pids_limit: i64,
}

/// Container runtime connection settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DockerConfig {
    /// Daemon address (`unix:///var/run/docker.sock`, `tcp://host:2375`).
    /// Falls back to `DOCKER_HOST` / the platform default when unset.
    #[serde(default)]
    pub host: Option<String>,
    /// Pull a missing image instead of treating it as an infrastructure fault.
    #[serde(default)]
    pub auto_pull: bool,
}

/// Container image per language
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageConfig {
    #[serde(default = "default_python_image")]
    pub python: String,
    #[serde(default = "default_javascript_image")]
    pub javascript: String,
    #[serde(default = "default_go_image")]
    pub go: String,
    #[serde(default = "default_rust_image")]
    pub rust: String,
}

impl ImageConfig {
    pub fn image_for(&self, language: Language) -> &str {
        match language {
            Language::Python => &self.python,
            Language::Javascript => &self.javascript,
            Language::Go => &self.go,
            Language::Rust => &self.rust,
        }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            defaults: ExecutionDefaults::default(),
            docker: DockerConfig::default(),
            images: ImageConfig::default(),
            scratch_dir: default_scratch_dir(),
            local_only: false,
        }
    }
}

impl Default for ExecutionDefaults {
    fn default() -> Self {
        Self {
            memory_limit: default_memory_limit(),
            cpu_share: default_cpu_share(),
            timeout_seconds: default_timeout_seconds(),
            cpu_floor: default_cpu_floor(),
            pids_limit: default_pids_limit(),
        }
    }
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            python: default_python_image(),
            javascript: default_javascript_image(),
            go: default_go_image(),
            rust: default_rust_image(),
        }
    }
}

impl SandboxConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), SandboxError> {
        let d = &self.defaults;

        parse_memory_limit(&d.memory_limit)?;

        if !(d.cpu_share > 0.0 && d.cpu_share <= 1.0) {
            return Err(SandboxError::ValidationError(format!(
                "defaults.cpu_share must be in (0, 1], got {}",
                d.cpu_share
            )));
        }
        if !(d.cpu_floor > 0.0 && d.cpu_floor <= 1.0) {
            return Err(SandboxError::ValidationError(format!(
                "defaults.cpu_floor must be in (0, 1], got {}",
                d.cpu_floor
            )));
        }
        if d.timeout_seconds == 0 {
            return Err(SandboxError::ValidationError(
                "defaults.timeout_seconds must be greater than 0".to_string(),
            ));
        }
        if d.pids_limit <= 0 {
            return Err(SandboxError::ValidationError(
                "defaults.pids_limit must be greater than 0".to_string(),
            ));
        }

        for lang in Language::ALL {
            if self.images.image_for(lang).trim().is_empty() {
                return Err(SandboxError::ValidationError(format!(
                    "images.{} cannot be empty",
                    lang
                )));
            }
        }

        Ok(())
    }
}

fn default_memory_limit() -> String { "256m".to_string() }
fn default_cpu_share() -> f64 { 0.5 }
fn default_timeout_seconds() -> u64 { 30 }
fn default_cpu_floor() -> f64 { 0.05 }
fn default_pids_limit() -> i64 { 64 }
fn default_scratch_dir() -> PathBuf { std::env::temp_dir() }
fn default_python_image() -> String { "python:3.10-slim".to_string() }
fn default_javascript_image() -> String { "node:18-slim".to_string() }
fn default_go_image() -> String { "golang:1.22-alpine".to_string() }
fn default_rust_image() -> String { "rust:1-slim".to_string() }
