//! Error types for the execution service
//!
//! Failures are split by who owns them. `InfrastructureFault` covers the
//! execution environment itself (daemon gone, image missing) and is the only
//! class the sandbox absorbs and retries against the local backend. Everything
//! the user's program does wrong travels inside an `ExecutionResult` instead.
//! `SandboxError` is reserved for the edges: loading and validating
//! configuration before any code runs.

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum SandboxError {
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("I/O error: {0}")]
    IoError(String),
}

impl From<std::io::Error> for SandboxError {
    fn from(err: std::io::Error) -> Self {
        SandboxError::IoError(err.to_string())
    }
}

impl From<LimitsError> for SandboxError {
    fn from(err: LimitsError) -> Self {
        SandboxError::ValidationError(err.to_string())
    }
}

/// A failure of the execution environment rather than of the submitted program.
#[derive(Error, Debug)]
pub enum InfrastructureFault {
    #[error("container runtime unavailable: {0}")]
    RuntimeUnavailable(String),
    #[error("container runtime became unresponsive: {0}")]
    RuntimeUnresponsive(String),
    #[error("container image '{image}' not found locally (pull it with 'docker pull {image}')")]
    ImageMissing { image: String },
    #[error("could not prepare scratch directory: {0}")]
    ScratchUnavailable(#[from] std::io::Error),
}

impl InfrastructureFault {
    /// Short label used in degradation warnings.
    pub fn cause(&self) -> &'static str {
        match self {
            InfrastructureFault::RuntimeUnavailable(_) => "container runtime unavailable",
            InfrastructureFault::RuntimeUnresponsive(_) => "container runtime unresponsive",
            InfrastructureFault::ImageMissing { .. } => "container image missing",
            InfrastructureFault::ScratchUnavailable(_) => "scratch directory unavailable",
        }
    }
}

// Docker client errors are only ever infrastructure: a user program cannot make
// the daemon return an API error.
impl From<bollard::errors::Error> for InfrastructureFault {
    fn from(err: bollard::errors::Error) -> Self {
        InfrastructureFault::RuntimeUnresponsive(err.to_string())
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LimitsError {
    #[error("invalid memory limit '{0}' (expected e.g. 256m, 1g, 524288k)")]
    InvalidMemory(String),
    #[error("cpu share must be in (0, 1], got {0}")]
    InvalidCpuShare(f64),
    #[error("wall-clock timeout must be positive")]
    InvalidTimeout,
}
