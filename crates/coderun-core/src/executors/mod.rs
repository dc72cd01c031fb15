//! Execution backends
//!
//! Both backends implement [`Executor`]. The container backend is the primary
//! path and enforces memory, CPU, process and network limits; the local backend
//! runs the interpreter directly on the host and only enforces the wall-clock
//! timeout. Backends report user-program failures inside `ExecutionResult` and
//! reserve `Err(InfrastructureFault)` for a broken environment.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::classifier::ErrorKind;
use crate::errors::InfrastructureFault;
use crate::language::{Language, RuntimeProfile};
use crate::limits::BackendLimits;

pub mod docker;
pub mod local;
mod scratch;

pub use docker::DockerExecutor;
pub use local::LocalExecutor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Container,
    Local,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Container => f.write_str("container"),
            ExecutionMode::Local => f.write_str("local"),
        }
    }
}

/// A single unit of work submitted by a caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub source_text: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub memory_limit: Option<String>,
    #[serde(default)]
    pub cpu_share: Option<f64>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

impl ExecutionRequest {
    pub fn new(source_text: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            source_text: source_text.into(),
            language: language.into(),
            ..Default::default()
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn with_memory_limit(mut self, memory_limit: impl Into<String>) -> Self {
        self.memory_limit = Some(memory_limit.into());
        self
    }

    pub fn with_cpu_share(mut self, cpu_share: f64) -> Self {
        self.cpu_share = Some(cpu_share);
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }
}

/// Structured outcome of one execution. Always returned, never partially built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    /// Decoded stdout only, including any partial output before a kill.
    pub output: String,
    /// Decoded stderr (plus a cause line where useful) when `success` is false.
    pub error: Option<String>,
    pub execution_mode: ExecutionMode,
    pub warnings: Vec<String>,
    pub exit_code: Option<i64>,
    pub error_kind: Option<ErrorKind>,
    pub language: Language,
    pub duration_ms: u64,
}

impl ExecutionResult {
    pub fn succeeded(mode: ExecutionMode, language: Language, output: String) -> Self {
        Self {
            success: true,
            output,
            error: None,
            execution_mode: mode,
            warnings: Vec::new(),
            exit_code: Some(0),
            error_kind: None,
            language,
            duration_ms: 0,
        }
    }

    pub fn failed(mode: ExecutionMode, language: Language, error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.into()),
            execution_mode: mode,
            warnings: Vec::new(),
            exit_code: None,
            error_kind: None,
            language,
            duration_ms: 0,
        }
    }

    pub fn with_output(mut self, output: String) -> Self {
        self.output = output;
        self
    }

    pub fn with_exit_code(mut self, code: i64) -> Self {
        self.exit_code = Some(code);
        self
    }

    pub fn with_kind(mut self, kind: ErrorKind) -> Self {
        self.error_kind = Some(kind);
        self
    }

    pub fn with_duration(mut self, duration: std::time::Duration) -> Self {
        self.duration_ms = duration.as_millis() as u64;
        self
    }
}

/// Message used by both backends when the wall clock runs out.
pub(crate) fn timeout_message(limits: &BackendLimits, stderr: &str) -> String {
    let mut message = format!(
        "Execution timed out after {} seconds",
        limits.wall_clock_timeout.as_secs()
    );
    if !stderr.trim().is_empty() {
        message.push('\n');
        message.push_str(stderr);
    }
    message
}

/// Message for a non-zero exit; the program's own stderr when it wrote any.
pub(crate) fn exit_message(code: i64, stderr: String) -> String {
    if stderr.trim().is_empty() {
        format!("Process exited with code {}", code)
    } else {
        stderr
    }
}

#[async_trait]
pub trait Executor: Send + Sync {
    fn mode(&self) -> ExecutionMode;

    async fn run(
        &self,
        profile: &RuntimeProfile,
        source: &str,
        limits: &BackendLimits,
    ) -> Result<ExecutionResult, InfrastructureFault>;
}
