//! Result and error classification
//!
//! Every failed `ExecutionResult` leaves the sandbox with exactly one
//! `ErrorKind`, whichever backend produced it. Backends may pre-set a kind for
//! facts only they can observe (a timer firing, the daemon's OOM flag); the
//! rest is inferred here from the exit code and stderr text.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::executors::ExecutionResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The submitted program itself failed.
    UserRuntimeError,
    /// The program exceeded its wall-clock budget and was killed.
    Timeout,
    /// The program was killed for exceeding memory or CPU limits.
    ResourceLimitExceeded,
    /// No backend could run the program at all.
    InfrastructureUnavailable,
    /// The request named a language that is not supported; it ran as python.
    UnsupportedLanguage,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::UserRuntimeError => "user_runtime_error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ResourceLimitExceeded => "resource_limit_exceeded",
            ErrorKind::InfrastructureUnavailable => "infrastructure_unavailable",
            ErrorKind::UnsupportedLanguage => "unsupported_language",
        };
        f.write_str(name)
    }
}

/// 128 + SIGKILL, what the kernel OOM killer leaves behind.
const EXIT_SIGKILL: i64 = 137;
const MEMORY_PATTERNS: [&str; 5] = [
    "memoryerror",
    "heap out of memory",
    "cannot allocate memory",
    "out of memory",
    "memory allocation of",
];

/// What is known about a failure when classifying it.
#[derive(Debug, Clone, Default)]
pub struct Signals<'a> {
    pub reported: Option<ErrorKind>,
    pub exit_code: Option<i64>,
    pub error_text: &'a str,
    pub language_fell_back: bool,
}

pub fn classify(signals: &Signals<'_>) -> ErrorKind {
    // Timeout is never inferred: only the backend's own timer reports it.
    if let Some(kind) = signals.reported {
        return kind;
    }

    let text = signals.error_text.to_lowercase();

    if signals.exit_code == Some(EXIT_SIGKILL) || MEMORY_PATTERNS.iter().any(|p| text.contains(p)) {
        return ErrorKind::ResourceLimitExceeded;
    }

    if signals.language_fell_back {
        return ErrorKind::UnsupportedLanguage;
    }

    ErrorKind::UserRuntimeError
}

/// Apply classification and the result invariants in one place.
pub fn finalize(mut result: ExecutionResult, language_fell_back: bool) -> ExecutionResult {
    if result.success {
        result.error = None;
        result.error_kind = None;
        return result;
    }

    let kind = classify(&Signals {
        reported: result.error_kind,
        exit_code: result.exit_code,
        error_text: result.error.as_deref().unwrap_or_default(),
        language_fell_back,
    });
    result.error_kind = Some(kind);

    if result.error.as_deref().map_or(true, |e| e.trim().is_empty()) {
        result.error = Some(match result.exit_code {
            Some(code) => format!("Execution failed ({}, exit code {})", kind, code),
            None => format!("Execution failed ({})", kind),
        });
    }

    result
}
