//! Sandboxed multi-language code execution.
//!
//! This crate runs untrusted source text to completion (or timeout) and hands
//! back one structured `ExecutionResult` per call. The container backend is
//! the primary path; when the container runtime itself is missing, the call is
//! retried once on the host and the result says so.
//!
//! # Architecture Overview
//!
//! - **Language resolution**: language names and filenames to runtime profiles
//! - **Resource governance**: memory/CPU/timeout knobs to backend units
//! - **Execution backends**: Docker containers and local subprocesses behind one trait
//! - **Degradation control**: backend order and the single fallback per call
//! - **Classification**: one error taxonomy regardless of backend
//! - **Configuration**: YAML file plus environment overrides, read once at startup

pub mod classifier;
pub mod config;
pub mod errors;
pub mod executors;
pub mod language;
pub mod limits;
pub mod sandbox;

pub use classifier::ErrorKind;
pub use config::*;
pub use errors::{InfrastructureFault, LimitsError, SandboxError};
pub use executors::{ExecutionMode, ExecutionRequest, ExecutionResult, Executor};
pub use language::{Language, LanguageResolver, RuntimeProfile};
pub use limits::{BackendLimits, ResourceGovernor};
pub use sandbox::Sandbox;
