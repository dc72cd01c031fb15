//! Configuration for the execution service
//!
//! Defaults are resolved once at process start (file, then environment) and
//! then shared read-only for the lifetime of the process.

pub mod loader;
pub mod types;

pub use loader::*;
pub use types::*;

#[cfg(test)]
mod tests;

use crate::errors::SandboxError;
use std::path::Path;

/// Load a configuration from a YAML file, with environment overrides applied
pub async fn load_config<P: AsRef<Path>>(path: P) -> Result<SandboxConfig, SandboxError> {
    ConfigLoader::load(Some(path.as_ref())).await
}
