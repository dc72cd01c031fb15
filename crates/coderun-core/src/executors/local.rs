//! Local subprocess backend
//!
//! Runs the interpreter directly on the host. Only the wall-clock timeout is
//! enforced here; memory, CPU and network limits are not, and every result
//! says so in its warnings.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use which::which;

use super::{exit_message, scratch, timeout_message, ExecutionMode, ExecutionResult, Executor};
use crate::classifier::ErrorKind;
use crate::config::types::SandboxConfig;
use crate::errors::InfrastructureFault;
use crate::language::RuntimeProfile;
use crate::limits::BackendLimits;

pub const REDUCED_ISOLATION_WARNING: &str =
    "local execution: memory, CPU and network limits are not enforced";

/// How long to keep draining pipes after the interpreter is gone.
const PIPE_DRAIN_GRACE: Duration = Duration::from_secs(1);

type SharedBuffer = Arc<Mutex<Vec<u8>>>;

pub struct LocalExecutor {
    scratch_root: PathBuf,
}

impl LocalExecutor {
    pub fn new(config: &SandboxConfig) -> Self {
        Self {
            scratch_root: config.scratch_dir.clone(),
        }
    }

    /// First of the profile's host programs found on `PATH`.
    fn find_program(profile: &RuntimeProfile) -> Option<PathBuf> {
        profile
            .local_programs
            .iter()
            .find_map(|program| which(program).ok())
    }

    /// First toolchain binary the command needs that is not on `PATH`.
    fn missing_toolchain(profile: &RuntimeProfile) -> Option<&str> {
        profile
            .local_toolchain
            .iter()
            .find(|tool| which(tool.as_str()).is_err())
            .map(String::as_str)
    }

    fn missing_interpreter(profile: &RuntimeProfile, tried: &[String], detail: &str) -> ExecutionResult {
        ExecutionResult::failed(
            ExecutionMode::Local,
            profile.language,
            format!(
                "No {} interpreter available on this host (tried {}): {}",
                profile.language,
                tried.join(", "),
                detail
            ),
        )
        .with_kind(ErrorKind::InfrastructureUnavailable)
    }

    async fn execute(
        &self,
        profile: &RuntimeProfile,
        source: &str,
        limits: &BackendLimits,
    ) -> ExecutionResult {
        let language = profile.language;

        let program = match Self::find_program(profile) {
            Some(program) => program,
            None => {
                return Self::missing_interpreter(profile, &profile.local_programs, "not found on PATH")
            }
        };
        if let Some(tool) = Self::missing_toolchain(profile) {
            let detail = format!("{} not found on PATH", tool);
            return Self::missing_interpreter(profile, &profile.local_toolchain, &detail);
        }

        let scratch = match scratch::materialize(&self.scratch_root, profile, source).await {
            Ok(dir) => dir,
            Err(e) => {
                return ExecutionResult::failed(
                    ExecutionMode::Local,
                    language,
                    format!("Local execution error: could not prepare scratch directory: {}", e),
                )
                .with_kind(ErrorKind::InfrastructureUnavailable)
            }
        };

        let mut cmd = Command::new(&program);
        cmd.args(profile.interpreter_command.iter().skip(1))
            .current_dir(scratch.path())
            .env("PYTHONDONTWRITEBYTECODE", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        log::debug!("Spawning {} in {}", program.display(), scratch.path().display());
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Self::missing_interpreter(profile, &profile.local_programs, &e.to_string())
            }
            Err(e) => {
                return ExecutionResult::failed(
                    ExecutionMode::Local,
                    language,
                    format!("Local execution error: {}", e),
                )
            }
        };

        let (stdout_buf, stdout_task) = drain(child.stdout.take());
        let (stderr_buf, stderr_task) = drain(child.stderr.take());

        let waited = tokio::time::timeout(limits.wall_clock_timeout, child.wait()).await;
        let (status, timed_out) = match waited {
            Ok(Ok(status)) => (Some(status), false),
            Ok(Err(e)) => {
                log::warn!("Failed waiting on local interpreter: {}", e);
                if let Err(e) = child.kill().await {
                    log::warn!("Failed to kill local interpreter: {}", e);
                }
                (None, false)
            }
            Err(_) => {
                log::warn!(
                    "Local execution timed out after {:?}, killing pid {:?}",
                    limits.wall_clock_timeout,
                    child.id()
                );
                if let Err(e) = child.kill().await {
                    log::warn!("Failed to kill local interpreter: {}", e);
                }
                (None, true)
            }
        };

        let stdout = finish(stdout_buf, stdout_task).await;
        let stderr = finish(stderr_buf, stderr_task).await;
        drop(scratch);

        if timed_out {
            return ExecutionResult::failed(ExecutionMode::Local, language, timeout_message(limits, &stderr))
                .with_output(stdout)
                .with_kind(ErrorKind::Timeout);
        }

        match status.map(exit_code) {
            Some(0) => ExecutionResult::succeeded(ExecutionMode::Local, language, stdout),
            Some(code) => ExecutionResult::failed(ExecutionMode::Local, language, exit_message(code, stderr))
                .with_output(stdout)
                .with_exit_code(code),
            None => ExecutionResult::failed(ExecutionMode::Local, language, stderr).with_output(stdout),
        }
    }
}

#[async_trait]
impl Executor for LocalExecutor {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Local
    }

    async fn run(
        &self,
        profile: &RuntimeProfile,
        source: &str,
        limits: &BackendLimits,
    ) -> Result<ExecutionResult, InfrastructureFault> {
        let started = Instant::now();
        let mut result = self.execute(profile, source, limits).await;
        result.warnings.push(REDUCED_ISOLATION_WARNING.to_string());
        Ok(result.with_duration(started.elapsed()))
    }
}

/// Exit code, with signal deaths reported shell-style as 128 + signal.
fn exit_code(status: ExitStatus) -> i64 {
    if let Some(code) = status.code() {
        return code as i64;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal as i64;
        }
    }
    -1
}

/// Read a pipe into a shared buffer so partial output survives a kill.
fn drain<R>(pipe: Option<R>) -> (SharedBuffer, Option<JoinHandle<()>>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let buffer: SharedBuffer = Arc::new(Mutex::new(Vec::new()));
    let task = pipe.map(|mut pipe| {
        let buffer = Arc::clone(&buffer);
        tokio::spawn(async move {
            let mut chunk = [0u8; 8192];
            loop {
                match pipe.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if let Ok(mut buf) = buffer.lock() {
                            buf.extend_from_slice(&chunk[..n]);
                        }
                    }
                }
            }
        })
    });
    (buffer, task)
}

async fn finish(buffer: SharedBuffer, task: Option<JoinHandle<()>>) -> String {
    if let Some(mut task) = task {
        // A surviving grandchild can hold the pipe open; stop waiting after the grace.
        if tokio::time::timeout(PIPE_DRAIN_GRACE, &mut task).await.is_err() {
            task.abort();
        }
    }
    let bytes = buffer.lock().map(|buf| buf.clone()).unwrap_or_default();
    String::from_utf8_lossy(&bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executors::ExecutionRequest;
    use crate::language::{Language, LanguageResolver};
    use crate::limits::ResourceGovernor;

    fn executor(root: &std::path::Path) -> LocalExecutor {
        LocalExecutor::new(&SandboxConfig {
            scratch_dir: root.to_path_buf(),
            ..SandboxConfig::default()
        })
    }

    fn limits(timeout: u64) -> BackendLimits {
        ResourceGovernor::new(&SandboxConfig::default().defaults)
            .unwrap()
            .build_limits(&ExecutionRequest::new("", "python").with_timeout(timeout))
            .limits
    }

    fn python() -> Option<RuntimeProfile> {
        let profile = LanguageResolver::default().profile(Language::Python).clone();
        if LocalExecutor::find_program(&profile).is_none() {
            eprintln!("skipping: no python interpreter on PATH");
            return None;
        }
        Some(profile)
    }

    #[tokio::test]
    async fn test_local_success_captures_stdout() {
        let Some(profile) = python() else { return };
        let root = tempfile::tempdir().unwrap();

        let result = executor(root.path())
            .run(&profile, "print('Hello, world!')", &limits(10))
            .await
            .unwrap();
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.output, "Hello, world!\n");
        assert_eq!(result.execution_mode, ExecutionMode::Local);
        assert_eq!(result.exit_code, Some(0));
        assert!(result.warnings.iter().any(|w| w == REDUCED_ISOLATION_WARNING));
    }

    #[tokio::test]
    async fn test_local_failure_keeps_stderr_out_of_output() {
        let Some(profile) = python() else { return };
        let root = tempfile::tempdir().unwrap();

        let source = "print('partial')\nprint(undefined_variable)";
        let result = executor(root.path()).run(&profile, source, &limits(10)).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.exit_code, Some(1));
        assert_eq!(result.output, "partial\n");
        let error = result.error.unwrap();
        assert!(error.contains("NameError: name 'undefined_variable' is not defined"));
        assert!(!result.output.contains("NameError"));
    }

    #[tokio::test]
    async fn test_local_timeout_is_bounded() {
        let Some(profile) = python() else { return };
        let root = tempfile::tempdir().unwrap();

        let source = "import sys, time\nprint('started')\nsys.stdout.flush()\ntime.sleep(100)";
        let started = Instant::now();
        let result = executor(root.path()).run(&profile, source, &limits(1)).await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(8));
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::Timeout));
        assert_eq!(result.output, "started\n");
        assert!(result.error.unwrap().contains("timed out after 1 seconds"));
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_a_result_not_a_fault() {
        let root = tempfile::tempdir().unwrap();
        let mut profile = LanguageResolver::default().profile(Language::Python).clone();
        profile.local_programs = vec!["coderun-no-such-interpreter".to_string()];

        let result = executor(root.path()).run(&profile, "print(1)", &limits(5)).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::InfrastructureUnavailable));
        assert!(result.error.unwrap().contains("coderun-no-such-interpreter"));
    }

    #[tokio::test]
    async fn test_missing_toolchain_is_infrastructure_unavailable() {
        let root = tempfile::tempdir().unwrap();
        let mut profile = LanguageResolver::default().profile(Language::Go).clone();
        if LocalExecutor::find_program(&profile).is_none() {
            eprintln!("skipping: no sh on PATH");
            return;
        }
        profile.local_toolchain = vec!["coderun-no-such-toolchain".to_string()];

        let source = "package main\nfunc main() {}";
        let result = executor(root.path()).run(&profile, source, &limits(5)).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::InfrastructureUnavailable));
        assert_eq!(result.exit_code, None);
        assert!(result.error.unwrap().contains("coderun-no-such-toolchain not found"));
        assert!(result.warnings.iter().any(|w| w == REDUCED_ISOLATION_WARNING));
        // Rejected before anything was written.
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_scratch_directory_removed_after_run() {
        let Some(profile) = python() else { return };
        let root = tempfile::tempdir().unwrap();

        executor(root.path()).run(&profile, "print(1)", &limits(10)).await.unwrap();
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }
}
