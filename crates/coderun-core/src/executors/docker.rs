// src/executors/docker.rs
use async_trait::async_trait;
use bollard::container::LogOutput;
use bollard::errors::Error as BollardError;
use bollard::models::{ContainerCreateBody, HostConfig};
use bollard::query_parameters::{
    CreateContainerOptions as BollardCreateContainerOptionsQuery,
    CreateImageOptions as BollardCreateImageOptionsQuery,
    InspectContainerOptions as BollardInspectContainerOptionsQuery,
    KillContainerOptions as BollardKillContainerOptionsQuery,
    LogsOptions as BollardLogsOptionsQuery,
    RemoveContainerOptions as BollardRemoveContainerOptionsQuery,
    StartContainerOptions as BollardStartContainerOptionsQuery,
    WaitContainerOptions as BollardWaitContainerOptionsQuery,
};
use bollard::{Docker, API_DEFAULT_VERSION};
use futures_util::stream::StreamExt;
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use uuid::Uuid;

use super::{exit_message, scratch, timeout_message, ExecutionMode, ExecutionResult, Executor};
use crate::classifier::ErrorKind;
use crate::config::types::SandboxConfig;
use crate::errors::InfrastructureFault;
use crate::language::{Language, RuntimeProfile};
use crate::limits::BackendLimits;

const CONTAINER_WORK_DIR: &str = "/workspace";
const CONNECT_TIMEOUT_SECS: u64 = 120;
/// Upper bound for each daemon call made outside the program's own wall clock.
const DAEMON_STEP_TIMEOUT: Duration = Duration::from_secs(30);
const IMAGE_PULL_TIMEOUT: Duration = Duration::from_secs(300);

/// Runs each request in a fresh, network-less container.
///
/// No client or availability state is kept between calls: every `run`
/// connects and pings the daemon again.
pub struct DockerExecutor {
    host: Option<String>,
    scratch_root: PathBuf,
    auto_pull: bool,
}

impl DockerExecutor {
    pub fn new(config: &SandboxConfig) -> Self {
        // The daemon resolves bind sources on its side, so they must be absolute.
        let scratch_root = std::path::absolute(&config.scratch_dir)
            .unwrap_or_else(|_| config.scratch_dir.clone());
        Self {
            host: config.docker.host.clone(),
            scratch_root,
            auto_pull: config.docker.auto_pull,
        }
    }

    /// Point at a specific daemon address instead of the configured one.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    fn connect(&self) -> Result<Docker, InfrastructureFault> {
        let connected = match self.host.as_deref() {
            None => Docker::connect_with_local_defaults(),
            Some(host) if host.starts_with("tcp://") || host.starts_with("http://") => {
                Docker::connect_with_http(host, CONNECT_TIMEOUT_SECS, API_DEFAULT_VERSION)
            }
            Some(host) => Docker::connect_with_unix(host, CONNECT_TIMEOUT_SECS, API_DEFAULT_VERSION),
        };
        connected.map_err(|e| InfrastructureFault::RuntimeUnavailable(e.to_string()))
    }

    /// Connect and ping the daemon.
    pub async fn probe(&self) -> Result<Docker, InfrastructureFault> {
        let docker = self.connect()?;
        docker
            .ping()
            .await
            .map_err(|e| InfrastructureFault::RuntimeUnavailable(e.to_string()))?;
        Ok(docker)
    }

    async fn ensure_image(&self, docker: &Docker, image: &str) -> Result<(), InfrastructureFault> {
        match docker.inspect_image(image).await {
            Ok(_) => return Ok(()),
            Err(e) if is_not_found(&e) => {}
            Err(e) => return Err(InfrastructureFault::RuntimeUnresponsive(e.to_string())),
        }

        if !self.auto_pull {
            return Err(InfrastructureFault::ImageMissing {
                image: image.to_string(),
            });
        }

        log::info!("Pulling missing image {}", image);
        let pull = async {
            let pull_options = Some(BollardCreateImageOptionsQuery {
                from_image: Some(image.to_string()),
                ..Default::default()
            });
            let mut pull_stream = docker.create_image(pull_options, None, None);
            while let Some(progress) = pull_stream.next().await {
                if let Err(e) = progress {
                    log::warn!("Failed to pull image {}: {}", image, e);
                    return Err(InfrastructureFault::ImageMissing {
                        image: image.to_string(),
                    });
                }
            }
            Ok(())
        };
        bounded("image pull", IMAGE_PULL_TIMEOUT, pull).await
    }
}

#[async_trait]
impl Executor for DockerExecutor {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Container
    }

    async fn run(
        &self,
        profile: &RuntimeProfile,
        source: &str,
        limits: &BackendLimits,
    ) -> Result<ExecutionResult, InfrastructureFault> {
        let docker = self.probe().await?;
        self.ensure_image(&docker, &profile.image).await?;
        let scratch = scratch::materialize(&self.scratch_root, profile, source).await?;

        let job = ContainerJob {
            docker,
            profile: profile.clone(),
            limits: limits.clone(),
            scratch,
            name: format!("coderun-{}", Uuid::new_v4()),
        };

        // The job owns the container and scratch dir; running it on its own task
        // means a caller that stops polling cannot cancel the kill and removal.
        tokio::spawn(job.run())
            .await
            .map_err(|e| InfrastructureFault::RuntimeUnresponsive(format!("container task aborted: {}", e)))?
    }
}

/// One container's lifecycle: create, start, wait or kill, collect, remove.
struct ContainerJob {
    docker: Docker,
    profile: RuntimeProfile,
    limits: BackendLimits,
    scratch: TempDir,
    name: String,
}

/// What the container left behind once it stopped.
struct Finished {
    stdout: String,
    stderr: String,
    exit_code: Option<i64>,
    timed_out: bool,
    oom_killed: bool,
}

impl ContainerJob {
    async fn run(self) -> Result<ExecutionResult, InfrastructureFault> {
        let started = Instant::now();
        let container_id = self.create().await?;

        let outcome = self.drive(&container_id).await;
        self.remove(&container_id).await;

        let finished = outcome?;
        Ok(shape(self.profile.language, &self.limits, finished).with_duration(started.elapsed()))
    }

    async fn create(&self) -> Result<String, InfrastructureFault> {
        let host_dir = self
            .scratch
            .path()
            .to_str()
            .ok_or_else(|| {
                InfrastructureFault::ScratchUnavailable(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "scratch path is not valid UTF-8",
                ))
            })?
            .to_string();

        let options = Some(BollardCreateContainerOptionsQuery {
            name: Some(self.name.clone()),
            ..Default::default()
        });

        let labels = HashMap::from([
            ("coderun.managed".to_string(), "true".to_string()),
            ("coderun.language".to_string(), self.profile.language.to_string()),
        ]);

        let config = ContainerCreateBody {
            image: Some(self.profile.image.clone()),
            cmd: Some(self.profile.interpreter_command.clone()),
            working_dir: Some(CONTAINER_WORK_DIR.to_string()),
            network_disabled: Some(self.limits.network_isolated),
            labels: Some(labels),
            host_config: Some(HostConfig {
                binds: Some(vec![format!("{}:{}", host_dir, CONTAINER_WORK_DIR)]),
                memory: Some(self.limits.memory_bytes),
                memory_swap: Some(self.limits.memory_bytes),
                cpu_period: Some(self.limits.cpu_period),
                cpu_quota: Some(self.limits.cpu_quota),
                pids_limit: Some(self.limits.pids_limit),
                network_mode: Some("none".to_string()),
                auto_remove: Some(false),
                ..Default::default()
            }),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let create = async {
            self.docker
                .create_container(options, config)
                .await
                .map_err(|e| {
                    if is_not_found(&e) {
                        InfrastructureFault::ImageMissing {
                            image: self.profile.image.clone(),
                        }
                    } else {
                        e.into()
                    }
                })
        };
        let container = bounded("container creation", DAEMON_STEP_TIMEOUT, create).await?;
        log::debug!("Created container {} ({})", self.name, container.id);
        Ok(container.id)
    }

    async fn drive(&self, container_id: &str) -> Result<Finished, InfrastructureFault> {
        let start = async {
            self.docker
                .start_container(container_id, None::<BollardStartContainerOptionsQuery>)
                .await
                .map_err(InfrastructureFault::from)
        };
        bounded("container start", DAEMON_STEP_TIMEOUT, start).await?;

        let mut wait_stream = self
            .docker
            .wait_container(container_id, None::<BollardWaitContainerOptionsQuery>);
        let timeout_future = tokio::time::sleep(self.limits.wall_clock_timeout);

        let (exit_code, timed_out) = tokio::select! {
            res = wait_stream.next() => match res {
                Some(Ok(response)) => (Some(response.status_code), false),
                // Non-zero exits surface as a wait error carrying the code.
                Some(Err(BollardError::DockerContainerWaitError { code, .. })) => (Some(code), false),
                Some(Err(e)) => return Err(InfrastructureFault::RuntimeUnresponsive(e.to_string())),
                None => (None, false),
            },
            _ = timeout_future => {
                log::warn!(
                    "Execution timed out for container {} after {:?}",
                    self.name,
                    self.limits.wall_clock_timeout
                );
                let kill = self
                    .docker
                    .kill_container(container_id, None::<BollardKillContainerOptionsQuery>);
                match tokio::time::timeout(DAEMON_STEP_TIMEOUT, kill).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => log::warn!("Failed to kill container {}: {}", self.name, e),
                    Err(_) => log::warn!(
                        "Kill of container {} did not complete in {:?}",
                        self.name,
                        DAEMON_STEP_TIMEOUT
                    ),
                }
                (None, true)
            }
        };

        let (stdout, stderr) =
            bounded("log collection", DAEMON_STEP_TIMEOUT, self.collect_logs(container_id)).await?;

        let inspect = async {
            Ok(self
                .docker
                .inspect_container(container_id, None::<BollardInspectContainerOptionsQuery>)
                .await
                .ok()
                .and_then(|info| info.state))
        };
        let state = bounded("container inspection", DAEMON_STEP_TIMEOUT, inspect).await?;
        let oom_killed = state.as_ref().and_then(|s| s.oom_killed).unwrap_or(false);
        let exit_code = exit_code.or_else(|| state.as_ref().and_then(|s| s.exit_code));

        Ok(Finished {
            stdout,
            stderr,
            exit_code,
            timed_out,
            oom_killed,
        })
    }

    async fn collect_logs(&self, container_id: &str) -> Result<(String, String), InfrastructureFault> {
        let mut output_stream = self.docker.logs(
            container_id,
            Some(BollardLogsOptionsQuery {
                stdout: true,
                stderr: true,
                ..Default::default()
            }),
        );

        // Decode once at the end so multi-byte characters split across frames survive.
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        while let Some(log_result) = output_stream.next().await {
            match log_result {
                Ok(LogOutput::StdOut { message }) => stdout.extend_from_slice(&message),
                Ok(LogOutput::StdErr { message }) => stderr.extend_from_slice(&message),
                Ok(_) => {}
                Err(e) => return Err(InfrastructureFault::RuntimeUnresponsive(e.to_string())),
            }
        }

        Ok((
            String::from_utf8_lossy(&stdout).into_owned(),
            String::from_utf8_lossy(&stderr).into_owned(),
        ))
    }

    async fn remove(&self, container_id: &str) {
        let options = Some(BollardRemoveContainerOptionsQuery {
            force: true,
            ..Default::default()
        });
        let removal = self.docker.remove_container(container_id, options);
        match tokio::time::timeout(DAEMON_STEP_TIMEOUT, removal).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::warn!("Failed to remove container {}: {}", self.name, e),
            Err(_) => log::warn!(
                "Removal of container {} did not complete in {:?}",
                self.name,
                DAEMON_STEP_TIMEOUT
            ),
        }
    }
}

/// Run one daemon step under a deadline; overrunning it means the daemon stopped answering.
async fn bounded<T, F>(step: &str, deadline: Duration, fut: F) -> Result<T, InfrastructureFault>
where
    F: Future<Output = Result<T, InfrastructureFault>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(outcome) => outcome,
        Err(_) => Err(InfrastructureFault::RuntimeUnresponsive(format!(
            "{} did not complete within {:?}",
            step, deadline
        ))),
    }
}

/// Map what a stopped container left behind onto a result.
fn shape(language: Language, limits: &BackendLimits, finished: Finished) -> ExecutionResult {
    let mode = ExecutionMode::Container;

    if finished.timed_out {
        return ExecutionResult::failed(mode, language, timeout_message(limits, &finished.stderr))
            .with_output(finished.stdout)
            .with_kind(ErrorKind::Timeout);
    }

    if finished.oom_killed {
        let mut message = format!(
            "Container exceeded its memory limit of {} bytes",
            limits.memory_bytes
        );
        if !finished.stderr.trim().is_empty() {
            message.push('\n');
            message.push_str(&finished.stderr);
        }
        let result = ExecutionResult::failed(mode, language, message)
            .with_output(finished.stdout)
            .with_kind(ErrorKind::ResourceLimitExceeded);
        return match finished.exit_code {
            Some(code) => result.with_exit_code(code),
            None => result,
        };
    }

    match finished.exit_code {
        Some(0) => ExecutionResult::succeeded(mode, language, finished.stdout),
        Some(code) => ExecutionResult::failed(mode, language, exit_message(code, finished.stderr))
            .with_output(finished.stdout)
            .with_exit_code(code),
        None => ExecutionResult::failed(mode, language, exit_message(-1, finished.stderr))
            .with_output(finished.stdout),
    }
}

fn is_not_found(err: &BollardError) -> bool {
    matches!(
        err,
        BollardError::DockerResponseServerError { status_code: 404, .. }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executors::ExecutionRequest;
    use crate::language::LanguageResolver;
    use crate::limits::ResourceGovernor;

    fn limits(timeout: u64) -> BackendLimits {
        let config = SandboxConfig::default();
        ResourceGovernor::new(&config.defaults)
            .unwrap()
            .build_limits(&ExecutionRequest::new("", "python").with_timeout(timeout))
            .limits
    }

    #[tokio::test]
    async fn test_unreachable_daemon_is_infrastructure_fault() {
        let scratch = tempfile::tempdir().unwrap();
        let config = SandboxConfig {
            scratch_dir: scratch.path().to_path_buf(),
            ..SandboxConfig::default()
        };
        let executor = DockerExecutor::new(&config).with_host("/nonexistent/coderun/docker.sock");
        let profile = LanguageResolver::default().profile(Language::Python).clone();

        let result = executor.run(&profile, "print('hi')", &limits(5)).await;
        assert!(matches!(result, Err(InfrastructureFault::RuntimeUnavailable(_))));
        // Nothing was materialized before the probe failed.
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    fn finished(stdout: &str, stderr: &str, exit_code: Option<i64>) -> Finished {
        Finished {
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            exit_code,
            timed_out: false,
            oom_killed: false,
        }
    }

    #[test]
    fn test_shape_clean_exit() {
        let result = shape(Language::Python, &limits(5), finished("Hello, world!\n", "", Some(0)));
        assert!(result.success);
        assert_eq!(result.output, "Hello, world!\n");
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.execution_mode, ExecutionMode::Container);
        assert!(result.error.is_none());
    }

    #[test]
    fn test_shape_nonzero_exit_keeps_streams_apart() {
        let stderr = "NameError: name 'undefined_variable' is not defined\n";
        let result = shape(Language::Python, &limits(5), finished("partial\n", stderr, Some(1)));
        assert!(!result.success);
        assert_eq!(result.exit_code, Some(1));
        assert_eq!(result.output, "partial\n");
        assert_eq!(result.error.as_deref(), Some(stderr));
        assert!(result.error_kind.is_none());
    }

    #[test]
    fn test_shape_nonzero_exit_without_stderr() {
        let result = shape(Language::Javascript, &limits(5), finished("", "", Some(3)));
        assert_eq!(result.error.as_deref(), Some("Process exited with code 3"));
        assert_eq!(result.language, Language::Javascript);
    }

    #[test]
    fn test_shape_oom_killed() {
        let mut outcome = finished("allocating\n", "Killed\n", Some(137));
        outcome.oom_killed = true;
        let limits = limits(5);

        let result = shape(Language::Python, &limits, outcome);
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::ResourceLimitExceeded));
        assert_eq!(result.output, "allocating\n");
        assert_eq!(result.exit_code, Some(137));
        let error = result.error.unwrap();
        assert!(error.contains(&limits.memory_bytes.to_string()));
        assert!(error.contains("Killed"));
    }

    #[test]
    fn test_shape_timeout_wins_over_exit_code() {
        let mut outcome = finished("before\n", "", Some(137));
        outcome.timed_out = true;

        let result = shape(Language::Python, &limits(4), outcome);
        assert_eq!(result.error_kind, Some(ErrorKind::Timeout));
        assert_eq!(result.output, "before\n");
        assert_eq!(result.error.as_deref(), Some("Execution timed out after 4 seconds"));
        assert_eq!(result.exit_code, None);
    }

    #[test]
    fn test_shape_missing_exit_code_is_a_failure() {
        let result = shape(Language::Python, &limits(5), finished("out\n", "", None));
        assert!(!result.success);
        assert_eq!(result.exit_code, None);
        assert_eq!(result.output, "out\n");
        assert_eq!(result.error.as_deref(), Some("Process exited with code -1"));
    }

    #[tokio::test]
    async fn test_stalled_daemon_step_is_unresponsive() {
        let stalled = std::future::pending::<Result<(), InfrastructureFault>>();
        let started = Instant::now();

        let result = bounded("log collection", Duration::from_millis(50), stalled).await;
        assert!(started.elapsed() < Duration::from_secs(5));
        match result {
            Err(InfrastructureFault::RuntimeUnresponsive(msg)) => assert!(msg.contains("log collection")),
            other => panic!("expected RuntimeUnresponsive, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_bounded_step_passes_result_through() {
        let ok = async { Ok::<_, InfrastructureFault>(7) };
        assert_eq!(bounded("inspect", Duration::from_secs(5), ok).await.unwrap(), 7);

        let failed = async {
            Err::<(), _>(InfrastructureFault::ImageMissing {
                image: "python:3.10-slim".to_string(),
            })
        };
        assert!(matches!(
            bounded("pull", Duration::from_secs(5), failed).await,
            Err(InfrastructureFault::ImageMissing { .. })
        ));
    }

    #[test]
    fn test_relative_scratch_dir_becomes_absolute() {
        let config = SandboxConfig {
            scratch_dir: PathBuf::from("rel_scratch"),
            ..SandboxConfig::default()
        };
        let executor = DockerExecutor::new(&config);
        assert!(executor.scratch_root.is_absolute());
        assert!(executor.scratch_root.ends_with("rel_scratch"));
    }

    #[test]
    fn test_not_found_detection() {
        let err = BollardError::DockerResponseServerError {
            status_code: 404,
            message: "No such image: python:3.10-slim".to_string(),
        };
        assert!(is_not_found(&err));

        let err = BollardError::DockerResponseServerError {
            status_code: 500,
            message: "boom".to_string(),
        };
        assert!(!is_not_found(&err));
    }

    #[tokio::test]
    #[ignore] // Requires a running Docker daemon with python:3.10-slim pulled
    async fn test_container_hello_world() {
        let executor = DockerExecutor::new(&SandboxConfig::default());
        let profile = LanguageResolver::default().profile(Language::Python).clone();

        let result = executor
            .run(&profile, "print('Hello, world!')", &limits(30))
            .await
            .unwrap();
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.output, "Hello, world!\n");
        assert_eq!(result.execution_mode, ExecutionMode::Container);
    }

    #[tokio::test]
    #[ignore] // Requires a running Docker daemon with python:3.10-slim pulled
    async fn test_container_timeout_keeps_partial_output() {
        let executor = DockerExecutor::new(&SandboxConfig::default());
        let profile = LanguageResolver::default().profile(Language::Python).clone();
        let source = "print('before', flush=True)\nimport time\ntime.sleep(100)";

        let started = Instant::now();
        let result = executor.run(&profile, source, &limits(3)).await.unwrap();
        assert!(started.elapsed().as_secs() < 15);
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::Timeout));
        assert_eq!(result.output, "before\n");
    }
}
