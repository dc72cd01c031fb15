//! Degradation controller
//!
//! `Sandbox::execute` is the single entry point. Each call walks a two-state
//! machine: it starts in `Primary` (the container backend) and moves to
//! `Degraded` (the local backend) at most once, and only when the primary
//! reports an `InfrastructureFault`. A failing user program never moves it.
//! There is no way back to `Primary` within a call, and nothing about a
//! previous call's outcome influences the next one.

use std::sync::Arc;
use std::time::Instant;

use crate::classifier::{self, ErrorKind};
use crate::config::types::SandboxConfig;
use crate::errors::{InfrastructureFault, SandboxError};
use crate::executors::{DockerExecutor, ExecutionRequest, ExecutionResult, Executor, LocalExecutor};
use crate::language::LanguageResolver;
use crate::limits::ResourceGovernor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Primary,
    Degraded,
}

pub struct Sandbox {
    config: Arc<SandboxConfig>,
    resolver: LanguageResolver,
    governor: ResourceGovernor,
    primary: Option<Arc<dyn Executor>>,
    fallback: Arc<dyn Executor>,
}

impl Sandbox {
    /// Build a sandbox with the docker primary and the local fallback.
    pub fn new(config: SandboxConfig) -> Result<Self, SandboxError> {
        let primary: Option<Arc<dyn Executor>> = if config.local_only {
            None
        } else {
            Some(Arc::new(DockerExecutor::new(&config)))
        };
        let fallback: Arc<dyn Executor> = Arc::new(LocalExecutor::new(&config));
        Self::with_executors(config, primary, fallback)
    }

    /// Build a sandbox around arbitrary backends. `primary = None` runs everything
    /// on the fallback without a degradation notice.
    pub fn with_executors(
        config: SandboxConfig,
        primary: Option<Arc<dyn Executor>>,
        fallback: Arc<dyn Executor>,
    ) -> Result<Self, SandboxError> {
        config.validate()?;
        let governor = ResourceGovernor::new(&config.defaults)?;
        let resolver = LanguageResolver::new(&config.images);

        if primary.is_none() {
            log::info!("Container backend disabled, all executions run locally");
        }

        Ok(Self {
            config: Arc::new(config),
            resolver,
            governor,
            primary,
            fallback,
        })
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn resolver(&self) -> &LanguageResolver {
        &self.resolver
    }

    /// Check whether the configured container runtime answers right now.
    pub async fn probe_container_runtime(&self) -> Result<(), InfrastructureFault> {
        DockerExecutor::new(&self.config).probe().await.map(|_| ())
    }

    pub async fn execute(&self, request: ExecutionRequest) -> ExecutionResult {
        let started = Instant::now();
        let resolution = self
            .resolver
            .resolve(&request.language, request.filename.as_deref());
        let profile = &resolution.profile;
        let governed = self.governor.build_limits(&request);
        let limits = &governed.limits;

        let mut warnings = governed.warnings;
        if resolution.fell_back {
            warnings.push(format!(
                "unsupported language '{}', executed as {}",
                resolution.requested, profile.language
            ));
        }

        log::debug!(
            "Executing {} source ({} bytes): memory={}B cpu_quota={}/{} timeout={:?}",
            profile.language,
            request.source_text.len(),
            limits.memory_bytes,
            limits.cpu_quota,
            limits.cpu_period,
            limits.wall_clock_timeout
        );

        let mut state = match self.primary {
            Some(_) => State::Primary,
            None => State::Degraded,
        };

        let mut result = loop {
            match (state, &self.primary) {
                (State::Primary, Some(primary)) => {
                    match primary.run(profile, &request.source_text, limits).await {
                        Ok(result) => break result,
                        Err(fault) => {
                            log::warn!("{}. Falling back to local execution", fault);
                            warnings.push(format!(
                                "{}; fell back to local execution ({})",
                                fault.cause(),
                                fault
                            ));
                            state = State::Degraded;
                        }
                    }
                }
                _ => match self.fallback.run(profile, &request.source_text, limits).await {
                    Ok(result) => break result,
                    Err(fault) => {
                        log::error!("Fallback backend unavailable: {}", fault);
                        break ExecutionResult::failed(
                            self.fallback.mode(),
                            profile.language,
                            fault.to_string(),
                        )
                        .with_kind(ErrorKind::InfrastructureUnavailable);
                    }
                },
            }
        };

        warnings.append(&mut result.warnings);
        result.warnings = warnings;
        let mut result =
            classifier::finalize(result, resolution.fell_back).with_duration(started.elapsed());
        result.language = profile.language;

        match &result.error_kind {
            None => log::info!(
                "Executed {} in {} mode in {}ms",
                result.language,
                result.execution_mode,
                result.duration_ms
            ),
            Some(kind) => log::info!(
                "Executed {} in {} mode in {}ms: {}",
                result.language,
                result.execution_mode,
                result.duration_ms,
                kind
            ),
        }

        result
    }
}
