use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use coderun_core::{config::ConfigLoader, ExecutionRequest, ExecutionResult, Sandbox};
use log::LevelFilter;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio::io::AsyncReadExt;

#[derive(Parser, Debug)]
#[clap(name = "coderun", author, version, about = "Run untrusted code in a sandbox")]
struct Cli {
    #[clap(subcommand)]
    command: Commands,

    #[clap(
        long,
        short,
        global = true,
        help = "YAML configuration file (defaults plus environment when omitted)"
    )]
    config: Option<PathBuf>,

    // Logs go to stderr; keep them quiet by default so they do not bury program output.
    #[clap(long, short, global = true, default_value = "warn")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Execute a source file
    Run {
        file: PathBuf,

        #[clap(long, help = "Language override; inferred from the file extension when omitted")]
        language: Option<String>,

        #[clap(flatten)]
        limits: LimitArgs,
    },
    /// Execute inline source text
    Exec {
        #[clap(long, help = "Source text, or '-' to read it from stdin")]
        code: String,

        #[clap(long, default_value = "python")]
        language: String,

        #[clap(flatten)]
        limits: LimitArgs,
    },
    /// Check whether the container runtime is reachable
    Probe,
    /// List supported languages and their runtime profiles
    Languages {
        #[clap(long, help = "Print the profile table as JSON")]
        json: bool,
    },
}

#[derive(Args, Debug, Clone, Default)]
struct LimitArgs {
    #[clap(long, help = "Memory limit, e.g. 128m or 1g")]
    memory: Option<String>,

    #[clap(long, help = "Fraction of one CPU, in (0, 1]")]
    cpu: Option<f64>,

    #[clap(long, help = "Wall-clock timeout in seconds")]
    timeout: Option<u64>,

    #[clap(long, help = "Print the full result as JSON")]
    json: bool,

    #[clap(long, help = "Skip the container backend and run on this host")]
    local_only: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let log_level_filter = cli.log_level.parse().unwrap_or(LevelFilter::Warn);
    env_logger::Builder::new()
        .filter_level(log_level_filter)
        .init();

    let mut config = ConfigLoader::load(cli.config.as_deref()).await?;

    match cli.command {
        Commands::Run {
            file,
            language,
            limits,
        } => {
            let source = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            config.local_only |= limits.local_only;
            let sandbox = Sandbox::new(config)?;
            let request = build_request(source, language.unwrap_or_default(), Some(file.as_path()), &limits);
            let result = sandbox.execute(request).await;
            report(&result, limits.json)
        }
        Commands::Exec {
            code,
            language,
            limits,
        } => {
            let source = read_source(code).await?;
            config.local_only |= limits.local_only;
            let sandbox = Sandbox::new(config)?;
            let request = build_request(source, language, None, &limits);
            let result = sandbox.execute(request).await;
            report(&result, limits.json)
        }
        Commands::Probe => {
            let sandbox = Sandbox::new(config)?;
            match sandbox.probe_container_runtime().await {
                Ok(()) => {
                    println!("container runtime: available");
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => {
                    println!("container runtime: unavailable ({})", e);
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Commands::Languages { json } => {
            let sandbox = Sandbox::new(config)?;
            let profiles = sandbox.resolver().profiles();
            if json {
                println!("{}", serde_json::to_string_pretty(profiles)?);
            } else {
                for profile in profiles {
                    println!(
                        "{:<12} {:<22} {}",
                        profile.language,
                        profile.image,
                        profile.interpreter_command.join(" ")
                    );
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn build_request(
    source: String,
    language: String,
    file: Option<&Path>,
    limits: &LimitArgs,
) -> ExecutionRequest {
    let mut request = ExecutionRequest::new(source, language);
    if let Some(name) = file.and_then(|f| f.file_name()).and_then(|n| n.to_str()) {
        request = request.with_filename(name);
    }
    if let Some(memory) = &limits.memory {
        request = request.with_memory_limit(memory.clone());
    }
    if let Some(cpu) = limits.cpu {
        request = request.with_cpu_share(cpu);
    }
    if let Some(timeout) = limits.timeout {
        request = request.with_timeout(timeout);
    }
    request
}

async fn read_source(code: String) -> Result<String> {
    if code != "-" {
        return Ok(code);
    }
    let mut source = String::new();
    tokio::io::stdin()
        .read_to_string(&mut source)
        .await
        .context("Failed to read source from stdin")?;
    Ok(source)
}

/// Print a result; program stdout goes to stdout, everything else to stderr.
fn report(result: &ExecutionResult, json: bool) -> Result<ExitCode> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
    } else {
        print!("{}", result.output);
        for warning in &result.warnings {
            eprintln!("warning: {}", warning);
        }
        if let Some(error) = &result.error {
            match result.error_kind {
                Some(kind) => eprintln!("error ({}): {}", kind, error.trim_end()),
                None => eprintln!("error: {}", error.trim_end()),
            }
        }
    }
    Ok(exit_code_for(result))
}

fn exit_code_for(result: &ExecutionResult) -> ExitCode {
    if result.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_parses_limits() {
        let cli = Cli::try_parse_from([
            "coderun", "run", "job.js", "--memory", "128m", "--cpu", "0.25", "--timeout", "5", "--json",
        ])
        .unwrap();

        match cli.command {
            Commands::Run {
                file,
                language,
                limits,
            } => {
                assert_eq!(file, PathBuf::from("job.js"));
                assert_eq!(language, None);
                assert_eq!(limits.memory.as_deref(), Some("128m"));
                assert_eq!(limits.cpu, Some(0.25));
                assert_eq!(limits.timeout, Some(5));
                assert!(limits.json);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "coderun", "exec", "--code", "print(1)", "--log-level", "debug", "--config", "c.yaml",
        ])
        .unwrap();
        assert_eq!(cli.log_level, "debug");
        assert_eq!(cli.config, Some(PathBuf::from("c.yaml")));
        match cli.command {
            Commands::Exec { language, .. } => assert_eq!(language, "python"),
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_build_request_uses_file_name_for_inference() {
        let limits = LimitArgs {
            timeout: Some(3),
            ..LimitArgs::default()
        };
        let request = build_request(
            "console.log(1)".to_string(),
            String::new(),
            Some(Path::new("/tmp/jobs/app.js")),
            &limits,
        );
        assert_eq!(request.filename.as_deref(), Some("app.js"));
        assert_eq!(request.language, "");
        assert_eq!(request.timeout_seconds, Some(3));
        assert_eq!(request.memory_limit, None);
        assert_eq!(request.cpu_share, None);
    }

    #[tokio::test]
    async fn test_read_source_passes_inline_code_through() {
        assert_eq!(read_source("print(2)".to_string()).await.unwrap(), "print(2)");
    }

    #[tokio::test]
    async fn test_run_file_in_local_mode() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("hello.py");
        std::fs::write(&file, "print('hi')").unwrap();

        let config = coderun_core::SandboxConfig {
            scratch_dir: dir.path().to_path_buf(),
            local_only: true,
            ..Default::default()
        };
        let sandbox = Sandbox::new(config).unwrap();
        let source = tokio::fs::read_to_string(&file).await.unwrap();
        let request = build_request(source, String::new(), Some(file.as_path()), &LimitArgs::default());
        let result = sandbox.execute(request).await;

        // Whether python exists on this host or not, the result names the language and mode.
        assert_eq!(result.language, coderun_core::Language::Python);
        assert_eq!(result.execution_mode, coderun_core::ExecutionMode::Local);
        assert!(result.success || result.error.is_some());
    }
}
