//! HTTP server exposing the code execution sandbox

use anyhow::Result;
use clap::Parser;
use coderun_core::{config::ConfigLoader, Sandbox};
use coderun_server::{shutdown_signal, CodeRunServer, ServerConfig};
use log::LevelFilter;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(author, version, about = "coderun server - sandboxed code execution over HTTP")]
struct Cli {
    #[clap(long, short, help = "YAML configuration file (defaults plus environment when omitted)")]
    config: Option<PathBuf>,

    #[clap(long, default_value = "127.0.0.1:3001")]
    bind_addr: String,

    #[clap(long, short, default_value = "info")]
    log_level: String,

    #[clap(long, help = "Run everything on the host, without the container backend")]
    local_only: bool,

    #[clap(long, help = "Disable CORS headers")]
    no_cors: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logger
    let log_level_filter = cli.log_level.parse().unwrap_or(LevelFilter::Info);
    env_logger::Builder::new()
        .filter_level(log_level_filter)
        .init();

    match &cli.config {
        Some(path) => log::info!("Loading configuration from file: {}", path.display()),
        None => log::info!("No configuration file given, using defaults and environment"),
    }
    let mut config = ConfigLoader::load(cli.config.as_deref()).await?;
    if cli.local_only {
        config.local_only = true;
    }

    if config.local_only {
        log::warn!("Container backend disabled. Submitted code runs directly on this host.");
    }

    let sandbox = Sandbox::new(config)?;
    match sandbox.probe_container_runtime().await {
        Ok(()) => log::info!("Container runtime reachable"),
        Err(e) if !sandbox.config().local_only => {
            log::warn!("{}. Requests will run locally until it becomes reachable.", e)
        }
        Err(_) => {}
    }

    let server_config = ServerConfig::default()
        .with_bind_addr_str(&cli.bind_addr)?
        .with_cors(!cli.no_cors)
        .with_logging(true);

    let server = CodeRunServer::with_config(sandbox, server_config);

    if let Err(e) = server.serve_with_shutdown(shutdown_signal()).await {
        log::error!("Server failed: {}", e);
        return Err(e.into());
    }

    Ok(())
}
