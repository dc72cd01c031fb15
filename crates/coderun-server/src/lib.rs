//! HTTP front end for the execution sandbox
//!
//! Exposes `Sandbox::execute` as `POST /execute`, plus a health probe that
//! reports whether the container runtime is reachable and the table of
//! supported languages. Each request is independent; the only shared state is
//! the read-only sandbox.

pub mod error;

pub use error::{Result, ServerError};

use axum::extract::{DefaultBodyLimit, Json as AxumJson, State};
use axum::response::Json;
use axum::routing::{get, post};
use axum::{middleware, Router};
use coderun_core::{ExecutionRequest, ExecutionResult, RuntimeProfile, Sandbox};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Body of `POST /execute`.
///
/// `language` may be omitted when `filename` carries a recognizable extension.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteBody {
    pub content: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub memory_limit: Option<String>,
    #[serde(default)]
    pub cpu_share: Option<f64>,
    /// Wall-clock timeout in seconds.
    #[serde(default)]
    pub timeout: Option<u64>,
}

impl From<ExecuteBody> for ExecutionRequest {
    fn from(body: ExecuteBody) -> Self {
        ExecutionRequest {
            source_text: body.content,
            language: body.language.unwrap_or_default(),
            filename: body.filename,
            memory_limit: body.memory_limit,
            cpu_share: body.cpu_share,
            timeout_seconds: body.timeout,
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    /// `available`, `unavailable` or `disabled`.
    pub container_runtime: String,
    pub version: String,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub enable_cors: bool,
    /// Maximum request body size in bytes
    pub max_body_size: usize,
    pub enable_logging: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3001)),
            enable_cors: true,
            max_body_size: 1024 * 1024, // 1MB
            enable_logging: true,
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Parse and set the bind address from a string.
    pub fn with_bind_addr_str(mut self, addr: &str) -> Result<Self> {
        self.bind_addr = addr
            .parse()
            .map_err(|e| ServerError::config_error(format!("Invalid bind address '{}': {}", addr, e)))?;
        Ok(self)
    }

    pub fn with_cors(mut self, enable: bool) -> Self {
        self.enable_cors = enable;
        self
    }

    pub fn with_max_body_size(mut self, size: usize) -> Self {
        self.max_body_size = size;
        self
    }

    pub fn with_logging(mut self, enable: bool) -> Self {
        self.enable_logging = enable;
        self
    }
}

#[derive(Clone)]
pub struct AppState {
    pub sandbox: Arc<Sandbox>,
}

pub struct CodeRunServer {
    sandbox: Arc<Sandbox>,
    config: ServerConfig,
}

impl CodeRunServer {
    pub fn new(sandbox: Sandbox) -> Self {
        Self::with_config(sandbox, ServerConfig::default())
    }

    pub fn with_config(sandbox: Sandbox, config: ServerConfig) -> Self {
        Self {
            sandbox: Arc::new(sandbox),
            config,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Build the Axum router with all routes and middleware.
    pub fn build_router(&self) -> Router {
        let state = AppState {
            sandbox: Arc::clone(&self.sandbox),
        };

        let mut router = Router::new()
            .route("/health", get(health_handler))
            .route("/languages", get(languages_handler))
            .route("/execute", post(execute_handler))
            .layer(DefaultBodyLimit::max(self.config.max_body_size))
            .with_state(state);

        if self.config.enable_logging {
            router = router.layer(middleware::from_fn(
                |request: axum::http::Request<axum::body::Body>, next: axum::middleware::Next| async {
                    let request_id = uuid::Uuid::new_v4().to_string();
                    let method = request.method().clone();
                    let uri = request.uri().clone();

                    // Health is polled by orchestrators; keep it out of info logs.
                    let quiet = uri.path() == "/health";
                    if quiet {
                        log::debug!("Request {} {} {}", request_id, method, uri);
                    } else {
                        log::info!("Request {} {} {}", request_id, method, uri);
                    }

                    let start = std::time::Instant::now();
                    let response = next.run(request).await;
                    let duration = start.elapsed();

                    if quiet {
                        log::debug!("Response {} completed in {:?}", request_id, duration);
                    } else {
                        log::info!(
                            "Response {} {} completed in {:?}",
                            request_id,
                            response.status(),
                            duration
                        );
                    }
                    response
                },
            ));
        }

        router = router.layer(TraceLayer::new_for_http());

        if self.config.enable_cors {
            router = router.layer(CorsLayer::permissive());
        }

        router
    }

    /// Start the server and run until `shutdown_signal` resolves.
    pub async fn serve_with_shutdown<F>(self, shutdown_signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let router = self.build_router();
        let listener = TcpListener::bind(self.config.bind_addr).await.map_err(|e| {
            ServerError::config_error(format!("Failed to bind to {}: {}", self.config.bind_addr, e))
        })?;

        log::info!("coderun server starting on {}", self.config.bind_addr);
        log::info!("Health check: http://{}/health", self.config.bind_addr);
        log::info!("Execute endpoint: http://{}/execute", self.config.bind_addr);

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| ServerError::internal(format!("Server error: {}", e)))?;

        log::info!("coderun server shut down gracefully");
        Ok(())
    }
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let container_runtime = if state.sandbox.config().local_only {
        "disabled"
    } else {
        match state.sandbox.probe_container_runtime().await {
            Ok(()) => "available",
            Err(e) => {
                log::debug!("Health probe: {}", e);
                "unavailable"
            }
        }
    };

    Json(HealthResponse {
        status: "healthy".to_string(),
        container_runtime: container_runtime.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn languages_handler(State(state): State<AppState>) -> Json<Vec<RuntimeProfile>> {
    Json(state.sandbox.resolver().profiles().to_vec())
}

async fn execute_handler(
    State(state): State<AppState>,
    AxumJson(body): AxumJson<ExecuteBody>,
) -> Json<ExecutionResult> {
    Json(state.sandbox.execute(body.into()).await)
}

/// Resolves on Ctrl+C or, on unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            log::info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            log::info!("Received SIGTERM, shutting down...");
        },
    }
}
