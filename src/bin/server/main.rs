//! Kuba Stream HTTP Server
//!
//! Serves windowed streaming evaluation of time-series queries over HTTP.
//! Results are pushed as server-sent events while the range is evaluated.
//!
//! # Endpoints
//!
//! ## Write
//! - `POST /api/v1/write` - Write data points into the in-memory backend
//!
//! ## Query
//! - `POST /api/v1/query/stream` - Stream query results as `text/event-stream`
//!
//! ## Admin
//! - `GET /health` - Health check
//! - `GET /metrics` - Prometheus metrics
//!
//! # CLI Commands
//!
//! - `start` - Start the HTTP server (default if no command specified)
//! - `check-config` - Validate configuration file
//!
//! # Configuration
//!
//! The server reads configuration from:
//! 1. `--config` path
//! 2. `STREAM_CONFIG` environment variable (path to TOML file)
//! 3. `./application.toml` in current directory
//! 4. Default configuration

mod config;
mod handlers;
mod types;

use axum::{
    http::{HeaderValue, Method},
    routing::{get, post},
    Router,
};
use clap::{Parser, Subcommand};
use config::load_config_with_app;
use handlers::AppState;
use kuba_stream::backend::MemoryBackend;
use std::{net::SocketAddr, sync::Arc};
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, warn};

// =============================================================================
// Router and Server Setup
// =============================================================================

/// Build CORS layer from configuration
fn build_cors_layer(cors_origins: &[String]) -> CorsLayer {
    if cors_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers(Any)
    } else {
        let origins: Vec<HeaderValue> =
            cors_origins.iter().filter_map(|o| o.parse().ok()).collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers(Any)
    }
}

/// Build the application router
fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health and metrics
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        // Write API
        .route("/api/v1/write", post(handlers::write_points))
        // Streaming query API
        .route("/api/v1/query/stream", post(handlers::stream_query))
        // State and CORS
        .with_state(state.clone())
        .layer(build_cors_layer(&state.config.cors_allowed_origins))
}

/// Graceful shutdown signal handler
///
/// Signal registration failures are logged and the handler then waits
/// forever, so the server has to be killed.
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => {},
            Err(e) => {
                warn!(
                    error = %e,
                    "Ctrl+C handler installation failed - graceful shutdown unavailable"
                );
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            },
            Err(e) => {
                warn!(
                    error = %e,
                    "SIGTERM handler installation failed - SIGTERM shutdown unavailable"
                );
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

// =============================================================================
// CLI Definition
// =============================================================================

/// Kuba Stream - windowed streaming evaluation of time-series queries
#[derive(Parser)]
#[command(name = "kuba-stream")]
#[command(version)]
#[command(about = "Streams time-series query results window by window", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to configuration file (overrides STREAM_CONFIG env var)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Override listen address (e.g., 0.0.0.0:8080)
    #[arg(short, long, global = true)]
    listen: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server (default)
    Start,

    /// Validate configuration file without starting the server
    CheckConfig,
}

// =============================================================================
// CLI Command Handlers
// =============================================================================

/// Validate configuration and print summary
fn cmd_check_config(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let (config, app_config) = load_config_with_app(cli.config.as_deref())?;

    println!("Configuration is valid!");
    println!();
    println!("Server Settings:");
    println!("  Listen address: {}", config.listen_addr);
    println!("  Log level: {}", app_config.server.log_level);
    println!();
    println!("Streaming Settings:");
    println!(
        "  Heartbeat interval: {} ms",
        app_config.streaming.heartbeat_interval_ms
    );
    println!("  Fetch timeout: {} ms", app_config.streaming.fetch_timeout_ms);
    println!(
        "  Chunk multiplier: {} steps",
        app_config.streaming.chunk_multiplier
    );

    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match &cli.command {
        Some(Commands::CheckConfig) => return cmd_check_config(&cli),
        Some(Commands::Start) | None => {},
    }

    let (mut config, app_config) = load_config_with_app(cli.config.as_deref())?;
    if let Some(listen) = &cli.listen {
        config.listen_addr = listen.clone();
    }

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&app_config.server.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    info!("Starting Kuba Stream Server v{}", env!("CARGO_PKG_VERSION"));
    debug!(
        listen_addr = %config.listen_addr,
        heartbeat_ms = app_config.streaming.heartbeat_interval_ms,
        fetch_timeout_ms = app_config.streaming.fetch_timeout_ms,
        chunk_multiplier = app_config.streaming.chunk_multiplier,
        "Configuration loaded"
    );

    let state = Arc::new(AppState {
        backend: Arc::new(MemoryBackend::new()),
        config: config.clone(),
    });

    let app = build_router(state);

    let addr: SocketAddr = config.listen_addr.parse()?;
    info!("Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}
