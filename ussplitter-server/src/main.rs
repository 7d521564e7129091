//! ussplitter-server - vocal/instrumental separation service
//!
//! Accepts audio uploads over HTTP, separates them one at a time with demucs,
//! and serves the two stems until the client cleans up.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ussplitter_server::config::{load_toml, Overrides, ServerConfig};
use ussplitter_server::engine::{DemucsEngine, SeparationEngine};
use ussplitter_server::services::{spawn_janitor, JobManager};
use ussplitter_server::{build_router, AppState};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "ussplitter-server")]
#[command(about = "Vocal/instrumental separation service for UltraStar songs")]
#[command(version)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, env = "USSPLITTER_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind
    #[arg(long, env = "USSPLITTER_HOST")]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "USSPLITTER_PORT")]
    port: Option<u16>,

    /// Directory for uploaded audio and separated stems
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // The TOML file carries the log level, so it is read before tracing is up
    let loaded = load_toml(args.config.as_deref());
    let level = match &loaded {
        Ok((toml, _)) => toml.logging.level.clone(),
        Err(_) => "info".to_string(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level)),
        )
        .init();

    info!(
        "Starting ussplitter-server v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let (toml, source) = loaded?;
    source.log();

    let config = ServerConfig::resolve(
        Overrides {
            host: args.host,
            port: args.port,
            data_dir: args.data_dir,
        },
        toml,
    )?;
    info!("Data directory: {}", config.data_dir.display());

    let engine = DemucsEngine::initialize(&config.engine, config.scratch_dir())
        .await
        .context("Separation engine unavailable")?;
    info!(
        device = engine.device().as_arg(),
        default_model = engine.default_model(),
        "Demucs ready"
    );

    let manager = JobManager::start(Arc::new(engine), config.jobs_dir(), config.jobs.clone())
        .await
        .context("Failed to start job manager")?;
    spawn_janitor(
        Arc::clone(&manager),
        config.jobs.ttl,
        config.jobs.sweep_interval,
    );

    let app = build_router(AppState::new(manager), config.max_upload_bytes);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
