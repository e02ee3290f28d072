//! karaoke-server - Stem Separation Microservice
//!
//! Accepts uploaded songs, splits each into a vocal and an instrumental stem
//! through the configured separation backend, and serves both back over HTTP.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use karaoke_common::config::{
    default_config_path, BackendKind, RootFolderInitializer, RootFolderResolver, ServiceConfig,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use karaoke_server::services::backend::{self, codes};
use karaoke_server::{AppState, ServiceOptions};

/// Command-line arguments for karaoke-server
#[derive(Parser, Debug)]
#[command(name = "karaoke-server")]
#[command(about = "Vocal/instrumental stem separation service")]
#[command(version)]
struct Args {
    /// Port to listen on (overrides the config file)
    #[arg(short, long, env = "KARAOKE_PORT")]
    port: Option<u16>,

    /// Root folder for uploads, outputs and the job database
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// TOML configuration file
    #[arg(short, long, env = "KARAOKE_CONFIG")]
    config: Option<PathBuf>,

    /// Separation backend: process | in_process
    #[arg(short, long, env = "KARAOKE_BACKEND")]
    backend: Option<BackendKind>,

    /// Worker pool size
    #[arg(short, long, env = "KARAOKE_WORKERS")]
    workers: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "karaoke_server=info,karaoke_common=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting karaoke-server (Stem Separation) v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let args = Args::parse();

    let config_path = args.config.clone().or_else(default_config_path);
    let mut config = ServiceConfig::load_or_default(config_path.as_deref())
        .context("Failed to load configuration")?;

    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(kind) = args.backend {
        config.backend.kind = kind;
    }
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    config.validate().context("Invalid configuration")?;

    // Root folder: CLI > KARAOKE_ROOT_FOLDER > TOML > OS default
    let root_folder = RootFolderResolver::new("karaoke-server")
        .with_cli_arg(args.root_folder.clone())
        .with_toml_root(config.root_folder.clone())
        .resolve();

    let initializer = RootFolderInitializer::new(config.storage_paths(&root_folder));
    initializer
        .ensure_directory_exists()
        .map_err(|e| anyhow::anyhow!("Failed to initialize root folder: {}", e))?;
    let paths = initializer.paths().clone();
    info!("Root folder: {}", paths.root.display());
    info!("Uploads: {}", paths.upload_root.display());
    info!("Outputs: {}", paths.output_root.display());

    let db_path = initializer.database_path();
    info!("Database: {}", db_path.display());
    let db_pool = karaoke_server::db::init_database_pool(db_path).await?;

    let interrupted = karaoke_server::db::jobs::fail_interrupted(&db_pool, codes::WORKER_ABORTED).await?;
    if interrupted > 0 {
        warn!("Marked {} interrupted job(s) from a previous run as failed", interrupted);
    }

    let separation_backend = backend::from_config(&config.backend);
    info!(
        "Separation backend: {} ({:?}), {} worker(s), queue capacity {}, timeout {}s, isolated naming: {}",
        separation_backend.name(),
        config.backend.kind,
        config.workers,
        config.queue_capacity,
        config.job_timeout_secs,
        config.isolate_jobs
    );

    let shutdown = CancellationToken::new();
    let state = AppState::start(
        db_pool,
        separation_backend,
        ServiceOptions::from_config(&config, &paths),
        shutdown.clone(),
    );
    let queue = state.queue.clone();

    let app = karaoke_server::build_router(state);

    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    queue.shutdown().await;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
