//! quickvibe - QuickVibe application server
//!
//! Serves the JSON/SSE API (and optionally the prebuilt front-end) backed by
//! a SQLite database in the root folder.

use anyhow::{Context, Result};
use clap::Parser;
use qv_common::config::{LoggingConfig, RootFolderInitializer, RootFolderResolver, TomlConfig};
use qv_common::db::init_database;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use qv_server::port::{bind_listener, display_addr};
use qv_server::services::AnthropicClient;
use qv_server::{build_router, spawn_maintenance, AppState};

#[derive(Parser, Debug)]
#[command(name = "quickvibe", version, about = "QuickVibe AI app builder server")]
struct Args {
    /// Port to listen on
    #[arg(short, long, env = "QUICKVIBE_PORT")]
    port: Option<u16>,

    /// Address to bind
    #[arg(long)]
    host: Option<String>,

    /// Root folder holding the database
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Prebuilt front-end to serve for non-API paths
    #[arg(long)]
    static_dir: Option<PathBuf>,
}

/// Install the global subscriber; `RUST_LOG` overrides the configured level
///
/// Returns the reason the log file could not be used, if any.
fn init_tracing(logging: &LoggingConfig) -> Option<String> {
    let level = &logging.level;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "quickvibe={level},qv_server={level},qv_common={level},tower_http=info"
        ))
    });

    let Some(path) = &logging.file else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
        return None;
    };

    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
            None
        }
        Err(e) => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            Some(format!("Cannot open log file {}: {}", path.display(), e))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Loaded before logging so the configured level and file apply
    let mut config = TomlConfig::load(args.config.as_deref());
    let log_file_error = init_tracing(&config.logging);

    info!(
        "Starting QuickVibe (quickvibe) v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );
    if let Some(reason) = log_file_error {
        warn!("{}; logging to stderr", reason);
    }

    // CLI beats TOML
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(static_dir) = args.static_dir {
        config.static_dir = Some(static_dir);
    }

    let root_folder = RootFolderResolver::new("quickvibe")
        .with_cli_arg(args.root_folder)
        .with_toml(&config)
        .resolve();
    let initializer = RootFolderInitializer::new(root_folder);
    initializer
        .ensure_directory_exists()
        .context("Failed to initialize root folder")?;
    info!("Root folder: {}", initializer.root_folder().display());

    let db_path = initializer.database_path();
    let db = init_database(&db_path)
        .await
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;

    let llm = AnthropicClient::new(
        db.clone(),
        config.model.clone(),
        config.max_tokens,
        config.anthropic_api_key.clone(),
    )
    .context("Failed to create LLM client")?;
    info!("LLM model: {}", config.model);

    let listener = bind_listener(&config.host, config.port, config.auto_port)
        .await
        .with_context(|| format!("Failed to bind {}:{}", config.host, config.port))?;
    let addr = display_addr(&listener);

    let state = AppState::new(db, config, Arc::new(llm));
    spawn_maintenance(state.clone());
    let app = build_router(state);

    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
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
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
}
