//! gitgate node - a standalone git smart HTTP server.
//!
//! Serves bare repositories from a directory tree, with optional basic auth
//! backed by a static user table and a push hook that acknowledges each
//! push over the side band.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use clap::Parser;
use gitgate::GitGateway;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod backend;
mod config;

use backend::{DiskResolver, LoggingPushHook, StaticAuthorizer};
use config::Config;

/// gitgate node - git smart HTTP server for bare repositories on disk
#[derive(Parser, Debug)]
#[command(name = "gitgate-node")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Listen address (overrides the config file)
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Repository root directory (overrides the config file)
    #[arg(long)]
    repo_root: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("gitgate={}", args.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = if args.config.exists() {
        Config::load(&args.config)?
    } else {
        tracing::info!(path = %args.config.display(), "no config file found, using defaults");
        Config::default()
    };
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    if let Some(repo_root) = args.repo_root {
        config.repo_root = repo_root;
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %config.listen,
        repo_root = %config.repo_root.display(),
        auth_mode = ?config.auth_mode,
        "starting gitgate node"
    );

    tokio::fs::create_dir_all(&config.repo_root)
        .await
        .with_context(|| {
            format!(
                "failed to create repository root: {}",
                config.repo_root.display()
            )
        })?;

    let gateway = GitGateway::builder(
        DiskResolver::new(&config.repo_root, config.auth_mode),
        StaticAuthorizer::new(config.users.clone()),
    )
    .with_git_executable(&config.git_executable)
    .with_side_band_messages(config.side_band_messages)
    .with_push_timeout(Duration::from_secs(config.push_timeout_secs))
    .with_push_hook(LoggingPushHook)
    .build();

    let app = Router::new()
        .route("/health", get(health_check))
        .merge(gateway.router());

    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;
    tracing::info!(addr = %config.listen, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    Ok(())
}

/// Health check endpoint.
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received SIGINT"),
        () = terminate => tracing::info!("received SIGTERM"),
    }
}
