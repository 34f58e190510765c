//! Warden server binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use warden_core::config::AppConfig;
use warden_server::{AppState, CancellationRestarter, create_router};

/// Warden - resumable database snapshot restore service
#[derive(Parser, Debug)]
#[command(name = "wardend")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "WARDEN_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Warden v{}", env!("CARGO_PKG_VERSION"));

    // The file is optional; every setting has a default and can be
    // overridden with WARDEN_ env vars
    let config_path = std::path::Path::new(&args.config);
    let mut figment = Figment::new();
    if config_path.exists() {
        tracing::info!(config_path = %args.config, "Loading configuration from file");
        figment = figment.merge(Toml::file(&args.config));
    } else {
        tracing::info!(
            config_path = %args.config,
            "No config file found, using defaults and environment variables"
        );
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("WARDEN_").split("__"))
        .extract()
        .context("failed to load configuration")?;
    config
        .validate()
        .map_err(anyhow::Error::msg)
        .context("invalid configuration")?;

    tokio::fs::create_dir_all(&config.restore.restore_root)
        .await
        .with_context(|| {
            format!(
                "failed to create restore root {}",
                config.restore.restore_root.display()
            )
        })?;

    warden_server::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    let registry = warden_restore::formats::default_registry()
        .context("failed to register restore formats")?;
    tracing::info!(
        formats = ?registry.format_listings().iter().map(|f| f.name.as_str()).collect::<Vec<_>>(),
        "Restore formats registered"
    );

    let restarter = CancellationRestarter::new();
    let restart = restarter.token();
    let state = AppState::new(config.clone(), registry, Arc::new(restarter));
    let manager = state.manager.clone();

    let app = create_router(state);
    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = restart.cancelled() => {
                    tracing::info!("Shutting down for restart");
                }
                result = tokio::signal::ctrl_c() => {
                    if let Err(e) = result {
                        tracing::error!(error = %e, "Failed to listen for shutdown signal");
                    }
                    tracing::info!("Shutdown signal received");
                }
            }
        })
        .await?;

    manager.shutdown();
    Ok(())
}
