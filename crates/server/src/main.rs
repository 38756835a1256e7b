//! Easel server binary.

use anyhow::{Context, Result};
use clap::Parser;
use easel_core::config::AppConfig;
use easel_server::{AppState, HttpResolver, UpstreamResolver, create_router};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Easel - refresh coordination service for a TTL-bounded artifact cache
#[derive(Parser, Debug)]
#[command(name = "easeld")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "EASEL_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Startup banner
    tracing::info!("Easel v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args.config)?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;

    // Register Prometheus metrics
    easel_server::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    // Initialize metadata store
    let metadata = easel_metadata::from_config(&config.metadata)
        .await
        .context("failed to initialize metadata store")?;
    tracing::info!("Metadata store initialized");

    let resolver: Arc<dyn UpstreamResolver> = Arc::new(
        HttpResolver::new(&config.upstream).context("failed to initialize upstream resolver")?,
    );
    tracing::info!(base_url = %config.upstream.base_url, "Upstream resolver initialized");

    // Create application state
    let state = AppState::new(config.clone(), metadata, resolver);

    // Spawn watchdog task to detect panicked batch drivers
    let _watchdog_handle = state
        .tasks
        .clone()
        .spawn_watchdog(state.operations.clone());
    tracing::info!("Batch driver watchdog spawned");

    if config.server.resume_open_operations {
        resume_operations(&state).await?;
    }

    if config.sweep.enabled {
        let _sweep_handle = Arc::new(state.sweep_scheduler()).spawn();
    } else {
        tracing::info!("Background sweep disabled");
    }

    // Create router
    let app = create_router(state);

    // Parse bind address
    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;

    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Load configuration from an optional TOML file overlaid with `EASEL_`
/// environment variables.
fn load_config(path: &str) -> Result<AppConfig> {
    let config_path = std::path::Path::new(path);
    let mut figment = Figment::new();

    if config_path.exists() {
        tracing::info!(config_path = %path, "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::info!("No config file found at {}, using defaults and environment", path);
    }

    figment
        .merge(Env::prefixed("EASEL_").split("__"))
        .extract()
        .context("failed to load configuration")
}

/// Re-drive operations a previous process left open.
async fn resume_operations(state: &AppState) -> Result<()> {
    let resumed = state
        .operations
        .resume_open_operations()
        .await
        .context("failed to resume open operations")?;

    if resumed > 0 {
        tracing::warn!(
            count = resumed,
            "Resumed operations left open by a previous server instance"
        );
    }
    Ok(())
}
