//! Stacks server binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use stacks_core::config::{AppConfig, StorageConfig};
use stacks_server::{create_router, AppState, BundleSource, DisabledSource, StoreSource};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Stacks - a preservation storage daemon
#[derive(Parser, Debug)]
#[command(name = "stacksd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "STACKS_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

/// The cache, the upload staging area, and the tape stand-in each get
/// their own namespace within the configured storage.
fn sub_storage(config: &StorageConfig, part: &str) -> StorageConfig {
    match config {
        StorageConfig::Filesystem { root } => StorageConfig::Filesystem {
            root: root.join(part),
        },
        StorageConfig::Memory => StorageConfig::Memory,
    }
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

    tracing::info!("Stacks v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration (the file is optional; env vars can provide or
    // override everything)
    let config_path = std::path::Path::new(&args.config);
    let mut figment = Figment::new();
    if config_path.exists() {
        tracing::info!(config_path = %args.config, "Loading configuration from file");
        figment = figment.merge(Toml::file(&args.config));
    } else {
        tracing::debug!("No config file found at {}", args.config);
    }
    let config: AppConfig = figment
        .merge(Env::prefixed("STACKS_").split("__"))
        .extract()
        .context("failed to load configuration")?;

    // Initialize storage
    let cache_store = stacks_storage::from_config(&sub_storage(&config.storage, "cache"))
        .await
        .context("failed to initialize cache storage")?;
    let upload_store = stacks_storage::from_config(&sub_storage(&config.storage, "upload"))
        .await
        .context("failed to initialize upload storage")?;
    tracing::info!(backend = cache_store.backend_name(), "Storage initialized");

    // The bundle store. Real bundle resolution is handled by the tape
    // tooling; the daemon reads extracted blob streams from the tape
    // mount, or answers 503 when tape use is switched off.
    let tape: Arc<dyn BundleSource> = if config.tape.enabled {
        let tape_store = stacks_storage::from_config(&sub_storage(&config.storage, "tape"))
            .await
            .context("failed to initialize tape storage")?;
        Arc::new(StoreSource::new(tape_store))
    } else {
        tracing::warn!("Tape use is disabled; blob reads that miss the cache will answer 503");
        Arc::new(DisabledSource)
    };

    let state = AppState::new(config.clone(), cache_store, upload_store, tape);

    // Rebuild the cache index and staged uploads from disk
    state
        .recover()
        .await
        .map_err(|e| anyhow::anyhow!("recovery failed: {e}"))?;
    tracing::info!(
        cache_bytes = state.cache.size(),
        staged_files = state.fragments.list().await.len(),
        "Recovered persisted state"
    );

    let app = create_router(state.clone());

    let addr: SocketAddr = config.bind.parse().context("invalid bind address")?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // flush the cache manifest on the way out
    state.cache.stop().await;
    tracing::info!("Shut down cleanly");

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Shutdown signal received");
}
