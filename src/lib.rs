pub mod carrier;
pub mod clock;
pub mod config;
pub mod envelope;
pub mod error;
pub mod keys;
pub mod retention;
pub mod routes;
pub mod stego;
pub mod stego_crypto;
pub mod store;
pub mod vault;

use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use carrier::CarrierProvider;
use clock::SystemClock;
use config::{generate_config_template, Config};
use store::BlobStore;
use vault::{Vault, VaultSettings};

const DEFAULT_LOG_FILTER: &str = "stegvault=info,stegvault_lib=info,tower_http=info";

fn init_tracing(json_logs: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    if json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().pretty().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

/// Start the HTTP service and block until shutdown.
pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    init_tracing(config.json_logs);
    tracing::info!("stegvault v{} starting", env!("CARGO_PKG_VERSION"));

    let store = Arc::new(BlobStore::new(Arc::new(SystemClock)));
    let carriers = CarrierProvider::from_config(&config.carrier)?;
    let vault = Arc::new(Vault::new(
        store.clone(),
        carriers,
        VaultSettings::from_config(&config),
    ));

    let sweeper = retention::spawn_expiry_sweeper(
        store,
        Duration::from_secs(config.limits.sweep_interval_secs.max(1)),
    );

    let app = routes::build_router(routes::AppState { vault });

    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(
        "Listening on {} (max upload {} MB, public URL {})",
        addr,
        config.limits.max_upload_mb,
        config.public_base_url
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    Ok(())
}
