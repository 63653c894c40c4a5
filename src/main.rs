//! telemetry-ingest: broker-side router
//!
//! Subscribes to every telemetry topic and persists decoded messages to
//! SQLite, one table per topic.
//!
//! Module structure:
//! - `domain/` - Core types (Topic, DomainEvent, PersistedRecord, errors)
//! - `io/` - External interfaces (MQTT, publisher, sensors, SQLite store)
//! - `services/` - Detection, edge sampling loop, ingest router
//! - `infra/` - Infrastructure (Config, Metrics, Broker)

use clap::Parser;
use sensorbox_telemetry::infra::{Config, Metrics};
use sensorbox_telemetry::io::Store;
use sensorbox_telemetry::services::Router;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Sensor box telemetry ingest service
#[derive(Parser, Debug)]
#[command(name = "telemetry-ingest", version, about)]
struct Args {
    /// Path to TOML configuration file (falls back to CONFIG_FILE, then config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // RUST_LOG selects the level; default INFO
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(git_hash = %env!("GIT_HASH"), "telemetry_ingest_starting");

    let args = Args::parse();
    let config_path = args.config.unwrap_or_else(|| Config::resolve_config_path(&[]));
    let config = Config::load_from_path(&config_path);

    if config.broker_enabled() {
        if let Err(e) = sensorbox_telemetry::infra::broker::start_embedded_broker(&config) {
            error!(error = %format!("{e:#}"), "broker_start_failed");
            return Err(e.into());
        }
    }

    info!(
        config_file = %config.config_file(),
        mqtt_host = %config.mqtt_host(),
        mqtt_port = %config.mqtt_port(),
        mqtt_tls = %config.mqtt_tls(),
        storage_path = %config.storage_path(),
        pool_size = %config.storage_pool_size(),
        utc_offset = %config.utc_offset(),
        "config_loaded"
    );

    let store = match Store::open(config.storage_path(), config.storage_pool_size()) {
        Ok(store) => store,
        Err(e) => {
            error!(path = %config.storage_path(), error = %e, "storage_open_failed");
            return Err(e.into());
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let metrics = Arc::new(Metrics::new());
    let router = Arc::new(Router::new(&store, config.utc_offset(), metrics.clone()));

    // Periodic metrics summary
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval.max(1)));
        loop {
            interval.tick().await;
            metrics_clone.report().log();
        }
    });

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    // Only the initial connect/subscribe can fail; that is fatal
    if let Err(e) = sensorbox_telemetry::io::mqtt::start_ingest(&config, router, shutdown_rx).await {
        error!(error = %e, "mqtt_connect_failed");
        return Err(e.into());
    }

    metrics.report().log();
    info!("telemetry-ingest shutdown complete");
    Ok(())
}
