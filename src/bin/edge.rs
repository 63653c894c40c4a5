//! telemetry-edge: sensor box sampling loop
//!
//! Runs the detector/publisher loop against the simulated sensor board.
//! The broker connection is required at startup; after that, publish
//! failures are logged and the loop keeps sampling.

use clap::Parser;
use sensorbox_telemetry::infra::{Config, Metrics};
use sensorbox_telemetry::io::{MqttBus, Publisher, SimulatedSensors};
use sensorbox_telemetry::services::Sampler;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Sensor box edge publisher
#[derive(Parser, Debug)]
#[command(name = "telemetry-edge", version, about)]
struct Args {
    /// Path to TOML configuration file (falls back to CONFIG_FILE, then config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Override the configured device owner
    #[arg(long)]
    owner: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(git_hash = %env!("GIT_HASH"), "telemetry_edge_starting");

    let args = Args::parse();
    let config_path = args.config.unwrap_or_else(|| Config::resolve_config_path(&[]));
    let mut config = Config::load_from_path(&config_path);
    if let Some(owner) = args.owner.as_deref() {
        config = config.with_device_owner(owner);
    }

    info!(
        config_file = %config.config_file(),
        device_owner = %config.device_owner(),
        mqtt_host = %config.mqtt_host(),
        mqtt_port = %config.mqtt_port(),
        poll_interval_ms = %config.poll_interval().as_millis(),
        "config_loaded"
    );

    let bus = match MqttBus::connect(&config).await {
        Ok(bus) => Arc::new(bus),
        Err(e) => {
            error!(error = %e, "mqtt_connect_failed");
            return Err(e.into());
        }
    };

    let metrics = Arc::new(Metrics::new());
    let publisher = Publisher::new(bus.clone(), config.device_owner(), config.utc_offset(), metrics.clone());
    let sampler = Sampler::new(&config, SimulatedSensors::new(), publisher, Instant::now());

    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval.max(1)));
        loop {
            interval.tick().await;
            metrics_clone.report().log();
        }
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    sampler.run(shutdown_rx).await;

    bus.disconnect().await;
    metrics.report().log();
    info!("telemetry-edge shutdown complete");
    Ok(())
}
