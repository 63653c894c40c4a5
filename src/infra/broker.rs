//! Embedded MQTT broker for local development (rumqttd)
//!
//! Plaintext MQTT v4 on `[broker] bind_address:port`. Production points the
//! ingest and edge binaries at an external TLS broker instead.

use crate::infra::config::Config as AppConfig;
use anyhow::Context;
use rumqttd::{Broker, Config, ConnectionSettings, RouterConfig, ServerSettings};
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// How long startup waits for the listener to accept connections
const READY_TIMEOUT: Duration = Duration::from_secs(5);
const READY_POLL: Duration = Duration::from_millis(20);

/// Telemetry payloads are a handful of JSON fields
const MAX_PAYLOAD_BYTES: usize = 4 * 1024;

fn broker_settings(listen: SocketAddr) -> Config {
    let connections = ConnectionSettings {
        connection_timeout_ms: 5000,
        max_payload_size: MAX_PAYLOAD_BYTES,
        max_inflight_count: 32,
        auth: None,
        external_auth: None,
        dynamic_filters: false,
    };
    let server = ServerSettings {
        name: "sensorbox-v4".to_string(),
        listen,
        tls: None,
        next_connection_delay_ms: 0,
        connections,
    };

    Config {
        id: 0,
        router: RouterConfig {
            max_connections: 16,
            max_outgoing_packet_count: 64,
            max_segment_size: 1024 * 1024,
            max_segment_count: 4,
            ..Default::default()
        },
        v4: Some(HashMap::from([(server.name.clone(), server)])),
        ..Default::default()
    }
}

/// Start the broker on its own thread and wait until it accepts connections
///
/// Returns the listen address. An unparsable bind address, a failed thread
/// spawn, or a listener that never comes up is an error for the caller.
pub fn start_embedded_broker(app_config: &AppConfig) -> anyhow::Result<SocketAddr> {
    let addr = format!("{}:{}", app_config.broker_bind_address(), app_config.broker_port());
    let listen: SocketAddr =
        addr.parse().with_context(|| format!("invalid broker bind address {addr}"))?;

    let settings = broker_settings(listen);
    thread::Builder::new()
        .name("mqtt-broker".to_string())
        .spawn(move || {
            let mut broker = Broker::new(settings);
            // Blocks for the broker's lifetime
            if let Err(e) = broker.start() {
                warn!(error = %e, "broker_stopped");
            }
        })
        .context("failed to spawn broker thread")?;

    wait_until_listening(listen)?;
    info!(listen = %listen, "broker_started");
    Ok(listen)
}

fn wait_until_listening(listen: SocketAddr) -> anyhow::Result<()> {
    let target = if listen.ip().is_unspecified() {
        SocketAddr::from((Ipv4Addr::LOCALHOST, listen.port()))
    } else {
        listen
    };

    let deadline = Instant::now() + READY_TIMEOUT;
    while Instant::now() < deadline {
        if TcpStream::connect_timeout(&target, READY_POLL).is_ok() {
            return Ok(());
        }
        thread::sleep(READY_POLL);
    }
    anyhow::bail!("broker not accepting connections on {target} after {READY_TIMEOUT:?}")
}
