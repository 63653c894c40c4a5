//! MQTT client plumbing: connection setup and the ingest receive loop

use crate::domain::error::TransportError;
use crate::domain::types::Topic;
use crate::infra::config::Config;
use crate::services::router::Router;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, Transport};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Request channel capacity between client handles and the event loop
pub(crate) const CLIENT_CAPACITY: usize = 100;

/// Build connection options from config
pub fn mqtt_options(config: &Config, client_id: &str) -> MqttOptions {
    let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
    mqttoptions.set_keep_alive(config.mqtt_keep_alive());

    if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
        mqttoptions.set_credentials(username, password);
    }

    if config.mqtt_tls() {
        mqttoptions.set_transport(Transport::tls_with_default_config());
    }

    mqttoptions
}

/// Create a client and drive its event loop until the broker acknowledges
///
/// There is no retry: an unreachable broker at startup is returned to the
/// caller, which treats it as fatal.
pub async fn connect(
    options: MqttOptions,
    timeout: Duration,
) -> Result<(AsyncClient, EventLoop), TransportError> {
    let broker = format!("{}:{}", options.broker_address().0, options.broker_address().1);
    let (client, mut eventloop) = AsyncClient::new(options, CLIENT_CAPACITY);

    let wait_for_connack = async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
                Ok(_) => {}
                Err(e) => return Err(TransportError::from(e)),
            }
        }
    };
    let outcome = tokio::time::timeout(timeout, wait_for_connack).await;

    match outcome {
        Ok(Ok(())) => {
            info!(broker = %broker, "mqtt_connected");
            Ok((client, eventloop))
        }
        Ok(Err(e)) => Err(e),
        Err(_) => Err(TransportError::ConnectTimeout(timeout)),
    }
}

/// Subscribe to every telemetry topic at QoS 0
pub async fn subscribe_all(client: &AsyncClient) -> Result<(), TransportError> {
    for topic in Topic::ALL {
        client.subscribe(topic.as_str(), QoS::AtMostOnce).await?;
    }
    Ok(())
}

/// Connect, subscribe and feed every inbound publish to the router
///
/// Only the initial connect/subscribe can fail. Once running, bus errors
/// are logged and the event loop reconnects on the next poll; topics are
/// re-subscribed on every CONNACK. Each message is routed on the blocking
/// pool so storage I/O never stalls the event loop.
pub async fn start_ingest(
    config: &Config,
    router: Arc<Router>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), TransportError> {
    let client_id = format!("{}-ingest-{}", config.mqtt_client_id(), std::process::id());
    let options = mqtt_options(config, &client_id);
    let (client, mut eventloop) = connect(options, config.mqtt_connect_timeout()).await?;
    subscribe_all(&client).await?;

    info!(
        topics = ?Topic::ALL.iter().map(|t| t.as_str()).collect::<Vec<_>>(),
        "mqtt_subscribed"
    );

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("mqtt_shutdown");
                    if let Err(e) = client.disconnect().await {
                        debug!(error = %e, "mqtt_disconnect_failed");
                    }
                    return Ok(());
                }
            }
            result = eventloop.poll() => {
                match result {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let router = router.clone();
                        tokio::task::spawn_blocking(move || {
                            router.handle(&publish.topic, &publish.payload);
                        });
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt_reconnected");
                        if let Err(e) = subscribe_all(&client).await {
                            warn!(error = %e, "mqtt_resubscribe_failed");
                        }
                    }
                    Ok(Event::Incoming(Packet::SubAck(ack))) => {
                        debug!(pkid = %ack.pkid, "mqtt_suback");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "mqtt_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}

/// Keep a publish-only client's event loop turning
///
/// `connected` tracks the broker session: set on every CONNACK, cleared on
/// any poll error or broker disconnect. rumqttc reconnects on the next poll.
pub async fn drive_eventloop(mut eventloop: EventLoop, connected: Arc<AtomicBool>) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                connected.store(true, Ordering::Relaxed);
                info!("mqtt_reconnected");
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                connected.store(false, Ordering::Relaxed);
                warn!("mqtt_broker_disconnect");
            }
            Ok(_) => {}
            Err(e) => {
                if connected.swap(false, Ordering::Relaxed) {
                    warn!(error = %e, "mqtt_connection_lost");
                } else {
                    debug!(error = %e, "mqtt_reconnect_failed");
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}
