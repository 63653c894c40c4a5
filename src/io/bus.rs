//! Message bus seam for the edge publisher

use crate::domain::error::TransportError;
use crate::infra::config::Config;
use crate::io::mqtt::{connect, drive_eventloop, mqtt_options};
use async_trait::async_trait;
use rumqttc::{AsyncClient, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Anything that can carry a payload to a topic
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError>;
}

#[async_trait]
impl<B: MessageBus + ?Sized> MessageBus for Arc<B> {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        (**self).publish(topic, payload).await
    }
}

/// rumqttc-backed bus; the event loop runs on its own task
///
/// Publishing never waits. While the event loop reports the broker as down
/// the publish fails immediately, and a request queue the event loop is not
/// draining surfaces as `TransportError::Client` instead of blocking.
pub struct MqttBus {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
}

impl MqttBus {
    /// Connect with the configured client id; fails if the broker never acknowledges
    pub async fn connect(config: &Config) -> Result<Self, TransportError> {
        let options = mqtt_options(config, config.mqtt_client_id());
        let (client, eventloop) = connect(options, config.mqtt_connect_timeout()).await?;
        let connected = Arc::new(AtomicBool::new(true));
        tokio::spawn(drive_eventloop(eventloop, connected.clone()));
        Ok(Self::from_client(client, connected))
    }

    /// Wrap a client whose event loop is driven elsewhere
    ///
    /// `connected` must be kept current by whoever polls that event loop.
    pub fn from_client(client: AsyncClient, connected: Arc<AtomicBool>) -> Self {
        Self { client, connected }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub async fn disconnect(&self) {
        if let Err(e) = self.client.disconnect().await {
            debug!(error = %e, "mqtt_disconnect_failed");
        }
    }
}

#[async_trait]
impl MessageBus for MqttBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Unavailable("broker connection down".to_string()));
        }
        self.client.try_publish(topic, QoS::AtMostOnce, false, payload)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::mqtt::CLIENT_CAPACITY;
    use rumqttc::{ClientError, MqttOptions};
    use std::time::Duration;

    fn undriven_bus(connected: bool) -> (MqttBus, rumqttc::EventLoop) {
        let options = MqttOptions::new("sensorbox-test", "127.0.0.1", 1);
        let (client, eventloop) = AsyncClient::new(options, CLIENT_CAPACITY);
        (MqttBus::from_client(client, Arc::new(AtomicBool::new(connected))), eventloop)
    }

    #[tokio::test]
    async fn test_publish_fails_fast_while_disconnected() {
        let (bus, _eventloop) = undriven_bus(false);
        let result = tokio::time::timeout(
            Duration::from_secs(1),
            bus.publish("battery/percentage", b"{}".to_vec()),
        )
        .await
        .unwrap();
        assert!(matches!(result, Err(TransportError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_stalled_event_loop_returns_error_instead_of_blocking() {
        // Event loop kept alive but never polled: the request queue only fills
        let (bus, _eventloop) = undriven_bus(true);

        let outcomes = tokio::time::timeout(Duration::from_secs(3), async {
            let mut outcomes = Vec::new();
            for _ in 0..=CLIENT_CAPACITY {
                outcomes.push(bus.publish("battery/percentage", b"{}".to_vec()).await);
            }
            outcomes
        })
        .await
        .expect("publish blocked on a full request queue");

        assert!(outcomes[..CLIENT_CAPACITY].iter().all(|r| r.is_ok()));
        assert!(matches!(
            outcomes[CLIENT_CAPACITY],
            Err(TransportError::Client(ClientError::TryRequest(_)))
        ));
    }
}
