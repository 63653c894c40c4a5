//! Edge publisher: stamps owner and time onto event fields and sends them
//!
//! `device_owner` and `timestamp` are reserved. A caller that supplies
//! either key gets `PublishError::ReservedField` and nothing is sent.

use crate::domain::error::PublishError;
use crate::domain::record::TIMESTAMP_FORMAT;
use crate::domain::types::DomainEvent;
use crate::infra::metrics::Metrics;
use crate::io::bus::MessageBus;
use chrono::{DateTime, FixedOffset, Utc};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

pub const OWNER_FIELD: &str = "device_owner";
pub const TIMESTAMP_FIELD: &str = "timestamp";
const RESERVED_FIELDS: [&str; 2] = [OWNER_FIELD, TIMESTAMP_FIELD];

/// Wire record: topic plus a flat JSON object payload
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryMessage {
    pub topic: String,
    pub payload: Map<String, Value>,
}

impl TelemetryMessage {
    pub fn build(
        topic: &str,
        mut fields: Map<String, Value>,
        device_owner: &str,
        timestamp: DateTime<FixedOffset>,
    ) -> Result<Self, PublishError> {
        if let Some(&key) = RESERVED_FIELDS.iter().find(|key| fields.contains_key(**key)) {
            return Err(PublishError::ReservedField(key));
        }
        fields.insert(OWNER_FIELD.to_string(), Value::String(device_owner.to_string()));
        fields.insert(
            TIMESTAMP_FIELD.to_string(),
            Value::String(timestamp.format(TIMESTAMP_FORMAT).to_string()),
        );
        Ok(Self { topic: topic.to_string(), payload: fields })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.payload)
    }
}

pub struct Publisher<B: MessageBus> {
    bus: B,
    device_owner: String,
    utc_offset: FixedOffset,
    metrics: Arc<Metrics>,
}

impl<B: MessageBus> Publisher<B> {
    pub fn new(bus: B, device_owner: &str, utc_offset: FixedOffset, metrics: Arc<Metrics>) -> Self {
        Self { bus, device_owner: device_owner.to_string(), utc_offset, metrics }
    }

    pub fn device_owner(&self) -> &str {
        &self.device_owner
    }

    /// Serialize `fields` with owner and local timestamp, then hand to the bus
    ///
    /// No retry; the caller logs and moves on.
    pub async fn publish(
        &self,
        topic: &str,
        fields: Map<String, Value>,
        device_owner: &str,
        now: DateTime<Utc>,
    ) -> Result<(), PublishError> {
        let message =
            TelemetryMessage::build(topic, fields, device_owner, now.with_timezone(&self.utc_offset))?;
        let payload = message.to_bytes()?;
        let bytes = payload.len();

        match self.bus.publish(topic, payload).await {
            Ok(()) => {
                self.metrics.record_published();
                debug!(topic = %topic, bytes = %bytes, "published");
                Ok(())
            }
            Err(e) => {
                self.metrics.record_publish_failure();
                Err(e.into())
            }
        }
    }

    /// Publish a domain event under this device's owner
    pub async fn publish_event(&self, event: &DomainEvent, now: DateTime<Utc>) -> Result<(), PublishError> {
        self.publish(event.topic().as_str(), event.fields(), &self.device_owner, now).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::TransportError;
    use crate::domain::types::{BoxState, BoxStatus};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct RecordingBus {
        sent: Mutex<Vec<(String, Vec<u8>)>>,
        fail: AtomicBool,
    }

    #[async_trait]
    impl MessageBus for RecordingBus {
        async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
            if self.fail.load(Ordering::Relaxed) {
                return Err(TransportError::Unavailable("offline".to_string()));
            }
            self.sent.lock().push((topic.to_string(), payload));
            Ok(())
        }
    }

    fn cet() -> FixedOffset {
        FixedOffset::east_opt(3600).unwrap()
    }

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 11, 2, 9, 30, 15).unwrap()
    }

    fn fields(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_build_adds_owner_and_local_timestamp() {
        let ts = fixed_now().with_timezone(&cet());
        let message =
            TelemetryMessage::build("esp32/ultrasound_data", fields(json!({"distance": 3.2})), "Anna", ts)
                .unwrap();
        assert_eq!(message.payload["distance"], 3.2);
        assert_eq!(message.payload["device_owner"], "Anna");
        assert_eq!(message.payload["timestamp"], "2024-11-02 10:30:15");
    }

    #[test]
    fn test_build_rejects_reserved_fields() {
        let ts = fixed_now().with_timezone(&cet());
        let err = TelemetryMessage::build(
            "sensor/ldr",
            fields(json!({"value": 1, "device_owner": "Mallory"})),
            "Anna",
            ts,
        )
        .unwrap_err();
        assert!(matches!(err, PublishError::ReservedField("device_owner")));

        let err = TelemetryMessage::build(
            "sensor/ldr",
            fields(json!({"value": 1, "timestamp": "yesterday"})),
            "Anna",
            ts,
        )
        .unwrap_err();
        assert!(matches!(err, PublishError::ReservedField("timestamp")));
    }

    #[tokio::test]
    async fn test_publish_event_sends_json() {
        let bus = Arc::new(RecordingBus::default());
        let metrics = Arc::new(Metrics::new());
        let publisher = Publisher::new(bus.clone(), "Anna", cet(), metrics.clone());

        let event = DomainEvent::BoxStatus(BoxStatus { state: BoxState::Empty, distance: 3.5 });
        publisher.publish_event(&event, fixed_now()).await.unwrap();

        let sent = bus.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "esp32/empty_box_status");
        let body: Value = serde_json::from_slice(&sent[0].1).unwrap();
        assert_eq!(body["status"], "empty");
        assert_eq!(body["distance"], 3.5);
        assert_eq!(body["device_owner"], "Anna");
        assert_eq!(body["timestamp"], "2024-11-02 10:30:15");
        assert_eq!(metrics.messages_published(), 1);
    }

    #[tokio::test]
    async fn test_publish_transport_failure_is_returned() {
        let bus = Arc::new(RecordingBus::default());
        bus.fail.store(true, Ordering::Relaxed);
        let metrics = Arc::new(Metrics::new());
        let publisher = Publisher::new(bus.clone(), "Anna", cet(), metrics.clone());

        let event = DomainEvent::DistanceReading { distance: 1.2 };
        let err = publisher.publish_event(&event, fixed_now()).await.unwrap_err();
        assert!(matches!(err, PublishError::Transport(TransportError::Unavailable(_))));
        assert!(bus.sent.lock().is_empty());
        assert_eq!(metrics.report().publish_failures, 1);
    }

    #[tokio::test]
    async fn test_reserved_field_never_reaches_bus() {
        let bus = Arc::new(RecordingBus::default());
        let publisher = Publisher::new(bus.clone(), "Anna", cet(), Arc::new(Metrics::new()));
        let result = publisher
            .publish("sensor/ldr", fields(json!({"device_owner": "x"})), "Anna", fixed_now())
            .await;
        assert!(result.is_err());
        assert!(bus.sent.lock().is_empty());
    }
}
