//! Ingest router: topic dispatch, decode, owner/time stamping, persistence
//!
//! Every inbound message ends in exactly one outcome: persisted, skipped,
//! or an [`IngestError`]. None of them stop the receive loop.

use crate::domain::error::{DecodeError, IngestError};
use crate::domain::record::{
    BatteryPayload, BoxStatusPayload, DistancePayload, LightPayload, PersistedRecord, TelemetryRecord,
};
use crate::domain::types::Topic;
use crate::infra::metrics::Metrics;
use crate::io::store::{Persister, SchemaManager, Store, TableSchema};
use chrono::{FixedOffset, NaiveDateTime, Utc};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of a message the router accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Persisted { table: &'static str },
    Skipped { reason: &'static str },
}

pub struct Router {
    schemas: SchemaManager,
    persister: Persister,
    utc_offset: FixedOffset,
    metrics: Arc<Metrics>,
}

impl Router {
    pub fn new(store: &Store, utc_offset: FixedOffset, metrics: Arc<Metrics>) -> Self {
        Self { schemas: store.schema_manager(), persister: store.persister(), utc_offset, metrics }
    }

    /// Route one message and record the outcome in logs and metrics
    ///
    /// Entry point for the MQTT receive loop; runs on a blocking worker.
    pub fn handle(&self, topic: &str, payload: &[u8]) {
        self.metrics.record_message_received();

        match self.route(topic, payload) {
            Ok(Disposition::Persisted { table }) => {
                self.metrics.record_persisted();
                debug!(topic = %topic, table = %table, "record_persisted");
            }
            Ok(Disposition::Skipped { reason }) => {
                self.metrics.record_skipped();
                debug!(topic = %topic, reason = %reason, "message_skipped");
            }
            Err(e) => {
                match &e {
                    IngestError::UnknownTopic(_) => self.metrics.record_unknown_topic(),
                    IngestError::Decode { .. } => self.metrics.record_decode_error(),
                    IngestError::Schema(_) => self.metrics.record_schema_error(),
                    IngestError::Persist(_) => self.metrics.record_persist_error(),
                }
                warn!(topic = %topic, kind = %e.kind(), error = %e, "message_dropped");
            }
        }
    }

    /// Route with the current local time as receipt timestamp
    pub fn route(&self, topic: &str, payload: &[u8]) -> Result<Disposition, IngestError> {
        let received_at = Utc::now().with_timezone(&self.utc_offset).naive_local();
        self.route_at(topic, payload, received_at)
    }

    pub fn route_at(
        &self,
        topic: &str,
        payload: &[u8],
        received_at: NaiveDateTime,
    ) -> Result<Disposition, IngestError> {
        let topic = Topic::parse(topic).ok_or_else(|| IngestError::UnknownTopic(topic.to_string()))?;

        let Some((reading, device_owner)) = decode(topic, payload)
            .map_err(|source| IngestError::Decode { topic: topic.as_str(), source })?
        else {
            return Ok(Disposition::Skipped { reason: "light_not_on" });
        };

        let schema = TableSchema::for_topic(topic);
        self.schemas.ensure(schema)?;
        let record = PersistedRecord::new(reading, device_owner, received_at);
        match self.persister.insert(&record) {
            // Table dropped behind the schema cache: recreate once and retry
            Err(e) if e.is_missing_table() => {
                warn!(table = %schema.table, "table_missing_recreating");
                self.schemas.forget(schema.table);
                self.schemas.ensure(schema)?;
                self.persister.insert(&record)?;
            }
            result => result?,
        }
        Ok(Disposition::Persisted { table: schema.table })
    }
}

fn parse<T: DeserializeOwned>(payload: &[u8]) -> Result<T, DecodeError> {
    let text = std::str::from_utf8(payload)?;
    Ok(serde_json::from_str(text)?)
}

/// Decode a payload into its row and optional owner
///
/// `Ok(None)` means the message is valid but not stored (light off).
fn decode(topic: Topic, payload: &[u8]) -> Result<Option<(TelemetryRecord, Option<String>)>, DecodeError> {
    let decoded = match topic {
        Topic::Light => {
            let p: LightPayload = parse(payload)?;
            if !p.is_on() {
                return Ok(None);
            }
            (TelemetryRecord::Light { value: 1 }, p.device_owner)
        }
        Topic::Distance => {
            let p: DistancePayload = parse(payload)?;
            (TelemetryRecord::Distance { distance: p.distance }, p.device_owner)
        }
        Topic::BoxStatus => {
            let p: BoxStatusPayload = parse(payload)?;
            (TelemetryRecord::BoxStatus { status: p.status, distance: p.distance }, p.device_owner)
        }
        Topic::Battery => {
            let p: BatteryPayload = parse(payload)?;
            (TelemetryRecord::Battery { voltage: p.voltage, percentage: p.percentage }, p.device_owner)
        }
    };
    Ok(Some(decoded))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{BoxState, UNKNOWN_OWNER};
    use chrono::NaiveDate;

    fn router() -> (Router, Store, Arc<Metrics>) {
        let store = Store::open(":memory:", 1).unwrap();
        let metrics = Arc::new(Metrics::new());
        let router = Router::new(&store, FixedOffset::east_opt(3600).unwrap(), metrics.clone());
        (router, store, metrics)
    }

    fn received_at() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 11, 2).unwrap().and_hms_opt(10, 30, 0).unwrap()
    }

    fn count(store: &Store, table: &str) -> i64 {
        store
            .pool()
            .acquire()
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_light_off_is_skipped() {
        let (router, store, _) = router();
        let outcome = router.route_at("sensor/ldr", br#"{"value": 0}"#, received_at()).unwrap();
        assert_eq!(outcome, Disposition::Skipped { reason: "light_not_on" });
        // Skipped messages never touch storage, not even to create the table
        assert!(!store.schema_manager().table_exists("ldr_data").unwrap());

        let outcome = router.route_at("sensor/ldr", br#"{"value": 1}"#, received_at()).unwrap();
        assert_eq!(outcome, Disposition::Persisted { table: "ldr_data" });
        assert_eq!(count(&store, "ldr_data"), 1);
    }

    #[test]
    fn test_non_numeric_light_values_are_skipped() {
        let (router, store, _) = router();
        for payload in [r#"{"value": "on"}"#, r#"{"value": false}"#, r#"{"value": null}"#] {
            let outcome = router.route_at("sensor/ldr", payload.as_bytes(), received_at()).unwrap();
            assert_eq!(outcome, Disposition::Skipped { reason: "light_not_on" }, "{payload}");
        }
        assert!(!store.schema_manager().table_exists("ldr_data").unwrap());

        router.route_at("sensor/ldr", br#"{"value": true}"#, received_at()).unwrap();
        assert_eq!(count(&store, "ldr_data"), 1);

        let err = router.route_at("sensor/ldr", br#"{"device_owner": "Anna"}"#, received_at()).unwrap_err();
        assert_eq!(err.kind(), "decode");
    }

    #[test]
    fn test_unknown_owner_for_every_topic() {
        let (router, store, _) = router();
        let messages: [(&str, &[u8]); 4] = [
            ("sensor/ldr", br#"{"value": 1}"#),
            ("esp32/ultrasound_data", br#"{"distance": 2.0}"#),
            ("esp32/empty_box_status", br#"{"status": "empty", "distance": 3.5}"#),
            ("battery/percentage", br#"{"voltage": 3.9, "percentage": 75}"#),
        ];
        for (topic, payload) in messages {
            router.route_at(topic, payload, received_at()).unwrap();
        }
        for table in ["ldr_data", "ultrasound_data", "empty_box_status", "battery_data"] {
            let owner: String = store
                .pool()
                .acquire()
                .query_row(&format!("SELECT device_owner FROM {table}"), [], |row| row.get(0))
                .unwrap();
            assert_eq!(owner, UNKNOWN_OWNER, "table {table}");
        }
    }

    #[test]
    fn test_receipt_time_replaces_producer_time() {
        let (router, store, _) = router();
        router
            .route_at(
                "esp32/ultrasound_data",
                br#"{"distance": 3.2, "device_owner": "Anna", "timestamp": "1999-01-01 00:00:00"}"#,
                received_at(),
            )
            .unwrap();
        let (ts, owner): (String, String) = store
            .pool()
            .acquire()
            .query_row("SELECT timestamp, device_owner FROM ultrasound_data", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap();
        assert_eq!(ts, "2024-11-02 10:30:00");
        assert_eq!(owner, "Anna");
    }

    #[test]
    fn test_battery_string_values_coerced() {
        let (router, store, _) = router();
        router
            .route_at("battery/percentage", br#"{"voltage": "3.6", "percentage": "50"}"#, received_at())
            .unwrap();
        let (voltage, percentage): (f64, i64) = store
            .pool()
            .acquire()
            .query_row("SELECT voltage, percentage FROM battery_data", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap();
        assert_eq!(voltage, 3.6);
        assert_eq!(percentage, 50);
    }

    #[test]
    fn test_decode_failures() {
        let (router, _, _) = router();
        let cases: [(&str, &[u8]); 4] = [
            ("esp32/ultrasound_data", b"not json"),
            ("esp32/ultrasound_data", br#"{"value": 1}"#),
            ("esp32/empty_box_status", br#"{"status": "half"}"#),
            ("sensor/ldr", &[0xff, 0xfe, 0xfd]),
        ];
        for (topic, payload) in cases {
            let err = router.route_at(topic, payload, received_at()).unwrap_err();
            assert_eq!(err.kind(), "decode", "topic {topic}");
        }
    }

    #[test]
    fn test_dropped_table_is_recreated() {
        let (router, store, _) = router();
        router.route_at("esp32/ultrasound_data", br#"{"distance": 1.0}"#, received_at()).unwrap();
        store.pool().acquire().execute_batch("DROP TABLE ultrasound_data").unwrap();

        let outcome =
            router.route_at("esp32/ultrasound_data", br#"{"distance": 2.5}"#, received_at()).unwrap();
        assert_eq!(outcome, Disposition::Persisted { table: "ultrasound_data" });
        assert_eq!(count(&store, "ultrasound_data"), 1);
        let value: f64 = store
            .pool()
            .acquire()
            .query_row("SELECT value FROM ultrasound_data", [], |row| row.get(0))
            .unwrap();
        assert_eq!(value, 2.5);
    }

    #[test]
    fn test_unknown_topic() {
        let (router, _, _) = router();
        let err = router.route_at("esp32/temperature", br#"{"t": 21}"#, received_at()).unwrap_err();
        assert!(matches!(err, IngestError::UnknownTopic(ref t) if t == "esp32/temperature"));
    }

    #[test]
    fn test_box_status_without_distance() {
        let (router, store, _) = router();
        router.route_at("esp32/empty_box_status", br#"{"status": "full"}"#, received_at()).unwrap();
        let (status, distance): (String, Option<f64>) = store
            .pool()
            .acquire()
            .query_row("SELECT status, distance FROM empty_box_status", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap();
        assert_eq!(status, BoxState::Full.as_str());
        assert!(distance.is_none());
    }

    #[test]
    fn test_handle_counts_outcomes() {
        let (router, _, metrics) = router();
        router.handle("sensor/ldr", br#"{"value": 1}"#);
        router.handle("sensor/ldr", br#"{"value": 0}"#);
        router.handle("sensor/ldr", b"{");
        router.handle("nope", b"{}");

        let summary = metrics.report();
        assert_eq!(summary.messages_received, 4);
        assert_eq!(summary.records_persisted, 1);
        assert_eq!(summary.messages_skipped, 1);
        assert_eq!(summary.decode_errors, 1);
        assert_eq!(summary.unknown_topics, 1);
        assert_eq!(summary.dropped_total(), 2);
    }
}
