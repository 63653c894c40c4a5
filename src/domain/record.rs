//! Wire payloads and persisted record model
//!
//! Inbound JSON is decoded into one payload struct per topic. Unknown keys
//! (including the producer-side `timestamp`) are ignored; the router stamps
//! its own receipt time.

use crate::domain::types::{BoxState, Topic, UNKNOWN_OWNER};
use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer};

/// Storage format for the `timestamp` column
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// `value` must be present but may be any JSON value; only "on" is stored
#[derive(Debug, Deserialize)]
pub struct LightPayload {
    pub value: serde_json::Value,
    #[serde(default)]
    pub device_owner: Option<String>,
}

impl LightPayload {
    /// A numeric 1 (integer or float) or `true`
    pub fn is_on(&self) -> bool {
        match &self.value {
            serde_json::Value::Number(n) => n.as_f64() == Some(1.0),
            serde_json::Value::Bool(b) => *b,
            _ => false,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DistancePayload {
    pub distance: f64,
    #[serde(default)]
    pub device_owner: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BoxStatusPayload {
    pub status: BoxState,
    #[serde(default)]
    pub distance: Option<f64>,
    #[serde(default)]
    pub device_owner: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BatteryPayload {
    #[serde(deserialize_with = "deserialize_lenient_f64")]
    pub voltage: f64,
    #[serde(deserialize_with = "deserialize_lenient_i64")]
    pub percentage: i64,
    #[serde(default)]
    pub device_owner: Option<String>,
}

/// Topic-specific columns of one stored row
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryRecord {
    Light { value: i64 },
    Distance { distance: f64 },
    BoxStatus { status: BoxState, distance: Option<f64> },
    Battery { voltage: f64, percentage: i64 },
}

impl TelemetryRecord {
    pub fn topic(&self) -> Topic {
        match self {
            TelemetryRecord::Light { .. } => Topic::Light,
            TelemetryRecord::Distance { .. } => Topic::Distance,
            TelemetryRecord::BoxStatus { .. } => Topic::BoxStatus,
            TelemetryRecord::Battery { .. } => Topic::Battery,
        }
    }
}

/// A decoded record ready for insertion
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedRecord {
    pub timestamp: NaiveDateTime,
    pub device_owner: String,
    pub reading: TelemetryRecord,
}

impl PersistedRecord {
    pub fn new(reading: TelemetryRecord, device_owner: Option<String>, timestamp: NaiveDateTime) -> Self {
        Self { timestamp, device_owner: resolve_owner(device_owner), reading }
    }

    pub fn formatted_timestamp(&self) -> String {
        self.timestamp.format(TIMESTAMP_FORMAT).to_string()
    }
}

/// Absent owner falls back to [`UNKNOWN_OWNER`]
pub fn resolve_owner(device_owner: Option<String>) -> String {
    device_owner.unwrap_or_else(|| UNKNOWN_OWNER.to_string())
}

/// Accepts a JSON number or a numeric string
fn deserialize_lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::{self, Visitor};

    struct F64Visitor;

    impl<'de> Visitor<'de> for F64Visitor {
        type Value = f64;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a number or numeric string")
        }

        fn visit_f64<E: de::Error>(self, value: f64) -> Result<f64, E> {
            Ok(value)
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<f64, E> {
            Ok(value as f64)
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<f64, E> {
            Ok(value as f64)
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<f64, E> {
            value.trim().parse::<f64>().map_err(|_| E::invalid_value(de::Unexpected::Str(value), &self))
        }
    }

    deserializer.deserialize_any(F64Visitor)
}

/// Accepts an integer, a float (truncated toward zero) or an integer string
fn deserialize_lenient_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::{self, Visitor};

    struct I64Visitor;

    impl<'de> Visitor<'de> for I64Visitor {
        type Value = i64;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("an integer or integer string")
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<i64, E> {
            Ok(value)
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<i64, E> {
            i64::try_from(value).map_err(|_| E::invalid_value(de::Unexpected::Unsigned(value), &self))
        }

        fn visit_f64<E: de::Error>(self, value: f64) -> Result<i64, E> {
            if value.is_finite() {
                Ok(value.trunc() as i64)
            } else {
                Err(E::invalid_value(de::Unexpected::Float(value), &self))
            }
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<i64, E> {
            value.trim().parse::<i64>().map_err(|_| E::invalid_value(de::Unexpected::Str(value), &self))
        }
    }

    deserializer.deserialize_any(I64Visitor)
}
