//! Shared types for the telemetry pipeline

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::time::Instant;

/// Owner tag used when a message carries no `device_owner`
pub const UNKNOWN_OWNER: &str = "Unknown";

/// Kind of raw reading produced by the sensor board
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorKind {
    /// Ultrasound distance in cm
    Distance,
    /// Light-dependent resistor ADC count
    Light,
    /// Battery ADC count (before divider/reference scaling)
    BatteryVoltage,
}

impl SensorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorKind::Distance => "distance",
            SensorKind::Light => "light",
            SensorKind::BatteryVoltage => "battery_voltage",
        }
    }
}

/// One raw reading, alive for a single poll cycle
#[derive(Debug, Clone, Copy)]
pub struct SensorSample {
    pub kind: SensorKind,
    pub value: f64,
    pub taken_at: Instant,
}

impl SensorSample {
    #[inline]
    pub fn new(kind: SensorKind, value: f64, taken_at: Instant) -> Self {
        Self { kind, value, taken_at }
    }
}

/// Fill state of the pill box
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoxState {
    Empty,
    Full,
}

impl BoxState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BoxState::Empty => "empty",
            BoxState::Full => "full",
        }
    }
}

impl std::fmt::Display for BoxState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rising light edge (dark -> light)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightEdge {
    /// Raw reading that crossed the threshold
    pub raw: f64,
}

/// Box fill state transition
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxStatus {
    pub state: BoxState,
    pub distance: f64,
}

/// Discrete events produced on the edge device
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DomainEvent {
    LightEdge(LightEdge),
    BoxStatus(BoxStatus),
    BatteryReading { percentage: u8, voltage: f64 },
    DistanceReading { distance: f64 },
}

impl DomainEvent {
    /// Bus topic this event is published on
    pub fn topic(&self) -> Topic {
        match self {
            DomainEvent::LightEdge(_) => Topic::Light,
            DomainEvent::BoxStatus(_) => Topic::BoxStatus,
            DomainEvent::BatteryReading { .. } => Topic::Battery,
            DomainEvent::DistanceReading { .. } => Topic::Distance,
        }
    }

    /// Topic-specific payload fields, without the reserved owner/timestamp keys
    pub fn fields(&self) -> Map<String, Value> {
        let value = match self {
            DomainEvent::LightEdge(_) => json!({ "value": 1 }),
            DomainEvent::BoxStatus(status) => {
                json!({ "status": status.state.as_str(), "distance": status.distance })
            }
            DomainEvent::BatteryReading { percentage, voltage } => {
                json!({ "voltage": voltage, "percentage": percentage })
            }
            DomainEvent::DistanceReading { distance } => json!({ "distance": distance }),
        };
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }
}

/// Closed set of telemetry topics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Light,
    Distance,
    BoxStatus,
    Battery,
}

impl Topic {
    pub const ALL: [Topic; 4] = [Topic::Light, Topic::Distance, Topic::BoxStatus, Topic::Battery];

    /// Resolve a wire topic; `None` for anything outside the closed set
    pub fn parse(topic: &str) -> Option<Self> {
        match topic {
            "sensor/ldr" => Some(Topic::Light),
            "esp32/ultrasound_data" => Some(Topic::Distance),
            "esp32/empty_box_status" => Some(Topic::BoxStatus),
            "battery/percentage" => Some(Topic::Battery),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Light => "sensor/ldr",
            Topic::Distance => "esp32/ultrasound_data",
            Topic::BoxStatus => "esp32/empty_box_status",
            Topic::Battery => "battery/percentage",
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
