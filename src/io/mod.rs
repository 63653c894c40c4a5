//! IO modules - external system interfaces
//!
//! - `mqtt` - MQTT connection setup and the ingest receive loop
//! - `bus` - publish seam used by the edge side (`MqttBus` in production)
//! - `publisher` - owner/timestamp stamping and JSON encoding of events
//! - `sensors` - raw sensor source seam and a simulated board
//! - `store` - SQLite pool, table creation and inserts

pub mod bus;
pub mod mqtt;
pub mod publisher;
pub mod sensors;
pub mod store;

// Re-export commonly used types
pub use bus::{MessageBus, MqttBus};
pub use publisher::{Publisher, TelemetryMessage};
pub use sensors::{SensorSource, SimulatedSensors};
pub use store::Store;
