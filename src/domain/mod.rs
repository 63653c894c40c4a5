//! Domain models - telemetry types and error taxonomy
//!
//! This module contains the canonical data types used throughout the system:
//! - `SensorSample` - raw reading taken during one poll cycle
//! - `DomainEvent` - edge-side events (light edge, box status, periodic readings)
//! - `Topic` - closed set of bus topics
//! - `PersistedRecord` - decoded row destined for storage
//! - `error` - transport / decode / schema / persist errors

pub mod error;
pub mod record;
pub mod types;

// Re-export commonly used types at module level
pub use error::{DecodeError, IngestError, PersistError, PublishError, SchemaError, TransportError};
pub use record::{PersistedRecord, TelemetryRecord};
pub use types::{BoxState, BoxStatus, DomainEvent, LightEdge, SensorKind, SensorSample, Topic};
