//! Services - business logic and state management
//!
//! - `detector` - edge-triggered light / box-status state machines and battery mapping
//! - `sampler` - edge poll loop: read, detect, publish
//! - `router` - ingest dispatch: decode, stamp, persist

pub mod detector;
pub mod router;
pub mod sampler;

// Re-export commonly used types
pub use detector::{EventDetector, PeriodicGate};
pub use router::{Disposition, Router};
pub use sampler::Sampler;
