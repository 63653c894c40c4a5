//! Sensor box telemetry library
//!
//! Edge-side event detection and publishing, and the broker-side router
//! that persists telemetry to SQLite. Shared by both binaries and the
//! integration tests.

pub mod domain;
pub mod infra;
pub mod io;
pub mod services;
