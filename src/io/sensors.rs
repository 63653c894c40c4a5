//! Sensor source seam
//!
//! Pin I/O and ADC drivers live outside this crate; the sampler only needs
//! a raw scalar per sensor kind. `SimulatedSensors` stands in for the board
//! when running the edge loop on a workstation.

use crate::domain::types::SensorKind;

/// Supplies raw readings on demand
pub trait SensorSource: Send {
    /// Raw value for `kind`, or `None` when the sensor produced nothing
    /// (e.g. no ultrasound echo before the pulse timeout)
    fn read(&mut self, kind: SensorKind) -> Option<f64>;
}

/// Deterministic stand-in for the ESP32 sensor board
///
/// One "tick" per distance read. Over a 60-tick cycle the box is full for
/// 30 ticks then empty for 30; the lid light pulses on for 3 ticks in every
/// 20; every 17th distance read is a missing echo; the battery ADC count
/// drains from a full cell to empty and wraps.
#[derive(Debug, Clone, Default)]
pub struct SimulatedSensors {
    tick: u64,
}

const FULL_DISTANCE_CM: f64 = 1.5;
const EMPTY_DISTANCE_CM: f64 = 4.0;
const LIGHT_ON_RAW: f64 = 1800.0;
const LIGHT_OFF_RAW: f64 = 300.0;
/// ADC counts for ~4.2 V and ~3.0 V behind a 1:2 divider at 3.3 V reference
const BATTERY_FULL_RAW: u64 = 2606;
const BATTERY_EMPTY_RAW: u64 = 1861;

impl SimulatedSensors {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SensorSource for SimulatedSensors {
    fn read(&mut self, kind: SensorKind) -> Option<f64> {
        match kind {
            SensorKind::Distance => {
                self.tick += 1;
                if self.tick % 17 == 0 {
                    return None;
                }
                let distance =
                    if self.tick % 60 < 30 { FULL_DISTANCE_CM } else { EMPTY_DISTANCE_CM };
                Some(distance)
            }
            SensorKind::Light => {
                let lit = (5..8).contains(&(self.tick % 20));
                Some(if lit { LIGHT_ON_RAW } else { LIGHT_OFF_RAW })
            }
            SensorKind::BatteryVoltage => {
                let span = BATTERY_FULL_RAW - BATTERY_EMPTY_RAW;
                Some((BATTERY_FULL_RAW - self.tick % span) as f64)
            }
        }
    }
}
