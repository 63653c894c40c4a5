//! Edge-side event detection
//!
//! Turns raw samples into discrete events. Light and box status are
//! edge-triggered: each holds a single state bit and only emits when that
//! bit flips. Distance and battery readings are periodic and gated by
//! [`PeriodicGate`] in the sampler, not here.
//!
//! Inputs are not validated. NaN compares false against every threshold, so
//! it reads as "dark" / "full" and falls through the battery mapping as 0.

use crate::domain::types::{BoxState, BoxStatus, DomainEvent, LightEdge, SensorKind, SensorSample};
use std::time::{Duration, Instant};
use tracing::debug;

/// Rising-edge detector for the light sensor
#[derive(Debug, Clone)]
pub struct LightDetector {
    threshold: f64,
    above: bool,
}

impl LightDetector {
    pub fn new(threshold: f64) -> Self {
        Self { threshold, above: false }
    }

    /// Emits only on a dark -> light transition; state is updated on every call
    pub fn observe(&mut self, raw: f64) -> Option<LightEdge> {
        let above = raw > self.threshold;
        let rising = above && !self.above;
        if self.above && !above {
            debug!(raw = %raw, "light_reset");
        }
        self.above = above;
        rising.then_some(LightEdge { raw })
    }

    pub fn is_lit(&self) -> bool {
        self.above
    }
}

/// Empty/full transition detector for the ultrasound distance
#[derive(Debug, Clone)]
pub struct BoxStatusDetector {
    threshold_cm: f64,
    empty: bool,
}

impl BoxStatusDetector {
    /// Starts in the Full state, so a box that is full at boot emits nothing
    pub fn new(threshold_cm: f64) -> Self {
        Self { threshold_cm, empty: false }
    }

    /// Emits on every flip, in either direction
    pub fn observe(&mut self, distance: f64) -> Option<BoxStatus> {
        let empty = distance > self.threshold_cm;
        if empty == self.empty {
            return None;
        }
        self.empty = empty;
        let state = if empty { BoxState::Empty } else { BoxState::Full };
        Some(BoxStatus { state, distance })
    }

    pub fn state(&self) -> BoxState {
        if self.empty {
            BoxState::Empty
        } else {
            BoxState::Full
        }
    }
}

/// Clamped linear mapping of voltage onto 0..=100
pub fn battery_percent(voltage: f64, min_v: f64, max_v: f64) -> u8 {
    if voltage >= max_v {
        100
    } else if voltage <= min_v {
        0
    } else {
        // Saturating cast: NaN maps to 0
        (100.0 * (voltage - min_v) / (max_v - min_v)).floor() as u8
    }
}

/// Scale a raw battery ADC count to volts at the cell
pub fn adc_to_voltage(raw: f64, adc_max: f64, reference_voltage: f64, divider_ratio: f64) -> f64 {
    (raw / adc_max) * reference_voltage * divider_ratio
}

/// Monotonic publish gate: `now - last_publish >= interval`
#[inline]
pub fn should_publish_periodic(now: Instant, last_publish: Instant, interval: Duration) -> bool {
    now.saturating_duration_since(last_publish) >= interval
}

/// Tracks the last successful publish for one periodic stream
///
/// The caller marks the gate only after a publish actually went out, so a
/// stalled or failing bus delays the next period instead of skipping it.
#[derive(Debug, Clone)]
pub struct PeriodicGate {
    interval: Duration,
    last_publish: Option<Instant>,
}

impl PeriodicGate {
    /// First publish due one full interval after `now`
    pub fn starting_at(interval: Duration, now: Instant) -> Self {
        Self { interval, last_publish: Some(now) }
    }

    /// First publish due immediately
    pub fn immediate(interval: Duration) -> Self {
        Self { interval, last_publish: None }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        match self.last_publish {
            Some(last) => should_publish_periodic(now, last, self.interval),
            None => true,
        }
    }

    pub fn mark_published(&mut self, now: Instant) {
        self.last_publish = Some(now);
    }
}

/// Per-device detector state; one instance per physical unit
#[derive(Debug, Clone)]
pub struct EventDetector {
    light: LightDetector,
    box_status: BoxStatusDetector,
}

impl EventDetector {
    pub fn new(light_threshold: f64, empty_box_threshold_cm: f64) -> Self {
        Self {
            light: LightDetector::new(light_threshold),
            box_status: BoxStatusDetector::new(empty_box_threshold_cm),
        }
    }

    pub fn observe_light(&mut self, raw: f64) -> Option<LightEdge> {
        self.light.observe(raw)
    }

    pub fn observe_box_status(&mut self, distance: f64) -> Option<BoxStatus> {
        self.box_status.observe(distance)
    }

    /// Route a sample to its edge detector
    ///
    /// Battery samples never produce an edge event.
    pub fn observe(&mut self, sample: &SensorSample) -> Option<DomainEvent> {
        match sample.kind {
            SensorKind::Light => self.observe_light(sample.value).map(DomainEvent::LightEdge),
            SensorKind::Distance => {
                self.observe_box_status(sample.value).map(DomainEvent::BoxStatus)
            }
            SensorKind::BatteryVoltage => None,
        }
    }

    pub fn is_lit(&self) -> bool {
        self.light.is_lit()
    }

    pub fn box_state(&self) -> BoxState {
        self.box_status.state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn light_edges(readings: &[f64]) -> Vec<usize> {
        let mut detector = LightDetector::new(1000.0);
        readings
            .iter()
            .enumerate()
            .filter_map(|(i, &raw)| detector.observe(raw).map(|_| i))
            .collect()
    }

    #[test]
    fn test_light_rising_edge_only() {
        assert_eq!(light_edges(&[10.0, 1500.0, 1600.0, 200.0, 1200.0]), vec![1, 4]);
    }

    #[test]
    fn test_light_same_side_never_reemits() {
        assert!(light_edges(&[0.0, 500.0, 999.0, 1000.0]).is_empty());
        assert_eq!(light_edges(&[2000.0, 2000.0, 2000.0]), vec![0]);
    }

    #[test]
    fn test_light_threshold_is_strict() {
        // Equal to threshold is not "above"
        assert!(light_edges(&[1000.0]).is_empty());
        assert_eq!(light_edges(&[1000.0, 1000.5]), vec![1]);
    }

    #[test]
    fn test_light_falling_edge_resets_silently() {
        let mut detector = LightDetector::new(1000.0);
        assert!(detector.observe(1500.0).is_some());
        assert!(detector.is_lit());
        assert!(detector.observe(100.0).is_none());
        assert!(!detector.is_lit());
        assert!(detector.observe(1500.0).is_some());
    }

    #[test]
    fn test_box_status_transitions() {
        let mut detector = BoxStatusDetector::new(2.9);
        let events: Vec<(usize, BoxState)> = [1.0, 1.0, 3.5, 3.5, 1.0]
            .iter()
            .enumerate()
            .filter_map(|(i, &d)| detector.observe(d).map(|s| (i, s.state)))
            .collect();
        assert_eq!(events, vec![(2, BoxState::Empty), (4, BoxState::Full)]);
    }

    #[test]
    fn test_box_status_threshold_boundary() {
        let mut detector = BoxStatusDetector::new(2.9);
        // Exactly at threshold counts as full
        assert!(detector.observe(2.9).is_none());
        let status = detector.observe(2.91).unwrap();
        assert_eq!(status.state, BoxState::Empty);
        assert_eq!(status.distance, 2.91);
        let status = detector.observe(2.9).unwrap();
        assert_eq!(status.state, BoxState::Full);
    }

    #[test]
    fn test_box_status_starts_full() {
        let detector = BoxStatusDetector::new(2.9);
        assert_eq!(detector.state(), BoxState::Full);
    }

    #[test]
    fn test_battery_percent() {
        assert_eq!(battery_percent(4.2, 3.0, 4.2), 100);
        assert_eq!(battery_percent(3.0, 3.0, 4.2), 0);
        assert_eq!(battery_percent(3.6, 3.0, 4.2), 50);
        assert_eq!(battery_percent(5.0, 3.0, 4.2), 100);
        assert_eq!(battery_percent(2.0, 3.0, 4.2), 0);
        // Floors rather than rounds
        assert_eq!(battery_percent(3.599, 3.0, 4.2), 49);
    }

    #[test]
    fn test_battery_percent_nan() {
        assert_eq!(battery_percent(f64::NAN, 3.0, 4.2), 0);
    }

    #[test]
    fn test_adc_to_voltage() {
        let v = adc_to_voltage(4095.0, 4095.0, 3.3, 2.0);
        assert!((v - 6.6).abs() < 1e-9);
        assert_eq!(adc_to_voltage(0.0, 4095.0, 3.3, 2.0), 0.0);
    }

    #[test]
    fn test_should_publish_periodic() {
        let start = Instant::now();
        let interval = Duration::from_secs(10);
        assert!(!should_publish_periodic(start + Duration::from_secs(9), start, interval));
        assert!(should_publish_periodic(start + Duration::from_secs(10), start, interval));
        assert!(should_publish_periodic(start + Duration::from_secs(25), start, interval));
        // Clock earlier than last publish never fires
        assert!(!should_publish_periodic(start, start + Duration::from_secs(1), interval));
    }

    #[test]
    fn test_periodic_gate_marks_only_on_publish() {
        let start = Instant::now();
        let mut gate = PeriodicGate::starting_at(Duration::from_secs(10), start);
        assert!(!gate.is_due(start + Duration::from_secs(5)));
        assert!(gate.is_due(start + Duration::from_secs(10)));
        // Not marked: still due on the next poll
        assert!(gate.is_due(start + Duration::from_secs(11)));
        gate.mark_published(start + Duration::from_secs(11));
        assert!(!gate.is_due(start + Duration::from_secs(12)));
        assert!(gate.is_due(start + Duration::from_secs(21)));
    }

    #[test]
    fn test_periodic_gate_immediate() {
        let gate = PeriodicGate::immediate(Duration::from_secs(1));
        assert!(gate.is_due(Instant::now()));
    }

    #[test]
    fn test_event_detector_routes_samples() {
        let mut detector = EventDetector::new(1000.0, 2.9);
        let now = Instant::now();

        let event = detector.observe(&SensorSample::new(SensorKind::Light, 1500.0, now));
        assert!(matches!(event, Some(DomainEvent::LightEdge(_))));

        let event = detector.observe(&SensorSample::new(SensorKind::Distance, 4.0, now));
        assert!(matches!(
            event,
            Some(DomainEvent::BoxStatus(BoxStatus { state: BoxState::Empty, .. }))
        ));
        assert_eq!(detector.box_state(), BoxState::Empty);

        let event = detector.observe(&SensorSample::new(SensorKind::BatteryVoltage, 2000.0, now));
        assert!(event.is_none());
    }

    #[test]
    fn test_detectors_are_independent_per_device() {
        let mut a = EventDetector::new(1000.0, 2.9);
        let mut b = EventDetector::new(1000.0, 2.9);
        assert!(a.observe_light(1500.0).is_some());
        assert!(b.observe_light(1500.0).is_some());
        assert!(a.observe_light(1500.0).is_none());
        assert!(a.is_lit() && b.is_lit());
    }
}
