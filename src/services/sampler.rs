//! Edge sampling loop
//!
//! One iteration reads distance, light and battery in that order, feeds the
//! detectors and publishes whatever is due. A failed publish is logged and
//! the loop carries on; nothing is retried or buffered.

use crate::domain::types::{DomainEvent, SensorKind, SensorSample};
use crate::infra::config::{BatteryConfig, Config};
use crate::io::bus::MessageBus;
use crate::io::publisher::Publisher;
use crate::io::sensors::SensorSource;
use crate::services::detector::{adc_to_voltage, battery_percent, EventDetector, PeriodicGate};
use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub struct Sampler<S: SensorSource, B: MessageBus> {
    source: S,
    detector: EventDetector,
    publisher: Publisher<B>,
    distance_gate: PeriodicGate,
    battery_gate: PeriodicGate,
    battery: BatteryConfig,
    poll_interval: Duration,
}

impl<S: SensorSource, B: MessageBus> Sampler<S, B> {
    /// Distance readings first go out one interval after `now`; battery on the first poll
    pub fn new(config: &Config, source: S, publisher: Publisher<B>, now: Instant) -> Self {
        Self {
            source,
            detector: EventDetector::new(config.light_threshold(), config.empty_box_threshold_cm()),
            publisher,
            distance_gate: PeriodicGate::starting_at(config.distance_publish_interval(), now),
            battery_gate: PeriodicGate::immediate(config.battery_publish_interval()),
            battery: config.battery().clone(),
            poll_interval: config.poll_interval(),
        }
    }

    pub fn detector(&self) -> &EventDetector {
        &self.detector
    }

    /// Run one sampling iteration; returns the events that were published
    pub async fn poll_once(&mut self, now: Instant, wall: DateTime<Utc>) -> Vec<DomainEvent> {
        let mut published = Vec::new();

        match self.source.read(SensorKind::Distance) {
            Some(distance) => {
                let sample = SensorSample::new(SensorKind::Distance, distance, now);
                if self.distance_gate.is_due(sample.taken_at) {
                    let event = DomainEvent::DistanceReading { distance };
                    if self.send(&event, wall, &mut published).await {
                        self.distance_gate.mark_published(sample.taken_at);
                    }
                }
                if let Some(event) = self.detector.observe(&sample) {
                    info!(state = %self.detector.box_state(), distance = %distance, "box_status_changed");
                    self.send(&event, wall, &mut published).await;
                }
            }
            None => warn!("distance_no_echo"),
        }

        if let Some(raw) = self.source.read(SensorKind::Light) {
            let sample = SensorSample::new(SensorKind::Light, raw, now);
            if let Some(event) = self.detector.observe(&sample) {
                info!(raw = %raw, "light_detected");
                self.send(&event, wall, &mut published).await;
            }
        }

        if let Some(raw) = self.source.read(SensorKind::BatteryVoltage) {
            let sample = SensorSample::new(SensorKind::BatteryVoltage, raw, now);
            if self.battery_gate.is_due(sample.taken_at) {
                let b = &self.battery;
                let voltage = adc_to_voltage(sample.value, b.adc_max, b.adc_reference_voltage, b.divider_ratio);
                let percentage = battery_percent(voltage, b.min_voltage, b.max_voltage);
                let event = DomainEvent::BatteryReading { percentage, voltage };
                if self.send(&event, wall, &mut published).await {
                    self.battery_gate.mark_published(sample.taken_at);
                }
            }
        }

        published
    }

    async fn send(&self, event: &DomainEvent, wall: DateTime<Utc>, published: &mut Vec<DomainEvent>) -> bool {
        match self.publisher.publish_event(event, wall).await {
            Ok(()) => {
                published.push(*event);
                true
            }
            Err(e) => {
                warn!(topic = %event.topic(), error = %e, "publish_failed");
                false
            }
        }
    }

    /// Poll until the shutdown flag flips
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_interval_ms = %self.poll_interval.as_millis(),
            device_owner = %self.publisher.device_owner(),
            "sampler_started"
        );

        loop {
            let published = self.poll_once(Instant::now(), Utc::now()).await;
            if !published.is_empty() {
                debug!(count = %published.len(), "events_published");
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("sampler_shutdown");
                        return;
                    }
                }
            }
        }
    }
}
