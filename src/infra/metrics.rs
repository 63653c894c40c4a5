//! Lock-free pipeline counters and periodic reporting
//!
//! All atomics use Relaxed ordering; these are statistical counters only.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Lock-free metrics collector shared by the edge loop and the ingest router
pub struct Metrics {
    /// Messages received from the bus (monotonic)
    messages_received: AtomicU64,
    /// Messages received since last report (reset on report)
    received_since_report: AtomicU64,
    /// Rows inserted (monotonic)
    records_persisted: AtomicU64,
    /// Valid messages intentionally not stored, e.g. ldr value != 1
    messages_skipped: AtomicU64,
    decode_errors: AtomicU64,
    unknown_topics: AtomicU64,
    schema_errors: AtomicU64,
    persist_errors: AtomicU64,
    /// Edge-side publishes accepted by the bus client
    messages_published: AtomicU64,
    publish_failures: AtomicU64,
    last_report_time: Mutex<Instant>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            messages_received: AtomicU64::new(0),
            received_since_report: AtomicU64::new(0),
            records_persisted: AtomicU64::new(0),
            messages_skipped: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            unknown_topics: AtomicU64::new(0),
            schema_errors: AtomicU64::new(0),
            persist_errors: AtomicU64::new(0),
            messages_published: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            last_report_time: Mutex::new(Instant::now()),
        }
    }

    #[inline]
    pub fn record_message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.received_since_report.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_persisted(&self) {
        self.records_persisted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_skipped(&self) {
        self.messages_skipped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_unknown_topic(&self) {
        self.unknown_topics.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_schema_error(&self) {
        self.schema_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_persist_error(&self) {
        self.persist_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_published(&self) {
        self.messages_published.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_publish_failure(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    pub fn records_persisted(&self) -> u64 {
        self.records_persisted.load(Ordering::Relaxed)
    }

    pub fn messages_published(&self) -> u64 {
        self.messages_published.load(Ordering::Relaxed)
    }

    /// Snapshot counters; resets the per-interval receive count
    pub fn report(&self) -> MetricsSummary {
        let now = Instant::now();
        let elapsed_secs = {
            let mut last = self.last_report_time.lock();
            let elapsed = now.duration_since(*last).as_secs_f64();
            *last = now;
            elapsed
        };

        let received_interval = self.received_since_report.swap(0, Ordering::Relaxed);
        let messages_per_sec =
            if elapsed_secs > 0.0 { received_interval as f64 / elapsed_secs } else { 0.0 };

        MetricsSummary {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_per_sec,
            records_persisted: self.records_persisted.load(Ordering::Relaxed),
            messages_skipped: self.messages_skipped.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            unknown_topics: self.unknown_topics.load(Ordering::Relaxed),
            schema_errors: self.schema_errors.load(Ordering::Relaxed),
            persist_errors: self.persist_errors.load(Ordering::Relaxed),
            messages_published: self.messages_published.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of [`Metrics`]
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub messages_received: u64,
    pub messages_per_sec: f64,
    pub records_persisted: u64,
    pub messages_skipped: u64,
    pub decode_errors: u64,
    pub unknown_topics: u64,
    pub schema_errors: u64,
    pub persist_errors: u64,
    pub messages_published: u64,
    pub publish_failures: u64,
}

impl MetricsSummary {
    /// Messages that reached the router but were not stored because of an error
    pub fn dropped_total(&self) -> u64 {
        self.decode_errors + self.unknown_topics + self.schema_errors + self.persist_errors
    }

    pub fn log(&self) {
        info!(
            received = %self.messages_received,
            msgs_per_sec = format!("{:.2}", self.messages_per_sec),
            persisted = %self.records_persisted,
            skipped = %self.messages_skipped,
            dropped = %self.dropped_total(),
            decode_errors = %self.decode_errors,
            unknown_topics = %self.unknown_topics,
            schema_errors = %self.schema_errors,
            persist_errors = %self.persist_errors,
            published = %self.messages_published,
            publish_failures = %self.publish_failures,
            "metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = Metrics::new();
        assert_eq!(metrics.messages_received(), 0);
        assert_eq!(metrics.records_persisted(), 0);
        assert_eq!(metrics.messages_published(), 0);
    }

    #[test]
    fn test_report_counts_and_reset() {
        let metrics = Metrics::new();
        metrics.record_message_received();
        metrics.record_message_received();
        metrics.record_persisted();
        metrics.record_decode_error();

        let summary = metrics.report();
        assert_eq!(summary.messages_received, 2);
        assert_eq!(summary.records_persisted, 1);
        assert_eq!(summary.dropped_total(), 1);

        // Interval counter resets, totals do not
        assert_eq!(metrics.received_since_report.load(Ordering::Relaxed), 0);
        let summary = metrics.report();
        assert_eq!(summary.messages_received, 2);
    }

    #[test]
    fn test_dropped_total_sums_error_kinds() {
        let metrics = Metrics::new();
        metrics.record_unknown_topic();
        metrics.record_schema_error();
        metrics.record_persist_error();
        metrics.record_skipped();
        let summary = metrics.report();
        assert_eq!(summary.dropped_total(), 3);
        assert_eq!(summary.messages_skipped, 1);
    }
}
