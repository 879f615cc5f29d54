//! Prometheus metrics for rollcall

use crate::error::{Result, RollcallError};
use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramVec, TextEncoder, register_counter_vec,
    register_gauge_vec, register_histogram_vec,
};
use parking_lot::Mutex;
use std::sync::OnceLock;
use std::time::Duration;

/// Global metrics instance
static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Serializes first-time registration with the global registry
static INIT: Mutex<()> = Mutex::new(());

/// All rollcall metrics
pub struct Metrics {
    // ─────────────────────────────────────────────────────────────────────────
    // Passes
    // ─────────────────────────────────────────────────────────────────────────
    /// Reconciliation passes (by source, outcome)
    pub passes_total: CounterVec,

    /// Pass duration in seconds (by source)
    pub pass_duration_seconds: HistogramVec,

    /// Live instances seen in the last completed pass (by source)
    pub live_instances: GaugeVec,

    // ─────────────────────────────────────────────────────────────────────────
    // Instance operations
    // ─────────────────────────────────────────────────────────────────────────
    /// Registrations that changed the instance store (by source)
    pub registrations_total: CounterVec,

    /// Instances a pass confirmed live, changed or not (by source)
    pub confirmed_instances_total: CounterVec,

    /// Stale instances deregistered (by source)
    pub deregistrations_total: CounterVec,

    /// Failures (by source, kind)
    pub failures_total: CounterVec,

    // ─────────────────────────────────────────────────────────────────────────
    // Triggers
    // ─────────────────────────────────────────────────────────────────────────
    /// Trigger events received (by event)
    pub triggers_total: CounterVec,

    /// Triggers folded into an already pending pass (by source)
    pub coalesced_triggers_total: CounterVec,

    /// Heartbeats that did not change a source's fingerprint (by source)
    pub skipped_heartbeats_total: CounterVec,
}

impl Metrics {
    /// Initialize metrics (call once at startup)
    ///
    /// Returns error if metric registration fails.
    pub fn init() -> Result<&'static Metrics> {
        if let Some(metrics) = METRICS.get() {
            return Ok(metrics);
        }
        let _guard = INIT.lock();
        if let Some(metrics) = METRICS.get() {
            return Ok(metrics);
        }

        let metrics = Metrics {
            passes_total: register_counter_vec!(
                "rollcall_passes_total",
                "Total reconciliation passes",
                &["source", "outcome"]
            )
            .map_err(|e| RollcallError::Metrics(format!("passes_total: {e}")))?,

            pass_duration_seconds: register_histogram_vec!(
                "rollcall_pass_duration_seconds",
                "Time spent in one reconciliation pass",
                &["source"],
                // Buckets: 1ms to 60s
                vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0]
            )
            .map_err(|e| RollcallError::Metrics(format!("pass_duration_seconds: {e}")))?,

            live_instances: register_gauge_vec!(
                "rollcall_live_instances",
                "Instances registered by the last completed pass",
                &["source"]
            )
            .map_err(|e| RollcallError::Metrics(format!("live_instances: {e}")))?,

            registrations_total: register_counter_vec!(
                "rollcall_registrations_total",
                "Total registrations that created or changed an instance record",
                &["source"]
            )
            .map_err(|e| RollcallError::Metrics(format!("registrations_total: {e}")))?,

            confirmed_instances_total: register_counter_vec!(
                "rollcall_confirmed_instances_total",
                "Total instances confirmed live by reconciliation passes",
                &["source"]
            )
            .map_err(|e| RollcallError::Metrics(format!("confirmed_instances_total: {e}")))?,

            deregistrations_total: register_counter_vec!(
                "rollcall_deregistrations_total",
                "Total stale instances deregistered",
                &["source"]
            )
            .map_err(|e| RollcallError::Metrics(format!("deregistrations_total: {e}")))?,

            failures_total: register_counter_vec!(
                "rollcall_failures_total",
                "Total reconciliation failures",
                &["source", "kind"]
            )
            .map_err(|e| RollcallError::Metrics(format!("failures_total: {e}")))?,

            triggers_total: register_counter_vec!(
                "rollcall_triggers_total",
                "Total trigger events received",
                &["event"]
            )
            .map_err(|e| RollcallError::Metrics(format!("triggers_total: {e}")))?,

            coalesced_triggers_total: register_counter_vec!(
                "rollcall_coalesced_triggers_total",
                "Triggers folded into an already pending pass",
                &["source"]
            )
            .map_err(|e| RollcallError::Metrics(format!("coalesced_triggers_total: {e}")))?,

            skipped_heartbeats_total: register_counter_vec!(
                "rollcall_skipped_heartbeats_total",
                "Heartbeats that left the source fingerprint unchanged",
                &["source"]
            )
            .map_err(|e| RollcallError::Metrics(format!("skipped_heartbeats_total: {e}")))?,
        };

        // Set the metrics (only succeeds once)
        let _ = METRICS.set(metrics);

        METRICS
            .get()
            .ok_or_else(|| RollcallError::Metrics("Failed to initialize metrics".to_string()))
    }

    /// Get the global metrics instance
    ///
    /// Returns None if metrics haven't been initialized yet.
    pub fn get() -> Option<&'static Metrics> {
        METRICS.get()
    }

    /// Record a finished pass
    pub fn record_pass(&self, source: &str, outcome: &str, duration: Duration) {
        self.passes_total
            .with_label_values(&[source, outcome])
            .inc();
        self.pass_duration_seconds
            .with_label_values(&[source])
            .observe(duration.as_secs_f64());
    }

    /// Update the live instance gauge of a source
    pub fn set_live_instances(&self, source: &str, count: usize) {
        self.live_instances
            .with_label_values(&[source])
            .set(count as f64);
    }

    /// Record one registration that wrote to the instance store
    pub fn record_registration(&self, source: &str) {
        self.registrations_total.with_label_values(&[source]).inc();
    }

    /// Record the live set a pass confirmed
    pub fn record_confirmed(&self, source: &str, count: usize) {
        if count > 0 {
            self.confirmed_instances_total
                .with_label_values(&[source])
                .inc_by(count as f64);
        }
    }

    /// Record deregistrations
    pub fn record_deregistrations(&self, source: &str, count: usize) {
        if count > 0 {
            self.deregistrations_total
                .with_label_values(&[source])
                .inc_by(count as f64);
        }
    }

    /// Record failures of one kind
    pub fn record_failures(&self, source: &str, kind: &str, count: usize) {
        if count > 0 {
            self.failures_total
                .with_label_values(&[source, kind])
                .inc_by(count as f64);
        }
    }

    /// Record a received trigger event
    pub fn record_trigger(&self, event: &str) {
        self.triggers_total.with_label_values(&[event]).inc();
    }

    /// Record a trigger folded into a pending pass
    pub fn record_coalesced(&self, source: &str) {
        self.coalesced_triggers_total
            .with_label_values(&[source])
            .inc();
    }

    /// Record a heartbeat that changed nothing
    pub fn record_skipped_heartbeat(&self, source: &str) {
        self.skipped_heartbeats_total
            .with_label_values(&[source])
            .inc();
    }
}

/// Gather all metrics and encode as Prometheus text format
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_ok() {
        String::from_utf8(buffer).unwrap_or_default()
    } else {
        String::new()
    }
}

/// Helper to record a trigger if metrics are initialized, otherwise skip
pub fn try_record_trigger(event: &str) {
    if let Some(m) = Metrics::get() {
        m.record_trigger(event);
    }
}

/// Helper to record a store-changing registration if metrics are initialized
pub fn try_record_registration(source: &str) {
    if let Some(m) = Metrics::get() {
        m.record_registration(source);
    }
}

/// Helper to record a coalesced trigger if metrics are initialized
pub fn try_record_coalesced(source: &str) {
    if let Some(m) = Metrics::get() {
        m.record_coalesced(source);
    }
}

/// Helper to record a skipped heartbeat if metrics are initialized
pub fn try_record_skipped_heartbeat(source: &str) {
    if let Some(m) = Metrics::get() {
        m.record_skipped_heartbeat(source);
    }
}
