//! Prometheus metrics for a detection run
//!
//! Each [`DetectionMetrics`] owns its registry, so concurrent runs (and
//! tests) never share counters.

use std::time::Duration;

use prometheus::{
    histogram_opts, opts, Encoder, HistogramVec, IntCounterVec, IntGaugeVec, Registry,
    TextEncoder,
};

use crate::record::HardwareClass;

/// Metrics recorded while probing and arbitrating
pub struct DetectionMetrics {
    registry: Registry,
    probe_duration: HistogramVec,
    probe_errors: IntCounterVec,
    hardware_available: IntGaugeVec,
    backend_selected: IntGaugeVec,
}

impl DetectionMetrics {
    /// Create a fresh registry with every metric registered
    pub fn new() -> Self {
        let registry = Registry::new();

        let probe_duration = HistogramVec::new(
            histogram_opts!(
                "hwdetect_probe_duration_seconds",
                "Duration of individual probe methods",
                vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
            ),
            &["class", "method"],
        )
        .expect("Failed to create probe_duration metric");

        let probe_errors = IntCounterVec::new(
            opts!(
                "hwdetect_probe_errors_total",
                "Probe methods that failed with an environment error"
            ),
            &["class", "method"],
        )
        .expect("Failed to create probe_errors metric");

        let hardware_available = IntGaugeVec::new(
            opts!(
                "hwdetect_hardware_available",
                "Whether a hardware class was detected (1) or not (0)"
            ),
            &["class"],
        )
        .expect("Failed to create hardware_available metric");

        let backend_selected = IntGaugeVec::new(
            opts!(
                "hwdetect_backend_selected",
                "Backend recommended for each consumer"
            ),
            &["consumer", "backend"],
        )
        .expect("Failed to create backend_selected metric");

        for collector in [
            Box::new(probe_duration.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(probe_errors.clone()),
            Box::new(hardware_available.clone()),
            Box::new(backend_selected.clone()),
        ] {
            registry
                .register(collector)
                .expect("Failed to register metric");
        }

        Self {
            registry,
            probe_duration,
            probe_errors,
            hardware_available,
            backend_selected,
        }
    }

    /// Record how long a probe method took
    pub fn observe_probe(&self, class: HardwareClass, method: &str, elapsed: Duration) {
        self.probe_duration
            .with_label_values(&[&class.to_string(), method])
            .observe(elapsed.as_secs_f64());
    }

    /// Count a probe method that failed with an environment error
    pub fn record_probe_error(&self, class: HardwareClass, method: &str) {
        self.probe_errors
            .with_label_values(&[&class.to_string(), method])
            .inc();
    }

    /// Set the availability gauge of a class
    pub fn set_available(&self, class: HardwareClass, available: bool) {
        self.hardware_available
            .with_label_values(&[&class.to_string()])
            .set(available as i64);
    }

    /// Mark `backend` as the selected backend for `consumer`
    pub fn set_backend(&self, consumer: &str, backend: &str) {
        self.backend_selected
            .with_label_values(&[consumer, backend])
            .set(1);
    }

    /// Render the registry in the Prometheus text format
    pub fn export(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!(error = %e, "Failed to encode metrics");
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

impl Default for DetectionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DetectionMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectionMetrics").finish_non_exhaustive()
    }
}
