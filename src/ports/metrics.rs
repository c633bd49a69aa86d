//! Metrics port. Component code depends only on this trait; the concrete exporter
//! (the `metrics` crate facade + Prometheus) is wired once in `main.rs`.
//!
//! Emission is always non-blocking and best-effort: a full channel or a down sink
//! drops the event rather than stalling business logic (SPEC_FULL §5).

pub trait Metrics: Send + Sync {
    fn counter(&self, name: &'static str, value: u64, labels: &[(&'static str, &str)]);

    fn gauge(&self, name: &'static str, value: f64, labels: &[(&'static str, &str)]);

    fn histogram(&self, name: &'static str, value: f64, labels: &[(&'static str, &str)]);

    fn increment(&self, name: &'static str, labels: &[(&'static str, &str)]) {
        self.counter(name, 1, labels);
    }
}

/// A `Metrics` implementation that discards every event. Useful for tests and for
/// any binary entrypoint that does not want to stand up a Prometheus exporter.
#[derive(Debug, Default)]
pub struct NoopMetrics;

impl Metrics for NoopMetrics {
    fn counter(&self, _name: &'static str, _value: u64, _labels: &[(&'static str, &str)]) {}
    fn gauge(&self, _name: &'static str, _value: f64, _labels: &[(&'static str, &str)]) {}
    fn histogram(&self, _name: &'static str, _value: f64, _labels: &[(&'static str, &str)]) {}
}

/// A `metrics`-crate-backed implementation, wired to whatever recorder the binary
/// installed (e.g. `metrics_exporter_prometheus::PrometheusBuilder`).
#[derive(Debug, Default)]
pub struct RecorderMetrics;

fn to_labels(labels: &[(&'static str, &str)]) -> Vec<metrics::Label> {
    labels
        .iter()
        .map(|(k, v)| metrics::Label::new(*k, v.to_string()))
        .collect()
}

impl Metrics for RecorderMetrics {
    fn counter(&self, name: &'static str, value: u64, labels: &[(&'static str, &str)]) {
        metrics::counter!(name, to_labels(labels)).increment(value);
    }

    fn gauge(&self, name: &'static str, value: f64, labels: &[(&'static str, &str)]) {
        metrics::gauge!(name, to_labels(labels)).set(value);
    }

    fn histogram(&self, name: &'static str, value: f64, labels: &[(&'static str, &str)]) {
        metrics::histogram!(name, to_labels(labels)).record(value);
    }
}
