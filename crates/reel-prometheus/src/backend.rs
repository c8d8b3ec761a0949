use std::sync::Arc;

use prometheus::{
    CounterVec, HistogramOpts, HistogramVec, IntCounter, Opts, Registry, proto::MetricFamily,
};

use reel_core::{JobOutcome, MetricsBackend};

const NAMESPACE: &str = "reel";

/// Recording jobs run from seconds to several minutes.
const DURATION_BUCKETS: &[f64] = &[1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0];

/// Labels are bounded: `source` is `gateway` or `broker`, `outcome` is
/// `success` or `failure`, `message` is a routing name.
#[derive(Clone)]
pub struct PrometheusMetrics {
    jobs_started: CounterVec,
    jobs_completed: CounterVec,
    job_duration: HistogramVec,
    resource_failures: IntCounter,
    gateway_reconnects: IntCounter,
    redeliveries: CounterVec,
    registry: Arc<Registry>,
}

impl PrometheusMetrics {
    pub fn new_with_registry(registry: Arc<Registry>) -> Result<Self, prometheus::Error> {
        let jobs_started = CounterVec::new(
            Opts::new("jobs_started_total", "Recording jobs accepted").namespace(NAMESPACE),
            &["source"],
        )?;
        registry.register(Box::new(jobs_started.clone()))?;

        let jobs_completed = CounterVec::new(
            Opts::new("jobs_completed_total", "Recording jobs finished").namespace(NAMESPACE),
            &["source", "outcome"],
        )?;
        registry.register(Box::new(jobs_completed.clone()))?;

        let job_duration = HistogramVec::new(
            HistogramOpts::new("job_duration_seconds", "Recording job duration in seconds")
                .namespace(NAMESPACE)
                .buckets(DURATION_BUCKETS.to_vec()),
            &["source"],
        )?;
        registry.register(Box::new(job_duration.clone()))?;

        let resource_failures = IntCounter::with_opts(
            Opts::new("resource_failures_total", "Pooled resources retired after a failure")
                .namespace(NAMESPACE),
        )?;
        registry.register(Box::new(resource_failures.clone()))?;

        let gateway_reconnects = IntCounter::with_opts(
            Opts::new("gateway_reconnects_total", "Gateway connection attempts after a drop")
                .namespace(NAMESPACE),
        )?;
        registry.register(Box::new(gateway_reconnects.clone()))?;

        let redeliveries = CounterVec::new(
            Opts::new("redeliveries_total", "Consumed messages requeued for redelivery")
                .namespace(NAMESPACE),
            &["message"],
        )?;
        registry.register(Box::new(redeliveries.clone()))?;

        Ok(Self {
            jobs_started,
            jobs_completed,
            job_duration,
            resource_failures,
            gateway_reconnects,
            redeliveries,
            registry,
        })
    }

    pub fn new() -> Result<Self, prometheus::Error> {
        Self::new_with_registry(Arc::new(Registry::new()))
    }

    pub fn gather(&self) -> Vec<MetricFamily> {
        self.registry.gather()
    }

    /// Metrics in the text exposition format, ready to serve on `/metrics`.
    pub fn encode_text(&self) -> Result<String, prometheus::Error> {
        prometheus::TextEncoder::new().encode_to_string(&self.gather())
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }
}

impl MetricsBackend for PrometheusMetrics {
    fn record_job_started(&self, source: &str) {
        self.jobs_started.with_label_values(&[source]).inc();
    }

    fn record_job_completed(&self, source: &str, outcome: JobOutcome, duration_ms: u64) {
        self.jobs_completed
            .with_label_values(&[source, outcome.as_label()])
            .inc();
        self.job_duration
            .with_label_values(&[source])
            .observe(duration_ms as f64 / 1000.0);
    }

    fn record_resource_failure(&self) {
        self.resource_failures.inc();
    }

    fn record_gateway_reconnect(&self) {
        self.gateway_reconnects.inc();
    }

    fn record_redelivery(&self, message: &str) {
        self.redeliveries.with_label_values(&[message]).inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family<'a>(families: &'a [MetricFamily], name: &str) -> &'a MetricFamily {
        families
            .iter()
            .find(|f| f.name() == name)
            .unwrap_or_else(|| panic!("{name} not registered"))
    }

    #[test]
    fn started_is_labelled_by_source() {
        let metrics = PrometheusMetrics::new().unwrap();
        metrics.record_job_started("gateway");
        metrics.record_job_started("gateway");
        metrics.record_job_started("broker");

        let families = metrics.gather();
        assert_eq!(family(&families, "reel_jobs_started_total").get_metric().len(), 2);
    }

    #[test]
    fn completion_feeds_counter_and_histogram() {
        let metrics = PrometheusMetrics::new().unwrap();
        metrics.record_job_completed("gateway", JobOutcome::Success, 42_000);
        metrics.record_job_completed("gateway", JobOutcome::Failure, 500);

        let families = metrics.gather();
        assert_eq!(family(&families, "reel_jobs_completed_total").get_metric().len(), 2);

        let text = metrics.encode_text().unwrap();
        assert!(text.contains(r#"reel_job_duration_seconds_count{source="gateway"} 2"#), "{text}");
        assert!(text.contains(r#"reel_job_duration_seconds_sum{source="gateway"} 42.5"#), "{text}");
    }

    #[test]
    fn plain_counters_increment() {
        let metrics = PrometheusMetrics::new().unwrap();
        metrics.record_resource_failure();
        metrics.record_gateway_reconnect();
        metrics.record_gateway_reconnect();
        metrics.record_redelivery("validate_upload");

        let text = metrics.encode_text().unwrap();
        assert!(text.contains("reel_resource_failures_total 1"), "{text}");
        assert!(text.contains("reel_gateway_reconnects_total 2"), "{text}");
        assert!(text.contains(r#"reel_redeliveries_total{message="validate_upload"} 1"#), "{text}");
    }

    #[test]
    fn shares_a_custom_registry() {
        let registry = Arc::new(Registry::new());
        let metrics = PrometheusMetrics::new_with_registry(registry.clone()).unwrap();
        metrics.record_job_started("broker");
        assert!(!registry.gather().is_empty());

        // names are unique per registry
        assert!(PrometheusMetrics::new_with_registry(registry).is_err());
    }
}
