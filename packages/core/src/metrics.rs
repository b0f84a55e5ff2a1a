//! Prometheus metrics registry for the digest service.
//!
//! [`AppMetrics`] owns all registered metrics and the [`Registry`] they
//! belong to. Construct it once at startup, wrap in `Arc`, and pass it to
//! the pipeline, the scheduler and the HTTP middleware.
//!
//! Exposed at `GET /metrics` in Prometheus text exposition format
//! (`text/plain; version=0.0.4`).

use prometheus::{Counter, CounterVec, Gauge, Histogram, HistogramOpts, Opts, Registry};

/// All application-level Prometheus metrics.
pub struct AppMetrics {
    /// Pipeline runs started.
    pub runs_total: Counter,
    /// Triggers dropped because a run was already in progress.
    pub runs_skipped_total: Counter,
    /// Per-country failures, labelled by pipeline stage.
    pub country_failures_total: CounterVec,
    /// Digest payloads built across all runs.
    pub payloads_built_total: Counter,
    /// Recipients the dispatcher reported as delivered.
    pub recipients_delivered_total: Counter,
    /// Recipients the dispatcher reported as failed.
    pub recipients_failed_total: Counter,
    /// Wall time of the most recent run, in seconds.
    pub last_run_duration_seconds: Gauge,
    /// HTTP request count, labelled by method, path, and status code.
    pub http_requests_total: CounterVec,
    /// HTTP request latency histogram in seconds.
    pub http_request_duration: Histogram,
    pub registry: Registry,
}

impl AppMetrics {
    /// Create and register all metrics.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let runs_total = Counter::with_opts(Opts::new(
            "covid_digest_runs_total",
            "Pipeline runs started",
        ))?;

        let runs_skipped_total = Counter::with_opts(Opts::new(
            "covid_digest_runs_skipped_total",
            "Triggers dropped while a run was active",
        ))?;

        let country_failures_total = CounterVec::new(
            Opts::new(
                "covid_digest_country_failures_total",
                "Per-country failures by pipeline stage",
            ),
            &["stage"],
        )?;

        let payloads_built_total = Counter::with_opts(Opts::new(
            "covid_digest_payloads_built_total",
            "Digest payloads built",
        ))?;

        let recipients_delivered_total = Counter::with_opts(Opts::new(
            "covid_digest_recipients_delivered_total",
            "Recipients reported delivered by the dispatcher",
        ))?;

        let recipients_failed_total = Counter::with_opts(Opts::new(
            "covid_digest_recipients_failed_total",
            "Recipients reported failed by the dispatcher",
        ))?;

        let last_run_duration_seconds = Gauge::with_opts(Opts::new(
            "covid_digest_last_run_duration_seconds",
            "Duration of the most recent pipeline run",
        ))?;

        let http_requests_total = CounterVec::new(
            Opts::new(
                "covid_digest_http_requests_total",
                "HTTP requests by method, path, and status",
            ),
            &["method", "path", "status"],
        )?;

        let http_request_duration = Histogram::with_opts(
            HistogramOpts::new(
                "covid_digest_http_request_duration_seconds",
                "HTTP request latency in seconds",
            )
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        )?;

        registry.register(Box::new(runs_total.clone()))?;
        registry.register(Box::new(runs_skipped_total.clone()))?;
        registry.register(Box::new(country_failures_total.clone()))?;
        registry.register(Box::new(payloads_built_total.clone()))?;
        registry.register(Box::new(recipients_delivered_total.clone()))?;
        registry.register(Box::new(recipients_failed_total.clone()))?;
        registry.register(Box::new(last_run_duration_seconds.clone()))?;
        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_request_duration.clone()))?;

        Ok(Self {
            runs_total,
            runs_skipped_total,
            country_failures_total,
            payloads_built_total,
            recipients_delivered_total,
            recipients_failed_total,
            last_run_duration_seconds,
            http_requests_total,
            http_request_duration,
            registry,
        })
    }

    /// Render all metrics as Prometheus text format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buf = Vec::new();
        encoder.encode(&metric_families, &mut buf)?;
        Ok(String::from_utf8(buf).unwrap_or_default())
    }
}
