use std::sync::{Arc, RwLock};

use mixgate_common::AppConfig;
use mixgate_projects::ProjectRegistry;
use mixgate_rate_limit::{CounterStore, ResetJob, StoreError};
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};

/// Shared state type alias used across all route handlers.
pub type SharedState = Arc<AppState>;

/// Central application state: configuration, metrics, projects and counters.
pub struct AppState {
    pub config: RwLock<AppConfig>,
    pub metrics: GatewayMetrics,
    pub registry: Arc<ProjectRegistry>,
    pub counters: Arc<dyn CounterStore>,
    pub reset_job: ResetJob,
    pub start_time: std::time::Instant,
}

/// Prometheus metrics collected by the gateway.
pub struct GatewayMetrics {
    pub registry: Registry,
    pub requests_total: IntCounter,
    pub requests_admitted: IntCounter,
    pub requests_rate_limited: IntCounter,
    pub requests_refused: IntCounterVec,
    pub events_forwarded: IntCounter,
    pub forward_failures: IntCounter,
    pub reset_runs: IntCounter,
    pub counters_reset: IntCounter,
    pub admission_duration: Histogram,
}

impl GatewayMetrics {
    /// Create all counters and histograms against a fresh Prometheus registry.
    pub fn new() -> Self {
        let registry = Registry::new();

        let requests_total = IntCounter::with_opts(Opts::new(
            "mixgate_requests_total",
            "Total number of ingestion requests received",
        ))
        .expect("failed to create requests_total counter");

        let requests_admitted = IntCounter::with_opts(Opts::new(
            "mixgate_requests_admitted_total",
            "Requests admitted by the rate limiter",
        ))
        .expect("failed to create requests_admitted counter");

        let requests_rate_limited = IntCounter::with_opts(Opts::new(
            "mixgate_requests_rate_limited_total",
            "Requests rejected because the hourly quota was used up",
        ))
        .expect("failed to create requests_rate_limited counter");

        let requests_refused = IntCounterVec::new(
            Opts::new(
                "mixgate_requests_refused_total",
                "Requests refused for reasons other than throttling",
            ),
            &["kind"],
        )
        .expect("failed to create requests_refused counter");

        let events_forwarded = IntCounter::with_opts(Opts::new(
            "mixgate_events_forwarded_total",
            "Events delivered to the analytics backend",
        ))
        .expect("failed to create events_forwarded counter");

        let forward_failures = IntCounter::with_opts(Opts::new(
            "mixgate_forward_failures_total",
            "Events the analytics backend did not accept",
        ))
        .expect("failed to create forward_failures counter");

        let reset_runs = IntCounter::with_opts(Opts::new(
            "mixgate_reset_runs_total",
            "Completed counter reset passes",
        ))
        .expect("failed to create reset_runs counter");

        let counters_reset = IntCounter::with_opts(Opts::new(
            "mixgate_counters_reset_total",
            "Project counters zeroed by reset passes",
        ))
        .expect("failed to create counters_reset counter");

        let admission_duration = Histogram::with_opts(
            HistogramOpts::new(
                "mixgate_admission_duration_seconds",
                "Time spent resolving and admitting a request",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.5, 1.0, 2.5]),
        )
        .expect("failed to create admission_duration histogram");

        registry.register(Box::new(requests_total.clone())).expect("failed to register requests_total");
        registry.register(Box::new(requests_admitted.clone())).expect("failed to register requests_admitted");
        registry.register(Box::new(requests_rate_limited.clone())).expect("failed to register requests_rate_limited");
        registry.register(Box::new(requests_refused.clone())).expect("failed to register requests_refused");
        registry.register(Box::new(events_forwarded.clone())).expect("failed to register events_forwarded");
        registry.register(Box::new(forward_failures.clone())).expect("failed to register forward_failures");
        registry.register(Box::new(reset_runs.clone())).expect("failed to register reset_runs");
        registry.register(Box::new(counters_reset.clone())).expect("failed to register counters_reset");
        registry.register(Box::new(admission_duration.clone())).expect("failed to register admission_duration");

        Self {
            registry,
            requests_total,
            requests_admitted,
            requests_rate_limited,
            requests_refused,
            events_forwarded,
            forward_failures,
            reset_runs,
            counters_reset,
            admission_duration,
        }
    }
}

impl Default for GatewayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AppState {
    pub fn new(
        config: AppConfig,
        registry: Arc<ProjectRegistry>,
        counters: Arc<dyn CounterStore>,
    ) -> Self {
        Self {
            config: RwLock::new(config),
            metrics: GatewayMetrics::new(),
            registry,
            reset_job: ResetJob::new(counters.clone()),
            counters,
            start_time: std::time::Instant::now(),
        }
    }

    /// One reset pass, recorded in the metrics. Used by both the admin API and
    /// the hourly scheduler.
    pub async fn run_reset(&self) -> Result<usize, StoreError> {
        let reset = self.reset_job.run_once().await?;
        self.metrics.reset_runs.inc();
        self.metrics.counters_reset.inc_by(reset as u64);
        Ok(reset)
    }
}
