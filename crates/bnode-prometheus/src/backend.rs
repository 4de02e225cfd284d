use std::sync::Arc;

use async_trait::async_trait;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
    proto::MetricFamily,
};

use bnode_core::Subscribe;
use bnode_model::{EventKind, PoolEvent};

/// Build durations range from seconds to many hours.
const DURATION_BUCKETS: &[f64] = &[
    10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1200.0, 1800.0, 3600.0, 7200.0, 14400.0, 28800.0,
];

struct Metrics {
    registry: Registry,
    claimed: IntCounter,
    completed: IntCounterVec,
    duration: Histogram,
    uploads: IntCounterVec,
    reports_failed: IntCounter,
    retries: IntCounter,
    active: IntGauge,
}

/// Pool event subscriber feeding a prometheus registry.
#[derive(Clone)]
pub struct PrometheusMetrics {
    inner: Arc<Metrics>,
}

impl PrometheusMetrics {
    /// Metrics in a fresh registry.
    pub fn new() -> Result<Self, prometheus::Error> {
        Self::with_registry(Registry::new())
    }

    /// Registers the build node metrics in `registry`.
    pub fn with_registry(registry: Registry) -> Result<Self, prometheus::Error> {
        let claimed = IntCounter::with_opts(Opts::new(
            "bnode_tasks_claimed_total",
            "Tasks claimed from the scheduler",
        ))?;
        let completed = IntCounterVec::new(
            Opts::new("bnode_tasks_completed_total", "Tasks that left the pool, by terminal state"),
            &["state"],
        )?;
        let duration = Histogram::with_opts(
            HistogramOpts::new("bnode_task_duration_seconds", "Time from claim to status report")
                .buckets(DURATION_BUCKETS.to_vec()),
        )?;
        let uploads = IntCounterVec::new(
            Opts::new("bnode_artifact_uploads_total", "Artifact uploads, by outcome"),
            &["outcome"],
        )?;
        let reports_failed = IntCounter::with_opts(Opts::new(
            "bnode_reports_failed_total",
            "Status reports that could not be delivered",
        ))?;
        let retries = IntCounter::with_opts(Opts::new(
            "bnode_remote_retries_total",
            "Retried scheduler and artifact store calls",
        ))?;
        let active = IntGauge::with_opts(Opts::new("bnode_active_tasks", "Tasks currently in the pool"))?;

        registry.register(Box::new(claimed.clone()))?;
        registry.register(Box::new(completed.clone()))?;
        registry.register(Box::new(duration.clone()))?;
        registry.register(Box::new(uploads.clone()))?;
        registry.register(Box::new(reports_failed.clone()))?;
        registry.register(Box::new(retries.clone()))?;
        registry.register(Box::new(active.clone()))?;

        Ok(Self {
            inner: Arc::new(Metrics {
                registry,
                claimed,
                completed,
                duration,
                uploads,
                reports_failed,
                retries,
                active,
            }),
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub fn gather(&self) -> Vec<MetricFamily> {
        self.inner.registry.gather()
    }

    /// Text exposition format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    fn record(&self, e: &PoolEvent) {
        let m = &self.inner;
        match e.kind {
            EventKind::TaskClaimed => {
                m.claimed.inc();
                m.active.inc();
            }
            EventKind::TaskFinished => {
                let state = e.state.map(|s| s.as_str()).unwrap_or("failure");
                m.completed.with_label_values(&[state]).inc();
                if let Some(ms) = e.duration_ms {
                    m.duration.observe(ms as f64 / 1000.0);
                }
                m.active.dec();
            }
            EventKind::TaskForceDropped => {
                m.completed.with_label_values(&["dropped"]).inc();
                m.active.dec();
            }
            EventKind::ArtifactUploaded => m.uploads.with_label_values(&["uploaded"]).inc(),
            EventKind::ArtifactFailed => m.uploads.with_label_values(&["failed"]).inc(),
            EventKind::ReportFailed => m.reports_failed.inc(),
            EventKind::RetryScheduled => m.retries.inc(),
            _ => {}
        }
    }
}

#[async_trait]
impl Subscribe for PrometheusMetrics {
    async fn on_event(&self, event: &PoolEvent) {
        self.record(event);
    }

    fn name(&self) -> &'static str {
        "prometheus"
    }

    fn queue_capacity(&self) -> usize {
        4096
    }
}
