//! Prometheus metrics for the build node.
//!
//! [`PrometheusMetrics`] is a pool event subscriber; register it with the
//! worker pool and expose [`PrometheusMetrics::gather`] from whatever HTTP
//! surface the host process has.
//!
//! ## Metrics
//! - `bnode_tasks_claimed_total` - Counter
//! - `bnode_tasks_completed_total{state}` - Counter (`success`, `partialFailure`, `failure`, `dropped`)
//! - `bnode_task_duration_seconds` - Histogram, claim to report
//! - `bnode_artifact_uploads_total{outcome}` - Counter (`uploaded`, `failed`)
//! - `bnode_reports_failed_total` - Counter
//! - `bnode_remote_retries_total` - Counter
//! - `bnode_active_tasks` - Gauge
//!
//! ```rust,ignore
//! let metrics = PrometheusMetrics::new()?;
//! let deps = PoolDeps { subscribers: vec![Arc::new(metrics.clone())], .. };
//! // later, in a /metrics handler
//! let body = metrics.render()?;
//! ```

mod backend;
pub use backend::PrometheusMetrics;

pub use prometheus::{Encoder, Registry, TextEncoder};
