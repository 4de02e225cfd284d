use std::{path::Path, path::PathBuf, time::Duration};

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use bnode_prometheus::PrometheusMetrics;

/// Rewrites `path` every `every` until `stop`, then once more.
pub async fn export_loop(metrics: PrometheusMetrics, path: PathBuf, every: Duration, stop: CancellationToken) {
    let mut tick = tokio::time::interval(every);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = tick.tick() => {}
        }
        if let Err(e) = write_textfile(&metrics, &path).await {
            warn!(path = %path.display(), error = %e, "metrics export failed");
        }
    }
    if let Err(e) = write_textfile(&metrics, &path).await {
        warn!(path = %path.display(), error = %e, "final metrics export failed");
    }
}

/// Readers never see a half-written file.
pub async fn write_textfile(metrics: &PrometheusMetrics, path: &Path) -> anyhow::Result<()> {
    let body = metrics.render()?;
    let tmp = path.with_extension("prom.tmp");
    tokio::fs::write(&tmp, body).await?;
    tokio::fs::rename(&tmp, path).await?;
    debug!(path = %path.display(), "metrics exported");
    Ok(())
}
