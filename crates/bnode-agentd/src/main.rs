//! Build node agent.
//!
//! Loads the TOML configuration, wires the HTTP scheduler and artifact store
//! clients and the command toolchains into a worker pool, and runs it until
//! SIGTERM or SIGINT.
mod cli;
mod config;
mod metrics;
mod signals;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use bnode_client::{HttpArtifactStore, HttpScheduler};
use bnode_core::{PoolDeps, Subscribe, WorkerPool};
use bnode_exec::{Fetcher, router};
use bnode_observe::{Journal, logger_init};
use bnode_prometheus::PrometheusMetrics;

use crate::{cli::Args, config::AppConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut cfg = match &args.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };
    args.apply(&mut cfg)?;
    logger_init(&cfg.logger)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        os = %bnode_core::system::os_info(),
        "bnode-agentd starting"
    );

    let node = &cfg.node;
    let scheduler = Arc::new(HttpScheduler::new(&node.scheduler)?);
    let store = Arc::new(HttpArtifactStore::new(&node.artifact_store)?);
    let fetcher = Fetcher::new(node.timeouts.source_prep())?;

    let metrics = PrometheusMetrics::new()?;
    let subscribers: Vec<Arc<dyn Subscribe>> = vec![Arc::new(Journal::new()), Arc::new(metrics.clone())];

    let deps = PoolDeps {
        scheduler,
        store,
        router: router(&node.toolchains, &node.limits, &fetcher),
        subscribers,
    };
    let pool = WorkerPool::new(node, deps).await.context("starting worker pool")?;
    info!(
        node = pool.node_id(),
        arches = ?pool.claim_request().supported_arches,
        slots = node.max_concurrent_builds,
        "pool ready"
    );

    let signals = signals::forward(pool.handle()).context("installing signal handlers")?;
    let exporter_stop = CancellationToken::new();
    let exporter = cfg.metrics.textfile.clone().map(|path| {
        tokio::spawn(metrics::export_loop(
            metrics.clone(),
            path,
            cfg.metrics.interval(),
            exporter_stop.clone(),
        ))
    });

    let summary = pool.run().await;

    signals.abort();
    exporter_stop.cancel();
    if let Some(exporter) = exporter {
        let _ = exporter.await;
    }
    info!(
        claimed = summary.claimed,
        reported = summary.reported,
        report_failures = summary.report_failures,
        force_dropped = summary.force_dropped,
        "bnode-agentd stopped"
    );
    Ok(())
}
