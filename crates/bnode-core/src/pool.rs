//! Worker pool: claim loop, per-task units and shutdown.
//!
//! A slot permit is taken before every claim and travels with the unit
//! until its status report returned, so at most `max_concurrent_builds`
//! units exist at any time and claiming blocks while all slots are busy.
//!
//! Shutdown goes through two tokens. `stop` ends the claim loop; in-flight
//! units keep running for `shutdown_grace`. Then `cancel` (the parent of
//! every unit token) fires, units get `force_grace` to collect, upload and
//! report, and whatever is still left is aborted and logged as dropped.

use std::{
    panic::AssertUnwindSafe,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant, SystemTime},
};

use futures::FutureExt;
use rand::Rng;
use tokio::{
    sync::{OwnedSemaphorePermit, Semaphore},
    task::{JoinError, JoinSet},
    time::MissedTickBehavior,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use bnode_model::{
    BuildPhase, BuildResult, ClaimRequest, EventKind, PingRequest, PoolEvent, Stage, StageTiming, Task,
};

use crate::{
    claim::Claimant,
    collect::collect,
    config::NodeConfig,
    env::{EnvPool, EnvStats},
    error::{ClaimError, CoreError},
    events::{Bus, Subscribe},
    executor::BuildExecutor,
    remote::{ArtifactStore, SchedulerApi},
    report::Reporter,
    router::ToolchainRouter,
    state::{PhaseTracker, TaskState},
    system,
    upload::Uploader,
};

/// Remote services, toolchains and subscribers a pool is built from.
pub struct PoolDeps {
    pub scheduler: Arc<dyn SchedulerApi>,
    pub store: Arc<dyn ArtifactStore>,
    pub router: ToolchainRouter,
    pub subscribers: Vec<Arc<dyn Subscribe>>,
}

/// Controls a running pool from the outside.
#[derive(Clone)]
pub struct PoolHandle {
    stop: CancellationToken,
    cancel: CancellationToken,
}

impl PoolHandle {
    /// Stops claiming; in-flight tasks finish within the shutdown grace.
    pub fn shutdown(&self) {
        self.stop.cancel();
    }

    /// Stops claiming and cancels every in-flight task right away.
    pub fn shutdown_now(&self) {
        self.stop.cancel();
        self.cancel.cancel();
    }

    pub fn is_stopping(&self) -> bool {
        self.stop.is_cancelled()
    }
}

/// What a finished `run` did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolSummary {
    pub claimed: u64,
    /// Units that reached the report step.
    pub reported: u64,
    /// Reports that could not be delivered.
    pub report_failures: u64,
    /// Units aborted after the force grace.
    pub force_dropped: u64,
}

#[derive(Default)]
struct Counters {
    claimed: AtomicU64,
    reported: AtomicU64,
    report_failures: AtomicU64,
}

struct Timing {
    poll_interval: Duration,
    poll_jitter_ms: u64,
    ping_interval: Duration,
    provision: Duration,
    shutdown_grace: Duration,
    force_grace: Duration,
}

struct Shared {
    node_id: String,
    timing: Timing,
    maintenance_file: Option<PathBuf>,
    api: Arc<dyn SchedulerApi>,
    claimant: Claimant,
    envs: EnvPool,
    executor: BuildExecutor,
    uploader: Uploader,
    reporter: Reporter,
    state: TaskState,
    bus: Bus,
    counters: Counters,
}

pub struct WorkerPool {
    shared: Arc<Shared>,
    slots: Arc<Semaphore>,
    handle: PoolHandle,
}

impl WorkerPool {
    /// Validates `cfg`, prepares the work directory and the environment pool.
    ///
    /// Any error here is fatal for the process.
    pub async fn new(cfg: &NodeConfig, deps: PoolDeps) -> Result<Self, CoreError> {
        cfg.validate()?;
        if deps.router.is_empty() {
            return Err(CoreError::NoToolchains);
        }

        tokio::fs::create_dir_all(&cfg.work_dir)
            .await
            .map_err(|e| CoreError::WorkDir {
                path: cfg.work_dir.clone(),
                reason: e.to_string(),
            })?;
        let envs = EnvPool::open(cfg.env_root(), cfg.environments.clone())
            .await
            .map_err(|e| CoreError::WorkDir {
                path: cfg.env_root(),
                reason: e.to_string(),
            })?;

        let node_id = system::node_id(cfg.node_id.as_deref(), &cfg.work_dir);
        let request = ClaimRequest {
            node_id: node_id.clone(),
            supported_arches: system::supported_arches(system::arch(), cfg.build_src),
        };

        let bus = Bus::new(deps.subscribers);
        let claimant = Claimant::new(
            Arc::clone(&deps.scheduler),
            request,
            cfg.claim_retry.clone(),
            bus.clone(),
        );
        let uploader = Uploader::new(
            deps.store,
            cfg.upload_retry.clone(),
            cfg.upload_concurrency,
            bus.clone(),
        );
        let reporter = Reporter::new(Arc::clone(&deps.scheduler), cfg.report_retry.clone(), bus.clone());

        let shared = Shared {
            node_id,
            timing: Timing {
                poll_interval: cfg.poll_interval(),
                poll_jitter_ms: cfg.poll_jitter_ms,
                ping_interval: cfg.ping_interval(),
                provision: cfg.timeouts.provision(),
                shutdown_grace: cfg.shutdown_grace(),
                force_grace: cfg.force_grace(),
            },
            maintenance_file: cfg.maintenance_file.clone(),
            api: deps.scheduler,
            claimant,
            envs,
            executor: BuildExecutor::new(deps.router, cfg.timeouts.clone()),
            uploader,
            reporter,
            state: TaskState::new(),
            bus,
            counters: Counters::default(),
        };

        Ok(Self {
            shared: Arc::new(shared),
            slots: Arc::new(Semaphore::new(cfg.max_concurrent_builds)),
            handle: PoolHandle {
                stop: CancellationToken::new(),
                cancel: CancellationToken::new(),
            },
        })
    }

    pub fn handle(&self) -> PoolHandle {
        self.handle.clone()
    }

    /// Registry of in-flight tasks.
    pub fn state(&self) -> &TaskState {
        &self.shared.state
    }

    pub fn env_stats(&self) -> EnvStats {
        self.shared.envs.stats()
    }

    pub fn node_id(&self) -> &str {
        &self.shared.node_id
    }

    pub fn claim_request(&self) -> &ClaimRequest {
        self.shared.claimant.request()
    }

    /// Runs until shutdown is requested through the handle and every unit
    /// is finished or dropped.
    #[instrument(level = "debug", skip_all, fields(node = %self.shared.node_id))]
    pub async fn run(&self) -> PoolSummary {
        let shared = &self.shared;
        shared.bus.emit(PoolEvent::new(EventKind::PoolStarted));
        info!(
            slots = self.slots.available_permits(),
            arches = ?shared.claimant.request().supported_arches,
            "worker pool started"
        );

        let heartbeat_stop = CancellationToken::new();
        let heartbeat = tokio::spawn(heartbeat(Arc::clone(shared), heartbeat_stop.clone()));

        let mut units = JoinSet::new();
        self.claim_loop(&mut units).await;

        shared.bus.emit(PoolEvent::new(EventKind::ShutdownRequested));
        let force_dropped = self.drain(&mut units).await;

        heartbeat_stop.cancel();
        if let Err(e) = heartbeat.await {
            warn!(error = %e, "heartbeat task failed");
        }

        PoolSummary {
            claimed: shared.counters.claimed.load(Ordering::SeqCst),
            reported: shared.counters.reported.load(Ordering::SeqCst),
            report_failures: shared.counters.report_failures.load(Ordering::SeqCst),
            force_dropped,
        }
    }

    async fn claim_loop(&self, units: &mut JoinSet<()>) {
        let shared = &self.shared;
        let stop = &self.handle.stop;
        let mut in_maintenance = false;

        loop {
            while let Some(res) = units.try_join_next() {
                log_join(res);
            }

            let permit = tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                permit = Arc::clone(&self.slots).acquire_owned() => match permit {
                    Ok(p) => p,
                    Err(_) => break,
                },
            };

            if shared.maintenance_active().await {
                if !in_maintenance {
                    in_maintenance = true;
                    shared.bus.emit(PoolEvent::new(EventKind::MaintenanceEntered));
                }
                drop(permit);
                if !idle(stop, shared.timing.poll_interval).await {
                    break;
                }
                continue;
            } else if in_maintenance {
                in_maintenance = false;
                shared.bus.emit(PoolEvent::new(EventKind::MaintenanceLeft));
            }

            match shared.claimant.claim(stop).await {
                Ok(Some(task)) => {
                    shared.counters.claimed.fetch_add(1, Ordering::SeqCst);
                    let unit = Arc::clone(shared);
                    let cancel = self.handle.cancel.child_token();
                    units.spawn(unit.run_unit(task, cancel, permit));
                }
                Ok(None) => {
                    drop(permit);
                    if !idle(stop, shared.poll_delay()).await {
                        break;
                    }
                }
                Err(ClaimError::Cancelled) => break,
                Err(e) => {
                    debug!(error = %e, "claim failed; backing off");
                    drop(permit);
                    if !idle(stop, shared.poll_delay()).await {
                        break;
                    }
                }
            }
        }
    }

    /// Waits for in-flight units; returns how many had to be force-dropped.
    async fn drain(&self, units: &mut JoinSet<()>) -> u64 {
        let shared = &self.shared;
        let timing = &shared.timing;

        if tokio::time::timeout(timing.shutdown_grace, join_all(units)).await.is_ok() {
            shared.bus.emit(PoolEvent::new(EventKind::AllStoppedWithinGrace));
            return 0;
        }

        shared.bus.emit(
            PoolEvent::new(EventKind::GraceExceeded).with_reason(format!("{} task(s) still running", units.len())),
        );
        self.handle.cancel.cancel();

        if tokio::time::timeout(timing.force_grace, join_all(units)).await.is_ok() {
            return 0;
        }

        // Units that finish while being aborted have already reported and
        // left the registry; only what remains after the abort was dropped.
        units.shutdown().await;
        let left = shared.state.list_all();
        for info in &left {
            shared.bus.emit(
                PoolEvent::new(EventKind::TaskForceDropped)
                    .with_task(&info.id)
                    .with_phase(info.phase)
                    .with_reason("task did not stop within the force grace; upload and report skipped"),
            );
            shared.state.remove_task(&info.id);
        }
        left.len() as u64
    }
}

impl Shared {
    async fn maintenance_active(&self) -> bool {
        match &self.maintenance_file {
            Some(path) => tokio::fs::try_exists(path).await.unwrap_or(false),
            None => false,
        }
    }

    fn poll_delay(&self) -> Duration {
        let jitter = match self.timing.poll_jitter_ms {
            0 => 0,
            max => rand::rng().random_range(0..=max),
        };
        self.timing.poll_interval + Duration::from_millis(jitter)
    }

    /// One task from claim to report. Never fails; the outcome is reported.
    async fn run_unit(self: Arc<Self>, task: Task, cancel: CancellationToken, _permit: OwnedSemaphorePermit) {
        let started = Instant::now();
        let task = Arc::new(task);
        let id = task.id.clone();
        self.state.add_task(id.clone(), task.platform.clone());
        let tracker = PhaseTracker::new(id.clone(), self.state.clone(), self.bus.clone());

        let mut timings = Vec::new();

        // provision
        let t0 = SystemTime::now();
        let provisioned = tokio::select! {
            r = tokio::time::timeout(self.timing.provision, self.envs.acquire(&task.platform)) => match r {
                Ok(Ok(lease)) => Ok(lease),
                Ok(Err(e)) => Err(BuildResult::failure(Stage::Provision, e.to_string())),
                Err(_) => Err(BuildResult::failure(Stage::Provision, "timeout")),
            },
            _ = cancel.cancelled() => Err(BuildResult::failure(Stage::Cancelled, "cancelled during provision")),
        };
        timings.push(StageTiming::new(Stage::Provision, t0, SystemTime::now()));

        let (mut result, lease) = match provisioned {
            Ok(lease) => {
                tracker.advance(BuildPhase::Provisioned);
                let run = self.executor.execute(Arc::clone(&task), lease.env(), &cancel, &tracker);
                let result = match AssertUnwindSafe(run).catch_unwind().await {
                    Ok(result) => result,
                    Err(_) => {
                        let stage = self
                            .state
                            .get(&id)
                            .map_or(Stage::Compiling, |info| panicked_stage(info.phase));
                        error!(task = %id, %stage, "build executor panicked");
                        tracker.fail("panic");
                        BuildResult::failure(stage, "panic in build executor")
                    }
                };
                (result, Some(lease))
            }
            Err(result) => {
                let reason = result.failure.as_ref().map(|f| f.message.clone()).unwrap_or_default();
                self.bus.emit(
                    PoolEvent::new(EventKind::ProvisionFailed)
                        .with_task(&id)
                        .with_reason(reason.clone()),
                );
                tracker.fail(&reason);
                (result, None)
            }
        };

        // collect and upload, whatever the outcome
        tracker.advance(BuildPhase::Uploading);
        let t = SystemTime::now();
        let artifacts = match &lease {
            Some(lease) => collect(lease.env()).await,
            None => Vec::new(),
        };
        timings.push(StageTiming::new(Stage::Collect, t, SystemTime::now()));

        let t = SystemTime::now();
        result.artifacts = self.uploader.upload(&id, artifacts).await;
        timings.push(StageTiming::new(Stage::Upload, t, SystemTime::now()));
        drop(lease);

        timings.append(&mut result.timings);
        timings.sort_by_key(|t| t.start_ms);
        result.timings = timings;

        // report
        tracker.advance(BuildPhase::Reporting);
        self.counters.reported.fetch_add(1, Ordering::SeqCst);
        if self.reporter.report(&id, &result).await.is_err() {
            self.counters.report_failures.fetch_add(1, Ordering::SeqCst);
        }
        tracker.advance(BuildPhase::Done);
        self.state.remove_task(&id);

        let mut ev = PoolEvent::new(EventKind::TaskFinished)
            .with_task(&id)
            .with_state(result.state)
            .with_duration_ms(started.elapsed().as_millis() as u64);
        if let Some(f) = &result.failure {
            ev = ev.with_reason(format!("{}: {}", f.stage, f.message));
        }
        self.bus.emit(ev);
    }
}

/// Stage a unit was in when its executor panicked outside a stage guard.
fn panicked_stage(phase: BuildPhase) -> Stage {
    match phase {
        BuildPhase::Claimed | BuildPhase::Provisioned => Stage::SourcePrep,
        _ => Stage::Compiling,
    }
}

/// Active-task heartbeat and idle environment pruning.
async fn heartbeat(shared: Arc<Shared>, stop: CancellationToken) {
    let mut tick = tokio::time::interval(shared.timing.ping_interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tick.tick().await;

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = tick.tick() => {}
        }

        let req = PingRequest {
            node: shared.node_id.clone(),
            active_tasks: shared.state.active_ids(),
        };
        if let Err(e) = shared.api.ping(&req).await {
            shared
                .bus
                .emit(PoolEvent::new(EventKind::PingFailed).with_reason(e.to_string()));
        }
        shared.envs.prune_idle().await;
    }
}

/// Sleeps for `dur`; `false` when `stop` fired first.
async fn idle(stop: &CancellationToken, dur: Duration) -> bool {
    tokio::select! {
        _ = stop.cancelled() => false,
        _ = tokio::time::sleep(dur) => true,
    }
}

async fn join_all(units: &mut JoinSet<()>) {
    while let Some(res) = units.join_next().await {
        log_join(res);
    }
}

fn log_join(res: Result<(), JoinError>) {
    if let Err(e) = res
        && e.is_panic()
    {
        error!(error = %e, "task unit panicked");
    }
}
