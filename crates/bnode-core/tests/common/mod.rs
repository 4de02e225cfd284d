#![allow(dead_code)]

use std::{
    collections::{HashMap, VecDeque},
    path::Path,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::{Duration, Instant, SystemTime},
};

use async_trait::async_trait;
use tokio::task::JoinHandle;

use bnode_core::{
    ArtifactStore, CompileOutcome, EndpointConfig, NodeConfig, PoolDeps, PoolSummary, PreparedSource, RemoteError,
    SchedulerApi, StageCtx, StageError, StageTimeouts, Subscribe, Toolchain, ToolchainRouter, WorkerPool,
};
use bnode_model::{
    ArtifactDescriptor, ClaimRequest, EventKind, PingRequest, Platform, PoolEvent, RetryPolicy, SourceRef,
    StatusReport, Task, TaskId,
};

pub fn task(id: &str) -> Task {
    Task {
        id: TaskId::from(id),
        platform: Platform::new("el8", "x86_64"),
        source: SourceRef::Blob {
            path: format!("/srv/sources/{id}").into(),
        },
        expected_artifacts: Vec::new(),
        backend: Default::default(),
        timeout_ms: None,
        created_at: SystemTime::UNIX_EPOCH,
    }
}

/// In-memory scheduler handing out a fixed queue of tasks.
#[derive(Default)]
pub struct FakeScheduler {
    queue: Mutex<VecDeque<Task>>,
    pub claim_calls: AtomicUsize,
    pub reports: Mutex<Vec<(TaskId, StatusReport)>>,
    pub pings: Mutex<Vec<PingRequest>>,
}

impl FakeScheduler {
    pub fn with_tasks(tasks: impl IntoIterator<Item = Task>) -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(tasks.into_iter().collect()),
            ..Default::default()
        })
    }

    pub fn report_count(&self) -> usize {
        self.reports.lock().unwrap().len()
    }

    pub fn report_for(&self, id: &str) -> Option<StatusReport> {
        self.reports
            .lock()
            .unwrap()
            .iter()
            .find(|(t, _)| t.as_str() == id)
            .map(|(_, r)| r.clone())
    }
}

#[async_trait]
impl SchedulerApi for FakeScheduler {
    async fn claim_task(&self, _: &ClaimRequest) -> Result<Option<Task>, RemoteError> {
        self.claim_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.queue.lock().unwrap().pop_front())
    }

    async fn report_status(&self, task: &TaskId, report: &StatusReport) -> Result<(), RemoteError> {
        self.reports.lock().unwrap().push((task.clone(), report.clone()));
        Ok(())
    }

    async fn ping(&self, req: &PingRequest) -> Result<(), RemoteError> {
        self.pings.lock().unwrap().push(req.clone());
        Ok(())
    }
}

/// Store that rejects every artifact whose name contains `reject`.
#[derive(Default)]
pub struct FakeStore {
    pub reject: Option<String>,
    pub stored: Mutex<Vec<(TaskId, String)>>,
}

#[async_trait]
impl ArtifactStore for FakeStore {
    async fn put(&self, task: &TaskId, a: &ArtifactDescriptor) -> Result<String, RemoteError> {
        if let Some(bad) = &self.reject
            && a.name.contains(bad.as_str())
        {
            return Err(RemoteError::Status {
                status: 503,
                body: "store unavailable".into(),
            });
        }
        self.stored.lock().unwrap().push((task.clone(), a.name.clone()));
        Ok(format!("https://store.test/{task}/{}", a.name))
    }
}

/// What the fake toolchain does for a given task.
#[derive(Debug, Clone, Copy)]
pub enum Plan {
    /// Writes `<id>.x86_64.rpm` and exits 0 after a short build.
    Succeed,
    /// Like `Succeed` plus a `<id>-debuginfo.x86_64.rpm`.
    WithDebuginfo,
    /// Exits 0 without producing a package.
    NoPackages,
    Exit(i32),
    /// Runs until cancelled.
    Hang,
    /// Ignores cancellation for a minute.
    Stubborn,
    /// Panics inside the compile stage.
    Panic,
    /// Source preparation fails after writing to the task log.
    SourceFails,
}

/// Toolchain driven by per-task plans that records what it observed.
#[derive(Default)]
pub struct FakeToolchain {
    plans: HashMap<String, Plan>,
    pub build_time: Duration,
    running: AtomicUsize,
    pub peak: AtomicUsize,
    pub dirty_env: AtomicBool,
    pub compiling: AtomicUsize,
}

impl FakeToolchain {
    pub fn new(build_time: Duration) -> Self {
        Self {
            build_time,
            ..Default::default()
        }
    }

    pub fn plan(mut self, id: &str, plan: Plan) -> Self {
        self.plans.insert(id.to_string(), plan);
        self
    }

    fn plan_for(&self, task: &Task) -> Plan {
        self.plans.get(task.id.as_str()).copied().unwrap_or(Plan::Succeed)
    }
}

#[async_trait]
impl Toolchain for FakeToolchain {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn supports(&self, _: &Task) -> bool {
        true
    }

    async fn prepare_source(&self, ctx: &StageCtx) -> Result<PreparedSource, StageError> {
        if let Plan::SourceFails = self.plan_for(&ctx.task) {
            ctx.log.line("fetching sources: connection refused").await;
            return Err(StageError::Source("connection refused".into()));
        }
        let path = ctx.env.src_dir().join("source.spec");
        tokio::fs::write(&path, ctx.task.id.as_str()).await?;
        Ok(PreparedSource { path })
    }

    async fn compile(&self, ctx: &StageCtx, _: &PreparedSource) -> Result<CompileOutcome, StageError> {
        let out = ctx.env.out_dir();
        if std::fs::read_dir(&out)?.next().is_some() {
            self.dirty_env.store(true, Ordering::SeqCst);
        }

        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.compiling.fetch_add(1, Ordering::SeqCst);

        let id = ctx.task.id.as_str();
        let plan = self.plan_for(&ctx.task);
        let res = match plan {
            Plan::Hang => {
                ctx.cancel.cancelled().await;
                Err(StageError::Cancelled)
            }
            Plan::Stubborn => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(CompileOutcome::Exited(0))
            }
            Plan::Panic => panic!("compiler wrapper crashed for {id}"),
            _ => {
                tokio::time::sleep(self.build_time).await;
                match plan {
                    Plan::Succeed | Plan::WithDebuginfo => {
                        tokio::fs::write(out.join(format!("{id}.x86_64.rpm")), id).await?;
                        if matches!(plan, Plan::WithDebuginfo) {
                            tokio::fs::write(out.join(format!("{id}-debuginfo.x86_64.rpm")), id).await?;
                        }
                        Ok(CompileOutcome::Exited(0))
                    }
                    Plan::NoPackages => {
                        tokio::fs::write(out.join("root.log"), "nothing built").await?;
                        Ok(CompileOutcome::Exited(0))
                    }
                    Plan::Exit(code) => Ok(CompileOutcome::Exited(code)),
                    Plan::Hang | Plan::Stubborn | Plan::Panic | Plan::SourceFails => unreachable!(),
                }
            }
        };

        self.running.fetch_sub(1, Ordering::SeqCst);
        res
    }

    fn expected_artifacts(&self, _: &Task) -> Vec<String> {
        vec!["*.rpm".into()]
    }
}

/// Keeps every event it receives.
#[derive(Default)]
pub struct Recorder {
    pub events: Mutex<Vec<PoolEvent>>,
}

impl Recorder {
    pub fn count(&self, kind: EventKind) -> usize {
        self.events.lock().unwrap().iter().filter(|e| e.kind == kind).count()
    }
}

#[async_trait]
impl Subscribe for Recorder {
    async fn on_event(&self, event: &PoolEvent) {
        self.events.lock().unwrap().push(event.clone());
    }

    fn name(&self) -> &'static str {
        "recorder"
    }
}

/// Fast timings suitable for tests.
pub fn config(work_dir: &Path, max_builds: usize) -> NodeConfig {
    let endpoint = |url: &str| EndpointConfig {
        base_url: url.into(),
        ..Default::default()
    };
    NodeConfig {
        node_id: Some("node-test".into()),
        work_dir: work_dir.to_path_buf(),
        max_concurrent_builds: max_builds,
        poll_interval_ms: 10,
        poll_jitter_ms: 0,
        ping_interval_ms: 20,
        timeouts: StageTimeouts {
            kill_grace_ms: 50,
            ..Default::default()
        },
        claim_retry: RetryPolicy::fixed(2, 1),
        upload_retry: RetryPolicy::fixed(2, 1),
        report_retry: RetryPolicy::fixed(2, 1),
        shutdown_grace_ms: 5_000,
        force_grace_ms: 1_000,
        scheduler: endpoint("http://scheduler.test"),
        artifact_store: endpoint("http://store.test"),
        ..Default::default()
    }
}

pub struct Harness {
    pub pool: Arc<WorkerPool>,
    runner: JoinHandle<PoolSummary>,
}

impl Harness {
    pub async fn start(
        cfg: &NodeConfig,
        scheduler: Arc<FakeScheduler>,
        store: Arc<FakeStore>,
        toolchain: Arc<FakeToolchain>,
        subscribers: Vec<Arc<dyn Subscribe>>,
    ) -> Self {
        let deps = PoolDeps {
            scheduler,
            store,
            router: ToolchainRouter::new().with(toolchain),
            subscribers,
        };
        let pool = Arc::new(WorkerPool::new(cfg, deps).await.unwrap());
        let runner = tokio::spawn({
            let pool = Arc::clone(&pool);
            async move { pool.run().await }
        });
        Self { pool, runner }
    }

    pub async fn stop(self) -> PoolSummary {
        self.pool.handle().shutdown();
        self.runner.await.unwrap()
    }

    pub async fn stop_now(self) -> PoolSummary {
        self.pool.handle().shutdown_now();
        self.runner.await.unwrap()
    }
}

/// Polls `cond` until it holds or `within` elapses.
pub async fn eventually(within: Duration, cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + within;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
