//! Per-task build state machine.
//!
//! `Claimed → SourcePrepared → Compiling → Completed`, with a `Failed` exit
//! from every state. Each stage runs under its own timeout and a child of the
//! unit's cancellation token; whatever happens, the executor returns a
//! `BuildResult` and never an error.

use std::{
    any::Any,
    future::Future,
    panic::AssertUnwindSafe,
    sync::Arc,
    time::{Duration, SystemTime},
};

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

use bnode_model::{BuildPhase, BuildResult, Stage, StageTiming, Task, TerminalState};

use crate::{
    collect::missing_patterns,
    config::StageTimeouts,
    env::BuildEnv,
    error::StageError,
    log::TaskLog,
    router::ToolchainRouter,
    state::PhaseTracker,
    toolchain::{CompileOutcome, StageCtx},
};

/// Extra time granted to a stage after its token fired, on top of the kill
/// grace, before it is dropped.
const STOP_MARGIN: Duration = Duration::from_secs(2);

pub struct BuildExecutor {
    router: ToolchainRouter,
    timeouts: StageTimeouts,
}

impl BuildExecutor {
    pub fn new(router: ToolchainRouter, timeouts: StageTimeouts) -> Self {
        Self { router, timeouts }
    }

    /// Drives `task` through source preparation and compilation inside `env`.
    ///
    /// Writes `task.<id>.<ts>.log` into the environment log directory so the
    /// log is picked up by collection like any other artifact.
    #[instrument(level = "debug", skip_all, fields(task = %task.id, platform = %task.platform))]
    pub async fn execute(
        &self,
        task: Arc<Task>,
        env: &BuildEnv,
        cancel: &CancellationToken,
        tracker: &PhaseTracker,
    ) -> BuildResult {
        let log = match TaskLog::create(&env.log_dir(), &task.id).await {
            Ok(log) => log,
            Err(e) => {
                warn!(error = %e, "cannot create task log; continuing without it");
                TaskLog::disabled()
            }
        };
        log.line(format!(
            "task {} for {} ({} source, {} backend) in {} generation {}",
            task.id,
            task.platform,
            task.source.kind(),
            task.backend.as_str(),
            env.root().display(),
            env.generation(),
        ))
        .await;

        let mut timings = Vec::new();
        let result = self.drive(&task, env, cancel, tracker, &log, &mut timings).await;

        match &result.failure {
            None => log.line(format!("result: {}", result.state.as_str())).await,
            Some(f) => {
                log.line(format!("result: {} at {}: {}", result.state.as_str(), f.stage, f.message))
                    .await
            }
        }
        log.flush().await;

        result.with_timings(timings)
    }

    async fn drive(
        &self,
        task: &Arc<Task>,
        env: &BuildEnv,
        cancel: &CancellationToken,
        tracker: &PhaseTracker,
        log: &TaskLog,
        timings: &mut Vec<StageTiming>,
    ) -> BuildResult {
        if cancel.is_cancelled() {
            tracker.fail("cancelled");
            return BuildResult::failure(Stage::Cancelled, "cancelled before source preparation");
        }

        let Some(toolchain) = self.router.pick(task) else {
            let msg = format!("no toolchain for backend {}", task.backend.as_str());
            tracker.fail(&msg);
            return BuildResult::failure(Stage::SourcePrep, msg);
        };

        // source preparation
        let ctx = self.stage_ctx(task, env, cancel, log);
        log.line(format!("stage sourcePrep: {} via {}", task.source.kind(), toolchain.name())).await;
        let source = match self
            .guard(
                Stage::SourcePrep,
                self.timeouts.source_prep(),
                &ctx.cancel,
                cancel,
                timings,
                toolchain.prepare_source(&ctx),
            )
            .await
        {
            Ok(source) => source,
            Err(failed) => return self.failed(failed, tracker, log).await,
        };
        tracker.advance(BuildPhase::SourcePrepared);

        if cancel.is_cancelled() {
            tracker.fail("cancelled");
            return BuildResult::failure(Stage::Cancelled, "cancelled before compilation");
        }

        // compilation
        tracker.advance(BuildPhase::Compiling);
        let limit = task
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.timeouts.compile());
        let ctx = self.stage_ctx(task, env, cancel, log);
        log.line(format!(
            "stage compiling: {} with {} (limit {}s)",
            source.path.display(),
            toolchain.name(),
            limit.as_secs()
        ))
        .await;
        let outcome = match self
            .guard(
                Stage::Compiling,
                limit,
                &ctx.cancel,
                cancel,
                timings,
                toolchain.compile(&ctx, &source),
            )
            .await
        {
            Ok(outcome) => outcome,
            Err(failed) => return self.failed(failed, tracker, log).await,
        };

        let result = match outcome {
            CompileOutcome::Exited(0) => {
                let patterns = if task.expected_artifacts.is_empty() {
                    toolchain.expected_artifacts(task)
                } else {
                    task.expected_artifacts.clone()
                };
                let missing = missing_patterns(&env.out_dir(), &patterns);
                if missing.is_empty() {
                    BuildResult::success()
                } else {
                    BuildResult::partial_failure(
                        Stage::Compiling,
                        format!("build exited 0 but expected artifacts are missing: {}", missing.join(", ")),
                    )
                }
            }
            CompileOutcome::Exited(code) => {
                BuildResult::failure(Stage::Compiling, format!("build exited with code {code}"))
            }
            CompileOutcome::Signaled(sig) => {
                BuildResult::failure(Stage::Compiling, format!("build killed by signal {sig}"))
            }
        };

        match result.state {
            TerminalState::Failure => return self.failed(result, tracker, log).await,
            TerminalState::Success | TerminalState::PartialFailure => {
                tracker.advance(BuildPhase::Completed)
            }
        }
        result
    }

    fn stage_ctx(&self, task: &Arc<Task>, env: &BuildEnv, cancel: &CancellationToken, log: &TaskLog) -> StageCtx {
        StageCtx {
            task: Arc::clone(task),
            env: env.clone(),
            cancel: cancel.child_token(),
            log: log.clone(),
            kill_grace: self.timeouts.kill_grace(),
        }
    }

    async fn failed(&self, result: BuildResult, tracker: &PhaseTracker, log: &TaskLog) -> BuildResult {
        if let Some(f) = &result.failure {
            debug!(stage = %f.stage, reason = %f.message, "build failed");
            log.line(format!("stage {} failed: {}", f.stage, f.message)).await;
            tracker.fail(&f.message);
        }
        result
    }

    /// Runs one stage future under `limit`.
    ///
    /// On timeout or pool cancellation the stage token is cancelled and the
    /// stage gets `kill_grace` plus a margin to stop its processes before it
    /// is dropped. A panicking stage fails the task at that stage.
    async fn guard<T, F>(
        &self,
        stage: Stage,
        limit: Duration,
        stage_token: &CancellationToken,
        pool_token: &CancellationToken,
        timings: &mut Vec<StageTiming>,
        fut: F,
    ) -> Result<T, BuildResult>
    where
        F: Future<Output = Result<T, StageError>>,
    {
        let start = SystemTime::now();
        let stop_wait = self.timeouts.kill_grace() + STOP_MARGIN;
        let fut = AssertUnwindSafe(fut).catch_unwind().map(|r| {
            r.unwrap_or_else(|payload| Err(StageError::Panicked(panic_message(payload.as_ref()))))
        });
        tokio::pin!(fut);

        let mut timed_out = false;
        let res = tokio::select! {
            r = &mut fut => r,
            _ = tokio::time::sleep(limit) => {
                timed_out = true;
                stage_token.cancel();
                tokio::time::timeout(stop_wait, &mut fut)
                    .await
                    .unwrap_or(Err(StageError::Cancelled))
            }
            _ = pool_token.cancelled() => {
                stage_token.cancel();
                tokio::time::timeout(stop_wait, &mut fut)
                    .await
                    .unwrap_or(Err(StageError::Cancelled))
            }
        };
        timings.push(StageTiming::new(stage, start, SystemTime::now()));

        if timed_out {
            return Err(BuildResult::failure(stage, "timeout"));
        }
        match res {
            Ok(v) => Ok(v),
            Err(StageError::Panicked(msg)) => {
                error!(%stage, panic = %msg, "stage panicked");
                Err(BuildResult::failure(stage, format!("panic: {msg}")))
            }
            Err(StageError::Cancelled) => Err(BuildResult::failure(
                Stage::Cancelled,
                format!("cancelled during {stage}"),
            )),
            Err(_) if pool_token.is_cancelled() => Err(BuildResult::failure(
                Stage::Cancelled,
                format!("cancelled during {stage}"),
            )),
            Err(e) => Err(BuildResult::failure(stage, e.to_string())),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
