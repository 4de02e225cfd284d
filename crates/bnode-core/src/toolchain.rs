use std::{path::PathBuf, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use bnode_model::Task;

use crate::{env::BuildEnv, error::StageError, log::TaskLog};

/// Everything a toolchain needs to run one stage of one task.
#[derive(Clone)]
pub struct StageCtx {
    pub task: Arc<Task>,
    pub env: BuildEnv,
    /// Fires on pool cancellation or stage timeout.
    pub cancel: CancellationToken,
    pub log: TaskLog,
    /// Delay between SIGTERM and SIGKILL when a build must be stopped.
    pub kill_grace: Duration,
}

/// Materialized sources, ready for compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedSource {
    /// File (source package) or directory (checkout) handed to the builder.
    pub path: PathBuf,
}

/// How the build process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileOutcome {
    Exited(i32),
    Signaled(i32),
}

impl CompileOutcome {
    #[inline]
    pub fn success(&self) -> bool {
        matches!(self, CompileOutcome::Exited(0))
    }
}

/// A packaging backend the executor can drive.
#[async_trait]
pub trait Toolchain: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Whether this toolchain can build `task`.
    fn supports(&self, task: &Task) -> bool;

    async fn prepare_source(&self, ctx: &StageCtx) -> Result<PreparedSource, StageError>;

    /// Runs the builder.
    ///
    /// Must return `StageError::Cancelled` once `ctx.cancel` fired and the
    /// build process group is gone.
    async fn compile(
        &self,
        ctx: &StageCtx,
        source: &PreparedSource,
    ) -> Result<CompileOutcome, StageError>;

    /// Output patterns required when the task itself lists none.
    fn expected_artifacts(&self, task: &Task) -> Vec<String>;
}
