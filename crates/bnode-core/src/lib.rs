//! Build node runtime: claims build tasks, runs them inside pooled build
//! environments and ships artifacts and status back.
//!
//! Process spawning and HTTP transports live in sibling crates; this one only
//! sees them through [`Toolchain`], [`SchedulerApi`] and [`ArtifactStore`].

pub mod error;
pub use error::{ClaimError, ConfigError, CoreError, EnvError, ReportError, StageError};

pub mod remote;
pub use remote::{ArtifactStore, RemoteError, SchedulerApi};

pub mod events;
pub use events::{Bus, Subscribe};

pub mod retry;
pub use retry::{RetryError, with_retry};

pub mod config;
pub use config::{EndpointConfig, EnvSettings, NodeConfig, ProcessLimits, StageTimeouts, ToolchainSpec};

pub mod system;

pub mod state;
pub use state::{PhaseTracker, TaskInfo, TaskState};

pub mod env;
pub use env::{BuildEnv, EnvLease, EnvPool, EnvStats};

pub mod log;
pub use log::TaskLog;

pub mod toolchain;
pub use toolchain::{CompileOutcome, PreparedSource, StageCtx, Toolchain};

pub mod router;
pub use router::ToolchainRouter;

pub mod collect;

pub mod upload;
pub use upload::Uploader;

pub mod report;
pub use report::Reporter;

pub mod claim;
pub use claim::Claimant;

pub mod executor;
pub use executor::BuildExecutor;

pub mod pool;
pub use pool::{PoolDeps, PoolHandle, PoolSummary, WorkerPool};
