//! Domain types shared by every build node crate.
//!
//! This crate carries no runtime: tasks claimed from the scheduler, build
//! results, artifact descriptors, retry strategies and the wire payloads
//! exchanged with the scheduler all live here.

mod task_id;
pub use task_id::TaskId;

mod platform;
pub use platform::{EnvKey, Platform};

mod task;
pub use task::{BackendKind, SourceRef, Task};

mod stage;
pub use stage::{BuildPhase, Stage};

mod artifact;
pub use artifact::{ArtifactDescriptor, ArtifactKind, UploadState};

mod result;
pub use result::{BuildResult, FailureDetail, StageTiming, TerminalState};

mod backoff;
pub use backoff::{BackoffStrategy, JitterStrategy, RetryPolicy};

mod wire;
pub use wire::{ArtifactEntry, ClaimRequest, PingRequest, StatusReport};

mod event;
pub use event::{EventKind, PoolEvent};

mod error;
pub use error::ModelError;

pub(crate) mod time_serde;

/// Timeout value in milliseconds.
pub type TimeoutMs = u64;
