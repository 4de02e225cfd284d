//! Seams to the two remote services a build node talks to.
//!
//! The pool only sees these traits; `bnode-client` provides the HTTP
//! implementations and tests plug in in-memory fakes.

use async_trait::async_trait;
use thiserror::Error;

use bnode_model::{ArtifactDescriptor, ClaimRequest, PingRequest, StatusReport, Task, TaskId};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("request timed out")]
    Timeout,
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid response: {0}")]
    Decode(String),
    #[error("local io error: {0}")]
    Io(String),
}

impl RemoteError {
    /// Whether repeating the same call may succeed.
    ///
    /// Network failures, timeouts, 5xx, 408 and 429 are transient; any other
    /// status is the call's own failure.
    pub fn is_transient(&self) -> bool {
        match self {
            RemoteError::Transport(_) | RemoteError::Timeout => true,
            RemoteError::Status { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            RemoteError::Decode(_) | RemoteError::Io(_) => false,
        }
    }

    /// The scheduler already holds a terminal state for the task.
    #[inline]
    pub fn is_conflict(&self) -> bool {
        matches!(self, RemoteError::Status { status: 409, .. })
    }
}

/// Task assignment and status endpoints of the central scheduler.
#[async_trait]
pub trait SchedulerApi: Send + Sync + 'static {
    /// `Ok(None)` means no task is currently available for this node.
    async fn claim_task(&self, req: &ClaimRequest) -> Result<Option<Task>, RemoteError>;

    async fn report_status(&self, task: &TaskId, report: &StatusReport) -> Result<(), RemoteError>;

    async fn ping(&self, req: &PingRequest) -> Result<(), RemoteError>;
}

/// Per-artifact blob storage.
#[async_trait]
pub trait ArtifactStore: Send + Sync + 'static {
    /// Stores the artifact under `<task>/<name>` and returns its stable url.
    ///
    /// Uploading the same name and content twice must be harmless.
    async fn put(&self, task: &TaskId, artifact: &ArtifactDescriptor) -> Result<String, RemoteError>;
}
