use serde::{Deserialize, Serialize};

use crate::{
    ArtifactDescriptor, ArtifactKind, BuildResult, Stage, StageTiming, TaskId, TerminalState,
    UploadState,
};

/// Parameters of a task assignment request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRequest {
    pub node_id: String,
    pub supported_arches: Vec<String>,
}

/// Per-artifact line of a status report: a `url` when uploaded, an `error` otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactEntry {
    pub name: String,
    pub kind: ArtifactKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&ArtifactDescriptor> for ArtifactEntry {
    fn from(d: &ArtifactDescriptor) -> Self {
        let (url, error) = match &d.upload {
            UploadState::Uploaded { url } => (Some(url.clone()), None),
            UploadState::Failed { reason } => (None, Some(reason.clone())),
            UploadState::Pending => (None, Some("not uploaded".to_string())),
        };
        Self {
            name: d.name.clone(),
            kind: d.kind,
            url,
            error,
        }
    }
}

/// Body of `POST /task/{id}/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub state: TerminalState,
    pub artifacts: Vec<ArtifactEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage_on_failure: Option<Stage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stats: Vec<StageTiming>,
}

impl From<&BuildResult> for StatusReport {
    fn from(r: &BuildResult) -> Self {
        Self {
            state: r.state,
            artifacts: r.artifacts.iter().map(ArtifactEntry::from).collect(),
            stage_on_failure: r.failure.as_ref().map(|f| f.stage),
            message: r.failure.as_ref().map(|f| f.message.clone()),
            stats: r.timings.clone(),
        }
    }
}

/// Body of `POST /ping`: tasks this node is still working on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingRequest {
    pub node: String,
    pub active_tasks: Vec<TaskId>,
}
