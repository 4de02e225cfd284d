use std::path::PathBuf;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::{Platform, TaskId, TimeoutMs};

/// Where the sources of a build come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SourceRef {
    /// Git repository checked out at `git_ref` (branch, tag or commit).
    #[serde(rename_all = "camelCase")]
    Git { url: String, git_ref: String },
    /// Ready source package (src-RPM, `.dsc`, tarball) downloaded by URL.
    SrcPackage { url: String },
    /// Source already materialized on the node's filesystem.
    Blob { path: PathBuf },
}

impl SourceRef {
    /// Short symbolic identifier for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            SourceRef::Git { .. } => "git",
            SourceRef::SrcPackage { .. } => "srcPackage",
            SourceRef::Blob { .. } => "blob",
        }
    }
}

/// Packaging backend a task must be built with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BackendKind {
    #[default]
    Rpm,
    Deb,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Rpm => "rpm",
            BackendKind::Deb => "deb",
        }
    }
}

/// One build request claimed from the scheduler.
///
/// Immutable once claimed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub platform: Platform,
    pub source: SourceRef,
    /// Glob patterns (relative to the build output directory) that must all
    /// match for the build to count as complete. Empty means "backend default".
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expected_artifacts: Vec<String>,
    #[serde(default)]
    pub backend: BackendKind,
    /// Per-task override of the compile stage timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<TimeoutMs>,
    #[serde(with = "crate::time_serde")]
    pub created_at: SystemTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_scheduler_payload() {
        let json = r#"{
            "id": 17,
            "platform": {"distro": "el8", "arch": "x86_64"},
            "source": {"type": "git", "url": "https://git.example.org/rpms/bash.git", "gitRef": "c8"},
            "expectedArtifacts": ["bash-*.x86_64.rpm", "bash-doc-*.rpm"],
            "createdAt": 1700000000
        }"#;

        let task: Task = serde_json::from_str(json).unwrap();
        assert_eq!(task.id.as_str(), "17");
        assert_eq!(task.backend, BackendKind::Rpm);
        assert_eq!(task.expected_artifacts.len(), 2);
        assert!(task.timeout_ms.is_none());
        assert_eq!(
            task.source,
            SourceRef::Git {
                url: "https://git.example.org/rpms/bash.git".into(),
                git_ref: "c8".into(),
            }
        );
    }

    #[test]
    fn decode_deb_src_package() {
        let json = r#"{
            "id": "t-2",
            "platform": {"distro": "bookworm", "arch": "amd64"},
            "source": {"type": "srcPackage", "url": "https://deb.example.org/hello_2.10-3.dsc"},
            "backend": "deb",
            "timeoutMs": 60000,
            "createdAt": 1700000000
        }"#;

        let task: Task = serde_json::from_str(json).unwrap();
        assert_eq!(task.backend, BackendKind::Deb);
        assert_eq!(task.timeout_ms, Some(60_000));
        assert_eq!(task.source.kind(), "srcPackage");
        assert!(task.expected_artifacts.is_empty());
    }
}
