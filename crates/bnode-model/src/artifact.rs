use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// What an artifact file is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ArtifactKind {
    Log,
    Package,
    Metadata,
}

impl ArtifactKind {
    /// Classifies a file by its name.
    ///
    /// - `.rpm`, `.deb`, `.udeb` → package
    /// - `.log`, `.log.gz`, `.txt` → log
    /// - anything else (mock configs, `.buildinfo`, `.changes`, ...) → metadata
    pub fn from_file_name(name: &str) -> Self {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".rpm") || lower.ends_with(".deb") || lower.ends_with(".udeb") {
            ArtifactKind::Package
        } else if lower.ends_with(".log") || lower.ends_with(".log.gz") || lower.ends_with(".txt") {
            ArtifactKind::Log
        } else {
            ArtifactKind::Metadata
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Log => "log",
            ArtifactKind::Package => "package",
            ArtifactKind::Metadata => "metadata",
        }
    }
}

/// Upload progress of a single artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum UploadState {
    Pending,
    Uploaded { url: String },
    Failed { reason: String },
}

impl UploadState {
    #[inline]
    pub fn is_uploaded(&self) -> bool {
        matches!(self, UploadState::Uploaded { .. })
    }
}

/// One file to ship to the artifact store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactDescriptor {
    pub path: PathBuf,
    /// Logical name, unique within a task.
    pub name: String,
    pub kind: ArtifactKind,
    pub size: u64,
    /// Hex-encoded sha256 of the content.
    pub sha256: String,
    pub upload: UploadState,
}

impl ArtifactDescriptor {
    pub fn new(path: impl AsRef<Path>, name: impl Into<String>, size: u64, sha256: String) -> Self {
        let name = name.into();
        Self {
            path: path.as_ref().to_path_buf(),
            kind: ArtifactKind::from_file_name(&name),
            name,
            size,
            sha256,
            upload: UploadState::Pending,
        }
    }

    /// Marks the artifact uploaded under `url`.
    pub fn mark_uploaded(&mut self, url: impl Into<String>) {
        self.upload = UploadState::Uploaded { url: url.into() };
    }

    /// Marks the artifact failed; failed artifacts are never retried again.
    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        self.upload = UploadState::Failed {
            reason: reason.into(),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_by_name() {
        assert_eq!(ArtifactKind::from_file_name("bash-5.1-1.el8.x86_64.rpm"), ArtifactKind::Package);
        assert_eq!(ArtifactKind::from_file_name("hello_2.10_amd64.deb"), ArtifactKind::Package);
        assert_eq!(ArtifactKind::from_file_name("build.log"), ArtifactKind::Log);
        assert_eq!(ArtifactKind::from_file_name("root.LOG.gz"), ArtifactKind::Log);
        assert_eq!(ArtifactKind::from_file_name("mock.17.cfg"), ArtifactKind::Metadata);
        assert_eq!(ArtifactKind::from_file_name("hello_2.10_amd64.buildinfo"), ArtifactKind::Metadata);
    }

    #[test]
    fn descriptor_upload_transitions() {
        let mut d = ArtifactDescriptor::new("/tmp/out/build.log", "build.log", 12, "ab".into());
        assert_eq!(d.kind, ArtifactKind::Log);
        assert_eq!(d.upload, UploadState::Pending);

        d.mark_uploaded("https://store/17/build.log");
        assert!(d.upload.is_uploaded());

        d.mark_failed("boom");
        assert_eq!(d.upload, UploadState::Failed { reason: "boom".into() });
    }
}
