use std::fmt;

use serde::{Deserialize, Serialize};

/// Pipeline stage a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    Provision,
    SourcePrep,
    Compiling,
    Collect,
    Upload,
    Report,
    /// The task was cancelled by pool shutdown.
    Cancelled,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Provision => "provision",
            Stage::SourcePrep => "sourcePrep",
            Stage::Compiling => "compiling",
            Stage::Collect => "collect",
            Stage::Upload => "upload",
            Stage::Report => "report",
            Stage::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-task lifecycle as seen by the worker pool.
///
/// `Claimed → Provisioned → SourcePrepared → Compiling → Completed`, with a
/// `Failed` exit from any non-terminal phase. After the build phases the unit
/// moves through `Uploading → Reporting → Done` regardless of the build outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BuildPhase {
    Claimed,
    Provisioned,
    SourcePrepared,
    Compiling,
    Completed,
    Failed,
    Uploading,
    Reporting,
    Done,
}

impl BuildPhase {
    /// Returns `true` if moving from `self` to `next` is a legal transition.
    pub fn can_advance_to(&self, next: BuildPhase) -> bool {
        use BuildPhase::*;
        match (self, next) {
            (Claimed, Provisioned) => true,
            (Provisioned, SourcePrepared) => true,
            (SourcePrepared, Compiling) => true,
            (Compiling, Completed) => true,
            (Claimed | Provisioned | SourcePrepared | Compiling, Failed) => true,
            (Claimed | Provisioned | Completed | Failed, Uploading) => true,
            (Uploading, Reporting) => true,
            (Reporting, Done) => true,
            _ => false,
        }
    }

    /// Build phases are over (the build has an outcome).
    pub fn has_outcome(&self) -> bool {
        matches!(
            self,
            BuildPhase::Completed
                | BuildPhase::Failed
                | BuildPhase::Uploading
                | BuildPhase::Reporting
                | BuildPhase::Done
        )
    }
}
