use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::time_serde::unix_ms;
use crate::{ArtifactDescriptor, Stage};

/// Terminal outcome of a task.
///
/// `PartialFailure` is its own state: the build process nominally completed
/// but did not produce the full expected artifact set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TerminalState {
    Success,
    PartialFailure,
    Failure,
}

impl TerminalState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminalState::Success => "success",
            TerminalState::PartialFailure => "partialFailure",
            TerminalState::Failure => "failure",
        }
    }
}

/// Where and why a build did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDetail {
    pub stage: Stage,
    pub message: String,
}

/// Wall-clock span of one pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageTiming {
    pub stage: Stage,
    pub start_ms: u64,
    pub end_ms: u64,
}

impl StageTiming {
    pub fn new(stage: Stage, start: SystemTime, end: SystemTime) -> Self {
        Self {
            stage,
            start_ms: unix_ms(start),
            end_ms: unix_ms(end),
        }
    }

    #[inline]
    pub fn duration_ms(&self) -> u64 {
        self.end_ms.saturating_sub(self.start_ms)
    }
}

/// Outcome of executing one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildResult {
    pub state: TerminalState,
    pub failure: Option<FailureDetail>,
    pub artifacts: Vec<ArtifactDescriptor>,
    pub timings: Vec<StageTiming>,
}

impl BuildResult {
    pub fn success() -> Self {
        Self::with_state(TerminalState::Success, None)
    }

    pub fn partial_failure(stage: Stage, message: impl Into<String>) -> Self {
        Self::with_state(
            TerminalState::PartialFailure,
            Some(FailureDetail {
                stage,
                message: message.into(),
            }),
        )
    }

    pub fn failure(stage: Stage, message: impl Into<String>) -> Self {
        Self::with_state(
            TerminalState::Failure,
            Some(FailureDetail {
                stage,
                message: message.into(),
            }),
        )
    }

    fn with_state(state: TerminalState, failure: Option<FailureDetail>) -> Self {
        Self {
            state,
            failure,
            artifacts: Vec::new(),
            timings: Vec::new(),
        }
    }

    pub fn with_timings(mut self, timings: Vec<StageTiming>) -> Self {
        self.timings = timings;
        self
    }

    /// Stage the failure is attributed to, if any.
    #[inline]
    pub fn failed_stage(&self) -> Option<Stage> {
        self.failure.as_ref().map(|f| f.stage)
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        self.state == TerminalState::Success
    }
}
