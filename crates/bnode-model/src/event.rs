use crate::{BuildPhase, TaskId, TerminalState};

/// Kind of a worker pool lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    // pool
    PoolStarted,
    ShutdownRequested,
    AllStoppedWithinGrace,
    GraceExceeded,
    TaskForceDropped,
    MaintenanceEntered,
    MaintenanceLeft,

    // claim
    TaskClaimed,
    ClaimFailed,

    // task unit
    PhaseChanged,
    ProvisionFailed,
    TaskFinished,

    // remote calls
    RetryScheduled,
    ArtifactUploaded,
    ArtifactFailed,
    ReportSent,
    ReportFailed,
    PingFailed,
}

/// Event emitted by the worker pool to its subscribers.
///
/// Optional fields are filled depending on the kind.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolEvent {
    pub kind: EventKind,
    pub task: Option<TaskId>,
    pub reason: Option<String>,
    pub attempt: Option<u32>,
    pub delay_ms: Option<u64>,
    pub phase: Option<BuildPhase>,
    pub state: Option<TerminalState>,
    pub duration_ms: Option<u64>,
}

impl PoolEvent {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            task: None,
            reason: None,
            attempt: None,
            delay_ms: None,
            phase: None,
            state: None,
            duration_ms: None,
        }
    }

    pub fn with_task(mut self, task: &TaskId) -> Self {
        self.task = Some(task.clone());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = Some(delay_ms);
        self
    }

    pub fn with_phase(mut self, phase: BuildPhase) -> Self {
        self.phase = Some(phase);
        self
    }

    pub fn with_state(mut self, state: TerminalState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }
}
