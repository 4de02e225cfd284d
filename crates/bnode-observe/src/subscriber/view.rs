use std::borrow::Borrow;

use bnode_model::{EventKind, PoolEvent};
use tracing::{debug, error, info, trace, warn};

pub trait View {
    fn as_task(&self) -> &str;
    fn as_reason(&self) -> &str;
    fn attempt(&self) -> u32;
    fn delay_ms(&self) -> u64;
    fn duration_ms(&self) -> u64;
    fn as_phase(&self) -> &'static str;
    fn as_state(&self) -> &'static str;
    fn kind(&self) -> EventKind;
}

impl<T> View for T
where
    T: Borrow<PoolEvent>,
{
    #[inline]
    fn as_task(&self) -> &str {
        self.borrow().task.as_ref().map(|t| t.as_str()).unwrap_or("unknown")
    }
    #[inline]
    fn as_reason(&self) -> &str {
        self.borrow().reason.as_deref().unwrap_or("unknown")
    }
    #[inline]
    fn attempt(&self) -> u32 {
        self.borrow().attempt.unwrap_or(0)
    }
    #[inline]
    fn delay_ms(&self) -> u64 {
        self.borrow().delay_ms.unwrap_or(0)
    }
    #[inline]
    fn duration_ms(&self) -> u64 {
        self.borrow().duration_ms.unwrap_or(0)
    }
    #[inline]
    fn as_phase(&self) -> &'static str {
        use bnode_model::BuildPhase::*;
        match self.borrow().phase {
            Some(Claimed) => "claimed",
            Some(Provisioned) => "provisioned",
            Some(SourcePrepared) => "sourcePrepared",
            Some(Compiling) => "compiling",
            Some(Completed) => "completed",
            Some(Failed) => "failed",
            Some(Uploading) => "uploading",
            Some(Reporting) => "reporting",
            Some(Done) => "done",
            None => "unknown",
        }
    }
    #[inline]
    fn as_state(&self) -> &'static str {
        self.borrow().state.map(|s| s.as_str()).unwrap_or("unknown")
    }
    #[inline]
    fn kind(&self) -> EventKind {
        self.borrow().kind
    }
}

#[inline]
pub fn message_for(kind: EventKind) -> &'static str {
    match kind {
        // pool
        EventKind::PoolStarted => "worker pool started",
        EventKind::ShutdownRequested => "shutdown requested; no new tasks will be claimed",
        EventKind::AllStoppedWithinGrace => "all task units stopped within grace period",
        EventKind::GraceExceeded => "grace exceeded; cancelling in-flight tasks",
        EventKind::TaskForceDropped => "task unit force-dropped; upload and report skipped",
        EventKind::MaintenanceEntered => "maintenance file present; claiming paused",
        EventKind::MaintenanceLeft => "maintenance file removed; claiming resumed",

        // claim
        EventKind::TaskClaimed => "task claimed",
        EventKind::ClaimFailed => "task claim failed after retries",

        // task unit
        EventKind::PhaseChanged => "task phase changed",
        EventKind::ProvisionFailed => "build environment provisioning failed",
        EventKind::TaskFinished => "task build finished",

        // remote calls
        EventKind::RetryScheduled => "remote call failed; retry scheduled",
        EventKind::ArtifactUploaded => "artifact uploaded",
        EventKind::ArtifactFailed => "artifact upload failed permanently",
        EventKind::ReportSent => "terminal status reported",
        EventKind::ReportFailed => "terminal status could not be reported; outcome only recorded locally",
        EventKind::PingFailed => "active tasks heartbeat failed",
    }
}

#[inline]
pub fn log_event<E: View>(e: E) {
    let msg = message_for(e.kind());

    match e.kind() {
        // pool
        EventKind::PoolStarted => info!("{msg}"),
        EventKind::ShutdownRequested => info!("{msg}"),
        EventKind::AllStoppedWithinGrace => info!("{msg}"),
        EventKind::GraceExceeded => warn!("{msg}"),
        EventKind::TaskForceDropped => {
            error!(task = e.as_task(), reason = e.as_reason(), "{msg}")
        }
        EventKind::MaintenanceEntered => warn!("{msg}"),
        EventKind::MaintenanceLeft => info!("{msg}"),

        // claim
        EventKind::TaskClaimed => info!(task = e.as_task(), "{msg}"),
        EventKind::ClaimFailed => {
            warn!(attempt = e.attempt(), reason = e.as_reason(), "{msg}")
        }

        // task unit
        EventKind::PhaseChanged => {
            debug!(task = e.as_task(), phase = e.as_phase(), "{msg}")
        }
        EventKind::ProvisionFailed => {
            error!(task = e.as_task(), reason = e.as_reason(), "{msg}")
        }
        EventKind::TaskFinished => {
            if e.as_state() == "success" {
                info!(
                    task = e.as_task(),
                    state = e.as_state(),
                    duration_ms = e.duration_ms(),
                    "{msg}"
                )
            } else {
                warn!(
                    task = e.as_task(),
                    state = e.as_state(),
                    duration_ms = e.duration_ms(),
                    reason = e.as_reason(),
                    "{msg}"
                )
            }
        }

        // remote calls
        EventKind::RetryScheduled => debug!(
            task = e.as_task(),
            attempt = e.attempt(),
            delay_ms = e.delay_ms(),
            reason = e.as_reason(),
            "{msg}"
        ),
        EventKind::ArtifactUploaded => trace!(task = e.as_task(), artifact = e.as_reason(), "{msg}"),
        EventKind::ArtifactFailed => {
            warn!(task = e.as_task(), reason = e.as_reason(), "{msg}")
        }
        EventKind::ReportSent => {
            debug!(task = e.as_task(), state = e.as_state(), "{msg}")
        }
        EventKind::ReportFailed => {
            error!(task = e.as_task(), state = e.as_state(), reason = e.as_reason(), "{msg}")
        }
        EventKind::PingFailed => warn!(reason = e.as_reason(), "{msg}"),
    }
}
