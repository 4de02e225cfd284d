use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::trace;

use bnode_model::{ClaimRequest, EventKind, PoolEvent, RetryPolicy, Task};

use crate::{
    error::ClaimError,
    events::Bus,
    remote::SchedulerApi,
    retry::{RetryError, with_retry},
};

/// Asks the scheduler for the next task.
#[derive(Clone)]
pub struct Claimant {
    api: Arc<dyn SchedulerApi>,
    request: ClaimRequest,
    retry: RetryPolicy,
    bus: Bus,
}

impl Claimant {
    pub fn new(api: Arc<dyn SchedulerApi>, request: ClaimRequest, retry: RetryPolicy, bus: Bus) -> Self {
        Self {
            api,
            request,
            retry,
            bus,
        }
    }

    /// `Ok(None)` when the scheduler has nothing for this node.
    ///
    /// Transient errors are retried with backoff; `cancel` interrupts the
    /// waits between attempts.
    pub async fn claim(&self, cancel: &CancellationToken) -> Result<Option<Task>, ClaimError> {
        if cancel.is_cancelled() {
            return Err(ClaimError::Cancelled);
        }

        let res = with_retry(
            &self.retry,
            Some(cancel),
            |attempt, delay, err| {
                self.bus.emit(
                    PoolEvent::new(EventKind::RetryScheduled)
                        .with_attempt(attempt)
                        .with_delay_ms(delay.as_millis() as u64)
                        .with_reason(format!("claim: {err}")),
                )
            },
            |_| self.api.claim_task(&self.request),
        )
        .await;

        match res {
            Ok(Some(task)) => {
                trace!(task = %task.id, platform = %task.platform, "claimed");
                self.bus.emit(PoolEvent::new(EventKind::TaskClaimed).with_task(&task.id));
                Ok(Some(task))
            }
            Ok(None) => Ok(None),
            Err(RetryError::Cancelled { .. }) => Err(ClaimError::Cancelled),
            Err(e) => {
                let attempts = e.attempts();
                let err = ClaimError::Remote {
                    attempts,
                    source: e.into_error(),
                };
                self.bus.emit(
                    PoolEvent::new(EventKind::ClaimFailed)
                        .with_attempt(attempts)
                        .with_reason(err.to_string()),
                );
                Err(err)
            }
        }
    }

    pub fn request(&self) -> &ClaimRequest {
        &self.request
    }
}
