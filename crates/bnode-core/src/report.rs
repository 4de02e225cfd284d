use std::sync::Arc;

use tracing::{debug, error, instrument};

use bnode_model::{BuildResult, EventKind, PoolEvent, RetryPolicy, StatusReport, TaskId};

use crate::{
    error::ReportError,
    events::Bus,
    remote::SchedulerApi,
    retry::{RetryError, with_retry},
};

/// Sends terminal task status to the scheduler.
#[derive(Clone)]
pub struct Reporter {
    api: Arc<dyn SchedulerApi>,
    retry: RetryPolicy,
    bus: Bus,
}

impl Reporter {
    pub fn new(api: Arc<dyn SchedulerApi>, retry: RetryPolicy, bus: Bus) -> Self {
        Self { api, retry, bus }
    }

    /// Reports `result` for `task`.
    ///
    /// `409 Conflict` means the scheduler already finalized the task and is
    /// taken as an acknowledgement. When every attempt fails the error is
    /// logged and returned; the caller only records the outcome locally.
    #[instrument(level = "debug", skip(self, result), fields(task = %task, state = result.state.as_str()))]
    pub async fn report(&self, task: &TaskId, result: &BuildResult) -> Result<(), ReportError> {
        let body = StatusReport::from(result);

        let res = with_retry(
            &self.retry,
            None,
            |attempt, delay, err| {
                self.bus.emit(
                    PoolEvent::new(EventKind::RetryScheduled)
                        .with_task(task)
                        .with_attempt(attempt)
                        .with_delay_ms(delay.as_millis() as u64)
                        .with_reason(format!("status report: {err}")),
                )
            },
            |_| self.api.report_status(task, &body),
        )
        .await;

        let err = match res {
            Ok(()) => None,
            Err(RetryError::Permanent { error, .. }) if error.is_conflict() => {
                debug!("task already finalized on the scheduler");
                None
            }
            Err(RetryError::Permanent { error, .. }) => Some(ReportError::Rejected {
                task: task.to_string(),
                source: error,
            }),
            Err(e) => Some(ReportError::Exhausted {
                task: task.to_string(),
                attempts: e.attempts(),
                source: e.into_error(),
            }),
        };

        match err {
            None => {
                self.bus.emit(
                    PoolEvent::new(EventKind::ReportSent)
                        .with_task(task)
                        .with_state(result.state),
                );
                Ok(())
            }
            Some(e) => {
                error!(error = %e, "task outcome is only recorded locally");
                self.bus.emit(
                    PoolEvent::new(EventKind::ReportFailed)
                        .with_task(task)
                        .with_state(result.state)
                        .with_reason(e.to_string()),
                );
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::RemoteError;
    use async_trait::async_trait;
    use bnode_model::{ClaimRequest, PingRequest, Stage, Task, TerminalState};
    use std::sync::Mutex;

    struct ScriptedScheduler {
        replies: Mutex<Vec<Result<(), RemoteError>>>,
        seen: Mutex<Vec<StatusReport>>,
    }

    impl ScriptedScheduler {
        fn new(mut replies: Vec<Result<(), RemoteError>>) -> Arc<Self> {
            replies.reverse();
            Arc::new(Self {
                replies: Mutex::new(replies),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl SchedulerApi for ScriptedScheduler {
        async fn claim_task(&self, _: &ClaimRequest) -> Result<Option<Task>, RemoteError> {
            Ok(None)
        }
        async fn report_status(&self, _: &TaskId, report: &StatusReport) -> Result<(), RemoteError> {
            self.seen.lock().unwrap().push(report.clone());
            self.replies.lock().unwrap().pop().unwrap_or(Ok(()))
        }
        async fn ping(&self, _: &PingRequest) -> Result<(), RemoteError> {
            Ok(())
        }
    }

    fn status(code: u16) -> RemoteError {
        RemoteError::Status {
            status: code,
            body: String::new(),
        }
    }

    fn reporter(api: Arc<ScriptedScheduler>) -> Reporter {
        Reporter::new(api, RetryPolicy::fixed(3, 1), Bus::silent())
    }

    #[tokio::test]
    async fn retries_transient_errors() {
        let api = ScriptedScheduler::new(vec![Err(status(502)), Err(RemoteError::Timeout), Ok(())]);
        let result = BuildResult::failure(Stage::Compiling, "exit code 2");

        reporter(api.clone()).report(&TaskId::from("5"), &result).await.unwrap();

        let seen = api.seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0].state, TerminalState::Failure);
        assert_eq!(seen[0].stage_on_failure, Some(Stage::Compiling));
    }

    #[tokio::test]
    async fn conflict_counts_as_ack() {
        let api = ScriptedScheduler::new(vec![Err(status(409))]);
        let res = reporter(api.clone())
            .report(&TaskId::from("5"), &BuildResult::success())
            .await;
        assert!(res.is_ok());
        assert_eq!(api.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn exhaustion_is_surfaced() {
        let api = ScriptedScheduler::new(vec![Err(status(503)); 5]);
        let res = reporter(api.clone())
            .report(&TaskId::from("5"), &BuildResult::success())
            .await;
        assert!(matches!(res, Err(ReportError::Exhausted { attempts: 3, .. })));
        assert_eq!(api.seen.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let api = ScriptedScheduler::new(vec![Err(status(400))]);
        let res = reporter(api.clone())
            .report(&TaskId::from("5"), &BuildResult::success())
            .await;
        assert!(matches!(res, Err(ReportError::Rejected { .. })));
        assert_eq!(api.seen.lock().unwrap().len(), 1);
    }
}
