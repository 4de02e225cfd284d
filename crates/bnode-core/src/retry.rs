use std::{future::Future, time::Duration};

use rand::Rng;
use tokio_util::sync::CancellationToken;

use bnode_model::RetryPolicy;

use crate::remote::RemoteError;

/// Outcome of a call that ran out of luck.
#[derive(Debug)]
pub enum RetryError {
    /// Non-transient error; no further attempts were made.
    Permanent { attempt: u32, error: RemoteError },
    /// All attempts failed with transient errors.
    Exhausted { attempts: u32, error: RemoteError },
    /// The token fired while waiting between attempts.
    Cancelled { attempt: u32, error: RemoteError },
}

impl RetryError {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Permanent { attempt, .. } | RetryError::Cancelled { attempt, .. } => *attempt,
            RetryError::Exhausted { attempts, .. } => *attempts,
        }
    }

    pub fn error(&self) -> &RemoteError {
        match self {
            RetryError::Permanent { error, .. }
            | RetryError::Exhausted { error, .. }
            | RetryError::Cancelled { error, .. } => error,
        }
    }

    pub fn into_error(self) -> RemoteError {
        match self {
            RetryError::Permanent { error, .. }
            | RetryError::Exhausted { error, .. }
            | RetryError::Cancelled { error, .. } => error,
        }
    }
}

/// Runs `op` until it succeeds, fails permanently or `policy` is spent.
///
/// `op` receives the 1-based attempt number. `on_retry(attempt, delay, error)`
/// is called before each backoff sleep. When `cancel` is given and fires
/// during a sleep the last error is returned right away.
pub async fn with_retry<T, F, Fut, R>(
    policy: &RetryPolicy,
    cancel: Option<&CancellationToken>,
    mut on_retry: R,
    mut op: F,
) -> Result<T, RetryError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, RemoteError>>,
    R: FnMut(u32, Duration, &RemoteError),
{
    let attempts = policy.attempts();
    let mut attempt = 1;
    loop {
        let error = match op(attempt).await {
            Ok(v) => return Ok(v),
            Err(e) => e,
        };

        if !error.is_transient() {
            return Err(RetryError::Permanent { attempt, error });
        }
        if attempt >= attempts {
            return Err(RetryError::Exhausted { attempts, error });
        }

        let unit: f64 = rand::rng().random();
        let delay = Duration::from_millis(policy.backoff.delay_ms(attempt, unit));
        on_retry(attempt, delay, &error);

        match cancel {
            Some(token) => {
                tokio::select! {
                    _ = token.cancelled() => return Err(RetryError::Cancelled { attempt, error }),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            None => tokio::time::sleep(delay).await,
        }
        attempt += 1;
    }
}
