use std::sync::Arc;

use futures::{StreamExt, stream};
use tracing::{debug, instrument};

use bnode_model::{ArtifactDescriptor, EventKind, PoolEvent, RetryPolicy, TaskId, UploadState};

use crate::{
    events::Bus,
    remote::ArtifactStore,
    retry::{RetryError, with_retry},
};

/// Ships artifacts to the store, each one independently.
#[derive(Clone)]
pub struct Uploader {
    store: Arc<dyn ArtifactStore>,
    retry: RetryPolicy,
    concurrency: usize,
    bus: Bus,
}

impl Uploader {
    pub fn new(store: Arc<dyn ArtifactStore>, retry: RetryPolicy, concurrency: usize, bus: Bus) -> Self {
        Self {
            store,
            retry,
            concurrency: concurrency.max(1),
            bus,
        }
    }

    /// Uploads every pending descriptor with bounded parallelism.
    ///
    /// A descriptor whose retries are spent ends up `Failed`; it never holds
    /// back the others. The returned list keeps the input order.
    #[instrument(level = "debug", skip_all, fields(task = %task, count = descriptors.len()))]
    pub async fn upload(&self, task: &TaskId, descriptors: Vec<ArtifactDescriptor>) -> Vec<ArtifactDescriptor> {
        let mut done: Vec<(usize, ArtifactDescriptor)> = stream::iter(descriptors.into_iter().enumerate())
            .map(|(i, d)| async move { (i, self.upload_one(task, d).await) })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        done.sort_by_key(|(i, _)| *i);
        done.into_iter().map(|(_, d)| d).collect()
    }

    async fn upload_one(&self, task: &TaskId, mut d: ArtifactDescriptor) -> ArtifactDescriptor {
        if d.upload != UploadState::Pending {
            return d;
        }

        let res = with_retry(
            &self.retry,
            None,
            |attempt, delay, err| {
                self.bus.emit(
                    PoolEvent::new(EventKind::RetryScheduled)
                        .with_task(task)
                        .with_attempt(attempt)
                        .with_delay_ms(delay.as_millis() as u64)
                        .with_reason(format!("upload {}: {err}", d.name)),
                )
            },
            |_| self.store.put(task, &d),
        )
        .await;

        match res {
            Ok(url) => {
                debug!(artifact = %d.name, %url, "artifact uploaded");
                self.bus.emit(
                    PoolEvent::new(EventKind::ArtifactUploaded)
                        .with_task(task)
                        .with_reason(d.name.clone()),
                );
                d.mark_uploaded(url);
            }
            Err(e) => {
                let reason = describe(&e);
                self.bus.emit(
                    PoolEvent::new(EventKind::ArtifactFailed)
                        .with_task(task)
                        .with_attempt(e.attempts())
                        .with_reason(format!("{}: {reason}", d.name)),
                );
                d.mark_failed(reason);
            }
        }
        d
    }
}

fn describe(e: &RetryError) -> String {
    match e {
        RetryError::Permanent { error, .. } => error.to_string(),
        RetryError::Exhausted { attempts, error } => format!("{error} (after {attempts} attempts)"),
        RetryError::Cancelled { error, .. } => format!("{error} (cancelled)"),
    }
}
