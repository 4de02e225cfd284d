#![allow(dead_code)]

use std::{
    collections::{HashMap, VecDeque},
    path::Path,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use async_trait::async_trait;

use bnode_core::{ArtifactStore, EndpointConfig, NodeConfig, RemoteError, SchedulerApi, StageTimeouts};
use bnode_model::{ArtifactDescriptor, ClaimRequest, PingRequest, RetryPolicy, StatusReport, Task, TaskId};

#[derive(Default)]
pub struct Scheduler {
    queue: Mutex<VecDeque<Task>>,
    pub reports: Mutex<Vec<(TaskId, StatusReport)>>,
}

impl Scheduler {
    pub fn with(tasks: impl IntoIterator<Item = Task>) -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(tasks.into_iter().collect()),
            ..Default::default()
        })
    }

    pub fn report(&self, id: &str) -> Option<StatusReport> {
        self.reports
            .lock()
            .unwrap()
            .iter()
            .find(|(t, _)| t.as_str() == id)
            .map(|(_, r)| r.clone())
    }
}

#[async_trait]
impl SchedulerApi for Scheduler {
    async fn claim_task(&self, _: &ClaimRequest) -> Result<Option<Task>, RemoteError> {
        Ok(self.queue.lock().unwrap().pop_front())
    }

    async fn report_status(&self, task: &TaskId, report: &StatusReport) -> Result<(), RemoteError> {
        self.reports.lock().unwrap().push((task.clone(), report.clone()));
        Ok(())
    }

    async fn ping(&self, _: &PingRequest) -> Result<(), RemoteError> {
        Ok(())
    }
}

/// Keeps uploaded file contents by artifact name.
#[derive(Default)]
pub struct Store {
    pub files: Mutex<HashMap<String, Vec<u8>>>,
}

#[async_trait]
impl ArtifactStore for Store {
    async fn put(&self, task: &TaskId, a: &ArtifactDescriptor) -> Result<String, RemoteError> {
        let body = tokio::fs::read(&a.path)
            .await
            .map_err(|e| RemoteError::Io(e.to_string()))?;
        self.files.lock().unwrap().insert(a.name.clone(), body);
        Ok(format!("https://store.test/{task}/{}", a.name))
    }
}

pub fn config(work_dir: &Path) -> NodeConfig {
    NodeConfig {
        node_id: Some("exec-test".into()),
        work_dir: work_dir.to_path_buf(),
        max_concurrent_builds: 2,
        poll_interval_ms: 10,
        poll_jitter_ms: 0,
        timeouts: StageTimeouts {
            kill_grace_ms: 200,
            ..Default::default()
        },
        upload_retry: RetryPolicy::fixed(2, 1),
        report_retry: RetryPolicy::fixed(2, 1),
        scheduler: EndpointConfig {
            base_url: "http://scheduler.test".into(),
            ..Default::default()
        },
        artifact_store: EndpointConfig {
            base_url: "http://store.test".into(),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub async fn eventually(within: Duration, cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + within;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
