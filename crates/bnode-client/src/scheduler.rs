use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::{instrument, trace};

use bnode_core::{EndpointConfig, RemoteError, SchedulerApi};
use bnode_model::{ClaimRequest, PingRequest, StatusReport, Task, TaskId};

use crate::{
    error::ClientError,
    http::{Endpoint, check, transport},
};

/// Scheduler API over HTTP.
///
/// - `GET  {base}/task?node=&arches=`
/// - `POST {base}/task/{id}/status`
/// - `POST {base}/ping`
#[derive(Clone, Debug)]
pub struct HttpScheduler {
    endpoint: Endpoint,
}

impl HttpScheduler {
    pub fn new(cfg: &EndpointConfig) -> Result<Self, ClientError> {
        Ok(Self {
            endpoint: Endpoint::new("scheduler", cfg)?,
        })
    }
}

#[async_trait]
impl SchedulerApi for HttpScheduler {
    #[instrument(level = "trace", skip_all, fields(node = %req.node_id))]
    async fn claim_task(&self, req: &ClaimRequest) -> Result<Option<Task>, RemoteError> {
        let mut url = self.endpoint.url(&["task"]);
        url.query_pairs_mut()
            .append_pair("node", &req.node_id)
            .append_pair("arches", &req.supported_arches.join(","));

        let resp = self.endpoint.get(url).send().await.map_err(transport)?;
        if resp.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let body = check(resp).await?.bytes().await.map_err(transport)?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }

        let task: Option<Task> = serde_json::from_slice(&body).map_err(|e| RemoteError::Decode(e.to_string()))?;
        trace!(task = ?task.as_ref().map(|t| &t.id), "claim answered");
        Ok(task)
    }

    #[instrument(level = "trace", skip_all, fields(task = %task, state = report.state.as_str()))]
    async fn report_status(&self, task: &TaskId, report: &StatusReport) -> Result<(), RemoteError> {
        let url = self.endpoint.url(&["task", task.as_str(), "status"]);
        let resp = self.endpoint.post(url).json(report).send().await.map_err(transport)?;
        check(resp).await.map(drop)
    }

    async fn ping(&self, req: &PingRequest) -> Result<(), RemoteError> {
        let url = self.endpoint.url(&["ping"]);
        let resp = self.endpoint.post(url).json(req).send().await.map_err(transport)?;
        check(resp).await.map(drop)
    }
}
