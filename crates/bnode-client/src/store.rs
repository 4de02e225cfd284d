use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, LOCATION};
use serde::Deserialize;
use tracing::{debug, instrument};

use bnode_core::{ArtifactStore, EndpointConfig, RemoteError};
use bnode_model::{ArtifactDescriptor, TaskId};

use crate::{
    error::ClientError,
    http::{Endpoint, check, transport},
};

/// Header carrying the hex sha256 of the uploaded body.
pub const CHECKSUM_HEADER: &str = "X-Checksum-Sha256";

#[derive(Deserialize)]
struct Stored {
    url: String,
}

/// Artifact store addressed as `PUT {base}/{task}/{name}`.
///
/// The stable reference is the `url` of a JSON answer, else the `Location`
/// header, else the request url itself.
#[derive(Clone, Debug)]
pub struct HttpArtifactStore {
    endpoint: Endpoint,
}

impl HttpArtifactStore {
    pub fn new(cfg: &EndpointConfig) -> Result<Self, ClientError> {
        Ok(Self {
            endpoint: Endpoint::new("artifact_store", cfg)?,
        })
    }
}

#[async_trait]
impl ArtifactStore for HttpArtifactStore {
    #[instrument(level = "trace", skip_all, fields(task = %task, artifact = %artifact.name, size = artifact.size))]
    async fn put(&self, task: &TaskId, artifact: &ArtifactDescriptor) -> Result<String, RemoteError> {
        let body = tokio::fs::read(&artifact.path)
            .await
            .map_err(|e| RemoteError::Io(format!("{}: {e}", artifact.path.display())))?;

        let url = self.endpoint.url(&[task.as_str(), &artifact.name]);
        let resp = self
            .endpoint
            .put(url.clone())
            .header(CHECKSUM_HEADER, &artifact.sha256)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(body)
            .send()
            .await
            .map_err(transport)?;
        let resp = check(resp).await?;

        let location = resp
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let answer = resp.bytes().await.map_err(transport)?;

        let stored = match serde_json::from_slice::<Stored>(&answer) {
            Ok(Stored { url }) => url,
            Err(_) => location.unwrap_or_else(|| url.to_string()),
        };
        debug!(url = %stored, "artifact stored");
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;

    fn store(server: &Server) -> HttpArtifactStore {
        HttpArtifactStore::new(&EndpointConfig {
            base_url: format!("{}/artifacts", server.url()),
            token: Some("upload-token".into()),
            ..Default::default()
        })
        .unwrap()
    }

    fn artifact(dir: &std::path::Path, name: &str, body: &str) -> ArtifactDescriptor {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        ArtifactDescriptor::new(&path, name, body.len() as u64, "ab12".into())
    }

    #[tokio::test]
    async fn put_sends_body_and_checksum() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("PUT", "/artifacts/17/bash-5.1-1.el8.x86_64.rpm")
            .match_header("x-checksum-sha256", "ab12")
            .match_header("authorization", "Bearer upload-token")
            .match_body("payload")
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(r#"{"url": "https://cdn.example.org/17/bash-5.1-1.el8.x86_64.rpm"}"#)
            .create_async()
            .await;
        let dir = tempfile::tempdir().unwrap();

        let url = store(&server)
            .put(
                &TaskId::from("17"),
                &artifact(dir.path(), "bash-5.1-1.el8.x86_64.rpm", "payload"),
            )
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(url, "https://cdn.example.org/17/bash-5.1-1.el8.x86_64.rpm");
    }

    #[tokio::test]
    async fn falls_back_to_location_then_request_url() {
        let mut server = Server::new_async().await;
        server
            .mock("PUT", "/artifacts/17/root.log")
            .with_status(201)
            .with_header("location", "https://cdn.example.org/logs/root.log")
            .create_async()
            .await;
        server
            .mock("PUT", "/artifacts/17/build.log")
            .with_status(200)
            .create_async()
            .await;
        let dir = tempfile::tempdir().unwrap();
        let store = store(&server);

        let url = store
            .put(&TaskId::from("17"), &artifact(dir.path(), "root.log", "x"))
            .await
            .unwrap();
        assert_eq!(url, "https://cdn.example.org/logs/root.log");

        let url = store
            .put(&TaskId::from("17"), &artifact(dir.path(), "build.log", "x"))
            .await
            .unwrap();
        assert_eq!(url, format!("{}/artifacts/17/build.log", server.url()));
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let server = Server::new_async().await;
        let a = ArtifactDescriptor::new("/nonexistent/a.rpm", "a.rpm", 0, String::new());
        let err = store(&server).put(&TaskId::from("1"), &a).await.unwrap_err();
        assert!(matches!(err, RemoteError::Io(_)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn client_errors_are_permanent() {
        let mut server = Server::new_async().await;
        server
            .mock("PUT", "/artifacts/1/a.rpm")
            .with_status(413)
            .create_async()
            .await;
        let dir = tempfile::tempdir().unwrap();

        let err = store(&server)
            .put(&TaskId::from("1"), &artifact(dir.path(), "a.rpm", "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Status { status: 413, .. }));
        assert!(!err.is_transient());
    }
}
