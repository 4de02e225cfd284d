use std::{path::{Path, PathBuf}, time::Duration};

use reqwest::{Client, Url};
use tokio::{fs::File, io::AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::error::{ExecError, ExecResult};

/// Source package downloader.
#[derive(Clone)]
pub struct Fetcher {
    client: Client,
}

impl Fetcher {
    pub fn new(timeout: Duration) -> ExecResult<Self> {
        let client = Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| ExecError::Io(format!("http client: {e}")))?;
        Ok(Self { client })
    }

    /// Downloads `url` into `dir`, named after the last path segment.
    #[instrument(level = "debug", skip(self, dir, cancel))]
    pub async fn download(&self, url: &str, dir: &Path, cancel: &CancellationToken) -> ExecResult<PathBuf> {
        let fail = |reason: String| ExecError::Fetch {
            url: url.to_string(),
            reason,
        };

        let parsed = Url::parse(url).map_err(|e| fail(e.to_string()))?;
        let name = file_name(&parsed).ok_or_else(|| fail("url has no file name".into()))?;
        let dest = dir.join(name);

        tokio::select! {
            res = self.fetch_into(&parsed, &dest) => res.map_err(fail)?,
            _ = cancel.cancelled() => return Err(ExecError::Cancelled),
        }
        Ok(dest)
    }

    async fn fetch_into(&self, url: &Url, dest: &Path) -> Result<(), String> {
        let mut resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| e.to_string())?;

        let mut file = File::create(dest).await.map_err(|e| e.to_string())?;
        let mut size = 0u64;
        while let Some(chunk) = resp.chunk().await.map_err(|e| e.to_string())? {
            size += chunk.len() as u64;
            file.write_all(&chunk).await.map_err(|e| e.to_string())?;
        }
        file.flush().await.map_err(|e| e.to_string())?;
        debug!(dest = %dest.display(), size, "source downloaded");
        Ok(())
    }
}

fn file_name(url: &Url) -> Option<String> {
    let last = url.path_segments()?.next_back()?;
    if last.is_empty() || last == "." || last == ".." {
        return None;
    }
    Some(last.to_string())
}
