use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use tokio::{fs::File, io::AsyncWriteExt, sync::Mutex};
use tracing::debug;

use bnode_model::TaskId;

/// Per-task build log, shared by the executor and the toolchain.
///
/// Write errors are swallowed: a broken log never fails a build.
#[derive(Clone)]
pub struct TaskLog {
    path: Option<PathBuf>,
    file: Option<Arc<Mutex<File>>>,
}

impl TaskLog {
    /// Creates `task.<id>.<unix-ts>.log` in `dir`.
    pub async fn create(dir: &Path, task: &TaskId) -> std::io::Result<Self> {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let path = dir.join(format!("task.{}.{ts}.log", sanitize(task.as_str())));
        let file = File::create(&path).await?;
        Ok(Self {
            path: Some(path),
            file: Some(Arc::new(Mutex::new(file))),
        })
    }

    /// Log that discards everything.
    pub fn disabled() -> Self {
        Self {
            path: None,
            file: None,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Appends one line.
    pub async fn line(&self, line: impl AsRef<str>) {
        let Some(file) = &self.file else {
            return;
        };
        let mut f = file.lock().await;
        let line = line.as_ref();
        let res = async {
            f.write_all(line.as_bytes()).await?;
            if !line.ends_with('\n') {
                f.write_all(b"\n").await?;
            }
            Ok::<_, std::io::Error>(())
        }
        .await;
        if let Err(e) = res {
            debug!(error = %e, "task log write failed");
        }
    }

    /// Flushes buffered output to disk.
    pub async fn flush(&self) {
        if let Some(file) = &self.file {
            let mut f = file.lock().await;
            let _ = f.flush().await;
            let _ = f.sync_data().await;
        }
    }
}

fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
