use tokio::{
    signal::unix::{SignalKind, signal},
    task::JoinHandle,
};
use tracing::{info, warn};

use bnode_core::PoolHandle;

/// First SIGTERM/SIGINT drains the pool; a second one cancels running builds.
pub fn forward(handle: PoolHandle) -> std::io::Result<JoinHandle<()>> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    Ok(tokio::spawn(async move {
        loop {
            let name = tokio::select! {
                Some(()) = sigterm.recv() => "SIGTERM",
                Some(()) = sigint.recv() => "SIGINT",
                else => return,
            };
            if handle.is_stopping() {
                warn!(signal = name, "second signal, cancelling running builds");
                handle.shutdown_now();
                return;
            }
            info!(signal = name, "shutting down, waiting for running builds");
            handle.shutdown();
        }
    }))
}
