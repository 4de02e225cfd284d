//! Build subprocesses.
//!
//! Every process is the leader of its own process group. However `run`
//! returns, including when its future is dropped, the whole group is killed
//! and the child reaped, so nothing a build forked outlives its stage.

use std::{
    path::PathBuf,
    process::{ExitStatus, Stdio},
    time::Duration,
};

use nix::{
    errno::Errno,
    sys::signal::{Signal, killpg},
    unistd::Pid,
};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::Command,
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use bnode_core::{CompileOutcome, TaskLog};

use crate::{
    error::{ExecError, ExecResult},
    limits::{RlimitConfig, attach_rlimits},
};

/// How long output readers may lag behind the exited process.
const DRAIN_OUTPUT: Duration = Duration::from_secs(2);

/// One command line with its environment.
#[derive(Clone, Debug, Default)]
pub struct ProcConfig {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
    pub limits: RlimitConfig,
}

impl ProcConfig {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn limits(mut self, limits: RlimitConfig) -> Self {
        self.limits = limits;
        self
    }
}

/// Kills the process group when dropped while armed.
struct Group {
    pgid: Option<i32>,
}

impl Group {
    fn signal(&self, sig: Signal) {
        // ESRCH once the group is gone is fine.
        if let Some(pgid) = self.pgid
            && let Err(e) = killpg(Pid::from_raw(pgid), sig)
            && e != Errno::ESRCH
        {
            warn!(pgid, signal = ?sig, error = %e, "failed to signal process group");
        }
    }

    fn disarm(&mut self) {
        self.pgid = None;
    }
}

impl Drop for Group {
    fn drop(&mut self) {
        self.signal(Signal::SIGKILL);
    }
}

/// Runs `cfg` to completion, streaming stdout and stderr into `log`.
///
/// When `cancel` fires the group gets SIGTERM, then SIGKILL after
/// `kill_grace`; the call returns [`ExecError::Cancelled`] once the child is
/// reaped.
pub async fn run(
    cfg: &ProcConfig,
    cancel: &CancellationToken,
    kill_grace: Duration,
    log: &TaskLog,
) -> ExecResult<CompileOutcome> {
    if cfg.program.trim().is_empty() {
        return Err(ExecError::MissingProgram);
    }
    if cancel.is_cancelled() {
        return Err(ExecError::Cancelled);
    }

    let mut cmd = Command::new(&cfg.program);
    cmd.args(&cfg.args)
        .envs(cfg.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(cwd) = &cfg.cwd {
        cmd.current_dir(cwd);
    }
    #[cfg(unix)]
    cmd.process_group(0);
    attach_rlimits(&mut cmd, &cfg.limits);

    trace!(program = %cfg.program, args = ?cfg.args, cwd = ?cfg.cwd, "spawn");
    log.line(format!("$ {} {}", cfg.program, cfg.args.join(" "))).await;

    let mut child = cmd.spawn().map_err(|e| ExecError::Spawn {
        program: cfg.program.clone(),
        reason: e.to_string(),
    })?;
    let mut group = Group {
        pgid: child.id().map(|id| id as i32),
    };

    let readers = [
        child.stdout.take().map(|r| pump(r, log.clone())),
        child.stderr.take().map(|r| pump(r, log.clone())),
    ];

    let (status, cancelled) = tokio::select! {
        status = child.wait() => (status?, false),
        _ = cancel.cancelled() => {
            debug!(program = %cfg.program, pgid = ?group.pgid, "cancelled; terminating process group");
            group.signal(Signal::SIGTERM);
            let status = match tokio::time::timeout(kill_grace, child.wait()).await {
                Ok(status) => status?,
                Err(_) => {
                    warn!(program = %cfg.program, grace = ?kill_grace, "process group ignored SIGTERM; killing");
                    group.signal(Signal::SIGKILL);
                    child.wait().await?
                }
            };
            (status, true)
        }
    };

    // daemons forked by the build share the group
    group.signal(Signal::SIGKILL);
    group.disarm();

    for reader in readers.into_iter().flatten() {
        let _ = tokio::time::timeout(DRAIN_OUTPUT, reader).await;
    }

    let outcome = outcome(status);
    debug!(program = %cfg.program, ?outcome, cancelled, "process finished");
    if cancelled {
        log.line(format!("{} stopped by cancellation", cfg.program)).await;
        return Err(ExecError::Cancelled);
    }
    Ok(outcome)
}

/// Like [`run`], but anything other than exit code 0 is an error.
pub async fn run_checked(
    cfg: &ProcConfig,
    cancel: &CancellationToken,
    kill_grace: Duration,
    log: &TaskLog,
) -> ExecResult<()> {
    match run(cfg, cancel, kill_grace, log).await? {
        CompileOutcome::Exited(0) => Ok(()),
        CompileOutcome::Exited(code) => Err(ExecError::NonZeroExit {
            program: cfg.program.clone(),
            code,
        }),
        CompileOutcome::Signaled(signal) => Err(ExecError::KilledBySignal {
            program: cfg.program.clone(),
            signal,
        }),
    }
}

fn outcome(status: ExitStatus) -> CompileOutcome {
    if let Some(code) = status.code() {
        return CompileOutcome::Exited(code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(sig) = status.signal() {
            return CompileOutcome::Signaled(sig);
        }
    }
    CompileOutcome::Exited(-1)
}

/// Copies lines from `reader` into the task log. Invalid UTF-8 is replaced.
fn pump<R>(reader: R, log: TaskLog) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    log.line(line.trim_end_matches(['\n', '\r'])).await;
                }
            }
        }
    })
}
