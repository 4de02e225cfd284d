//! POSIX rlimits for build subprocesses.
//!
//! Limits are installed in a `pre_exec` hook, so they are in force from the
//! first instruction of the builder. On non-Unix targets a non-empty config
//! is logged and ignored.
use tokio::process::Command;

use bnode_core::ProcessLimits;

/// Rlimits applied to every process a toolchain spawns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RlimitConfig {
    /// `RLIMIT_NOFILE`.
    pub max_open_files: Option<u64>,
    /// `RLIMIT_FSIZE`. Growing a file past it delivers `SIGXFSZ`.
    pub max_file_size_bytes: Option<u64>,
    /// `RLIMIT_CORE = 0`; failing builds leave no core files in the environment.
    pub disable_core_dumps: bool,
}

impl RlimitConfig {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.max_open_files.is_none() && !self.disable_core_dumps && self.max_file_size_bytes.is_none()
    }
}

impl From<&ProcessLimits> for RlimitConfig {
    fn from(l: &ProcessLimits) -> Self {
        Self {
            max_open_files: l.max_open_files,
            max_file_size_bytes: l.max_file_size_bytes,
            disable_core_dumps: l.disable_core_dumps,
        }
    }
}

/// Installs `config` on `cmd`.
pub fn attach_rlimits(cmd: &mut Command, config: &RlimitConfig) {
    if config.is_empty() {
        return;
    }

    #[cfg(unix)]
    {
        unix_impl::attach_rlimits(cmd, config);
    }

    #[cfg(not(unix))]
    {
        let _ = cmd;
        tracing::warn!(?config, "process limits are not supported on this platform; ignoring");
    }
}

#[cfg(unix)]
mod unix_impl {
    use std::io;

    use tokio::process::Command;

    use super::RlimitConfig;

    pub fn attach_rlimits(cmd: &mut Command, config: &RlimitConfig) {
        let nofile = config.max_open_files;
        let fsize = config.max_file_size_bytes;
        let no_core = config.disable_core_dumps;

        // SAFETY: the hook only calls async-signal-safe setrlimit(2).
        unsafe {
            cmd.pre_exec(move || {
                if let Some(n) = nofile {
                    set(libc::RLIMIT_NOFILE, n)?;
                }
                if let Some(n) = fsize {
                    set(libc::RLIMIT_FSIZE, n)?;
                }
                if no_core {
                    set(libc::RLIMIT_CORE, 0)?;
                }
                Ok(())
            });
        }
    }

    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    type Resource = libc::__rlimit_resource_t;
    #[cfg(not(all(target_os = "linux", target_env = "gnu")))]
    type Resource = libc::c_int;

    fn set(resource: Resource, value: u64) -> io::Result<()> {
        let rlim = libc::rlimit {
            rlim_cur: value as libc::rlim_t,
            rlim_max: value as libc::rlim_t,
        };
        if unsafe { libc::setrlimit(resource, &rlim) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}
