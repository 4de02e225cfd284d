use std::path::PathBuf;

use thiserror::Error;

use crate::remote::RemoteError;

/// Errors that abort pool startup.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("work directory {path} is unusable: {reason}")]
    WorkDir { path: PathBuf, reason: String },
    #[error("no toolchain registered")]
    NoToolchains,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("max_concurrent_builds must be greater than zero")]
    ZeroConcurrency,
    #[error("upload_concurrency must be greater than zero")]
    ZeroUploadConcurrency,
    #[error("{0} endpoint is empty")]
    EmptyEndpoint(&'static str),
    #[error("work_dir is empty")]
    EmptyWorkDir,
    #[error("environments.max_environments ({envs}) is lower than max_concurrent_builds ({builds})")]
    TooFewEnvironments { envs: usize, builds: usize },
}

/// Build environment provisioning failures.
///
/// Every variant is terminal for the task that hit it.
#[derive(Error, Debug)]
pub enum EnvError {
    #[error("environment limit reached ({0} in use)")]
    Exhausted(usize),
    #[error("base image {0} not found")]
    MissingBaseImage(PathBuf),
    #[error("environment io error at {path}: {reason}")]
    Io { path: PathBuf, reason: String },
}

impl EnvError {
    pub(crate) fn io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        EnvError::Io {
            path: path.into(),
            reason: err.to_string(),
        }
    }
}

/// Failure of a single build stage as reported by a toolchain.
#[derive(Error, Debug)]
pub enum StageError {
    #[error("{0}")]
    Failed(String),
    #[error("source unavailable: {0}")]
    Source(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("cancelled")]
    Cancelled,
    #[error("panic: {0}")]
    Panicked(String),
}

impl From<std::io::Error> for StageError {
    fn from(e: std::io::Error) -> Self {
        StageError::Io(e.to_string())
    }
}

#[derive(Error, Debug)]
pub enum ClaimError {
    #[error("claim failed after {attempts} attempt(s): {source}")]
    Remote {
        attempts: u32,
        #[source]
        source: RemoteError,
    },
    #[error("claim cancelled")]
    Cancelled,
}

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("status report for task {task} failed after {attempts} attempt(s): {source}")]
    Exhausted {
        task: String,
        attempts: u32,
        #[source]
        source: RemoteError,
    },
    #[error("status report for task {task} rejected: {source}")]
    Rejected {
        task: String,
        #[source]
        source: RemoteError,
    },
}
