use thiserror::Error;

use bnode_core::StageError;

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("missing program")]
    MissingProgram,
    #[error("spawn {program}: {reason}")]
    Spawn { program: String, reason: String },
    #[error("{program} exited with code {code}")]
    NonZeroExit { program: String, code: i32 },
    #[error("{program} killed by signal {signal}")]
    KilledBySignal { program: String, signal: i32 },
    #[error("fetch {url}: {reason}")]
    Fetch { url: String, reason: String },
    #[error("io error: {0}")]
    Io(String),
    #[error("cancelled")]
    Cancelled,
}

pub type ExecResult<T> = Result<T, ExecError>;

impl From<std::io::Error> for ExecError {
    fn from(e: std::io::Error) -> Self {
        ExecError::Io(e.to_string())
    }
}

impl From<ExecError> for StageError {
    fn from(e: ExecError) -> Self {
        match e {
            ExecError::Cancelled => StageError::Cancelled,
            ExecError::Io(reason) => StageError::Io(reason),
            e @ (ExecError::Fetch { .. } | ExecError::NonZeroExit { .. } | ExecError::KilledBySignal { .. }) => {
                StageError::Source(e.to_string())
            }
            e => StageError::Failed(e.to_string()),
        }
    }
}
