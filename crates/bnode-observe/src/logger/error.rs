use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoggerError {
    #[error("unknown log format {0:?}, expected text, json or journald")]
    InvalidFormat(String),
    #[error("journald logging needs linux and the `journald` feature")]
    JournaldNotSupported,
    #[error("a global logger is already installed")]
    AlreadyInitialized,
    #[error("logger init: {0}")]
    Init(String),
    #[error("invalid log filter {0:?}")]
    InvalidLogLevel(String),
}
