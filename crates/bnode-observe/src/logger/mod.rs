mod config;
mod error;
mod format;
mod level;
mod log;

pub use config::LoggerConfig;
pub use error::LoggerError;
pub use format::LoggerFormat;
pub use level::LoggerLevel;
pub use log::LOG_ENV;

/// Installs the global `tracing` subscriber described by `cfg`.
///
/// Fails with [`LoggerError::AlreadyInitialized`] when one is already set.
pub fn logger_init(cfg: &LoggerConfig) -> Result<(), LoggerError> {
    log::init(cfg)
}
