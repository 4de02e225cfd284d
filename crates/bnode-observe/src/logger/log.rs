use std::error::Error as _;

use time::{UtcOffset, format_description::well_known::Rfc3339};
use tracing::subscriber::SetGlobalDefaultError;
use tracing_subscriber::{
    EnvFilter, Registry, fmt, fmt::time::OffsetTime, layer::Layered, layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
};

use crate::logger::{config::LoggerConfig, error::LoggerError, format::LoggerFormat};

/// Environment variable whose directives replace the configured level.
pub const LOG_ENV: &str = "BNODE_LOG";

type Base = Layered<EnvFilter, Registry>;

pub(crate) fn init(cfg: &LoggerConfig) -> Result<(), LoggerError> {
    let directive = directive(cfg, std::env::var(LOG_ENV).ok());
    let filter = EnvFilter::try_new(&directive).map_err(|_| LoggerError::InvalidLogLevel(directive.clone()))?;
    let base = tracing_subscriber::registry().with(filter);

    match cfg.format {
        LoggerFormat::Text => base
            .with(
                fmt::layer()
                    .with_ansi(cfg.use_color)
                    .with_target(cfg.with_targets)
                    .with_thread_names(true)
                    .with_timer(local_timer()),
            )
            .try_init()
            .map_err(init_error),
        LoggerFormat::Json => base
            .with(
                fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_current_span(false)
                    .with_target(cfg.with_targets)
                    .with_timer(local_timer()),
            )
            .try_init()
            .map_err(init_error),
        LoggerFormat::Journald => journald(base),
    }
}

/// A non-blank `BNODE_LOG` wins over the configured level.
fn directive(cfg: &LoggerConfig, env: Option<String>) -> String {
    env.filter(|d| !d.trim().is_empty())
        .unwrap_or_else(|| cfg.level.as_str().to_string())
}

fn local_timer() -> OffsetTime<Rfc3339> {
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    OffsetTime::new(offset, Rfc3339)
}

fn init_error(e: TryInitError) -> LoggerError {
    if e.source().is_some_and(|s| s.is::<SetGlobalDefaultError>()) {
        LoggerError::AlreadyInitialized
    } else {
        LoggerError::Init(e.to_string())
    }
}

#[cfg(all(target_os = "linux", feature = "journald"))]
fn journald(base: Base) -> Result<(), LoggerError> {
    let layer = tracing_journald::layer().map_err(|e| LoggerError::Init(format!("journald: {e}")))?;
    base.with(layer).try_init().map_err(init_error)
}

#[cfg(not(all(target_os = "linux", feature = "journald")))]
fn journald(_base: Base) -> Result<(), LoggerError> {
    Err(LoggerError::JournaldNotSupported)
}
