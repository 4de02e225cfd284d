use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("invalid platform: {0} (expected: distro/arch)")]
    InvalidPlatform(String),
}
