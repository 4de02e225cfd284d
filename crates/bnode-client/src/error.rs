use thiserror::Error;

/// Client construction failure.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("invalid {name} url {url:?}: {reason}")]
    InvalidUrl {
        name: &'static str,
        url: String,
        reason: String,
    },

    #[error("http client setup failed: {0}")]
    Build(#[from] reqwest::Error),
}
