use reqwest::{Client, RequestBuilder, Response, Url};

use bnode_core::{EndpointConfig, RemoteError};

use crate::error::ClientError;

/// Error bodies are cut to this many bytes before they end up in reports.
const MAX_ERROR_BODY: usize = 512;

/// Base url, bearer token and a pooled client for one remote service.
#[derive(Clone, Debug)]
pub struct Endpoint {
    base: Url,
    token: Option<String>,
    http: Client,
}

impl Endpoint {
    pub fn new(name: &'static str, cfg: &EndpointConfig) -> Result<Self, ClientError> {
        let invalid = |reason: String| ClientError::InvalidUrl {
            name,
            url: cfg.base_url.clone(),
            reason,
        };
        let base = Url::parse(cfg.base_url.trim()).map_err(|e| invalid(e.to_string()))?;
        if base.cannot_be_a_base() {
            return Err(invalid("not a base url".into()));
        }

        let http = Client::builder()
            .timeout(cfg.timeout())
            .user_agent(concat!("bnode/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            base,
            token: cfg.token.clone().filter(|t| !t.is_empty()),
            http,
        })
    }

    /// `base` with `segments` appended, each percent-encoded.
    pub fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    pub(crate) fn get(&self, url: Url) -> RequestBuilder {
        self.auth(self.http.get(url))
    }

    pub(crate) fn post(&self, url: Url) -> RequestBuilder {
        self.auth(self.http.post(url))
    }

    pub(crate) fn put(&self, url: Url) -> RequestBuilder {
        self.auth(self.http.put(url))
    }

    fn auth(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

pub(crate) fn transport(e: reqwest::Error) -> RemoteError {
    if e.is_timeout() {
        RemoteError::Timeout
    } else if e.is_decode() {
        RemoteError::Decode(e.to_string())
    } else {
        RemoteError::Transport(e.to_string())
    }
}

/// Passes 2xx through; anything else becomes [`RemoteError::Status`].
pub(crate) async fn check(resp: Response) -> Result<Response, RemoteError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let mut body = resp.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    Err(RemoteError::Status {
        status: status.as_u16(),
        body,
    })
}
