//! Network transport for `fetch`.
//!
//! [`Transport`] is a single `GET`. The response body is always read to the
//! end before `get` returns, so callers never see a half-consumed stream.

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Url;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

use crate::config::TransportConfig;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// URL could not be parsed or resolved against the base.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// Request failed before a complete response arrived.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Server answered with something other than 200.
    #[error("unexpected status {status} for {url}")]
    Status { url: String, status: u16 },
}

/// A fully received response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Retrieves the bytes addressed by a URL.
#[async_trait]
pub trait Transport: Send + Sync {
    /// `GET url`, returning status and complete body.
    async fn get(&self, url: &str) -> Result<TransportResponse, TransportError>;
}

/// HTTP(S) transport backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base: Option<Url>,
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self {
            client: reqwest::Client::new(),
            base: None,
        }
    }
}

impl HttpTransport {
    /// Create a transport with default client settings and no base URL.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the `[transport]` config section.
    pub fn from_config(config: &TransportConfig) -> Result<Self, TransportError> {
        let mut builder = reqwest::Client::builder();
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        if let Some(agent) = &config.user_agent {
            builder = builder.user_agent(agent.clone());
        }
        let client = builder.build()?;

        let base = config
            .base_url
            .as_deref()
            .map(|b| Url::parse(b).map_err(|e| TransportError::InvalidUrl(format!("{b}: {e}"))))
            .transpose()?;

        Ok(Self { client, base })
    }

    /// Resolve `url`, joining relative references onto the base URL.
    pub fn resolve(&self, url: &str) -> Result<Url, TransportError> {
        match (Url::parse(url), &self.base) {
            (Ok(absolute), _) => Ok(absolute),
            (Err(_), Some(base)) => base
                .join(url)
                .map_err(|e| TransportError::InvalidUrl(format!("{url}: {e}"))),
            (Err(e), None) => Err(TransportError::InvalidUrl(format!("{url}: {e}"))),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[tracing::instrument(skip(self), name = "transport.get")]
    async fn get(&self, url: &str) -> Result<TransportResponse, TransportError> {
        let url = self.resolve(url)?;
        let response = self.client.get(url).send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?.to_vec();
        tracing::debug!(status, len = body.len(), "response received");
        Ok(TransportResponse { status, body })
    }
}

/// In-memory transport serving canned responses.
///
/// Unknown URLs answer 404. Every request is recorded.
#[derive(Debug, Default)]
pub struct StaticTransport {
    routes: HashMap<String, TransportResponse>,
    requests: Mutex<Vec<String>>,
}

impl StaticTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `body` with status 200 at `url`.
    pub fn with_body(self, url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        self.with_status(url, 200, body)
    }

    /// Serve `body` with `status` at `url`.
    pub fn with_status(
        mut self,
        url: impl Into<String>,
        status: u16,
        body: impl Into<Vec<u8>>,
    ) -> Self {
        self.routes.insert(
            url.into(),
            TransportResponse {
                status,
                body: body.into(),
            },
        );
        self
    }

    /// URLs requested so far, in order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl Transport for StaticTransport {
    async fn get(&self, url: &str) -> Result<TransportResponse, TransportError> {
        self.requests.lock().push(url.to_string());
        Ok(self.routes.get(url).cloned().unwrap_or(TransportResponse {
            status: 404,
            body: Vec::new(),
        }))
    }
}
