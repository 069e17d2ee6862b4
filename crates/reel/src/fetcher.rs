//! HTTP access for manifests and segments.

use std::sync::OnceLock;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use url::Url;

use crate::EngineError;
use crate::config::HttpConfig;
use crate::proxy::build_proxy_from_config;

/// What a fetch is for. Only segment fetches are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPurpose {
    Manifest,
    Segment,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP {status}")]
    Status { status: StatusCode },

    #[error("network error: {reason}")]
    Network { reason: String },

    #[error("fetch cancelled")]
    Cancelled,
}

impl FetchError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status } => Some(*status),
            _ => None,
        }
    }

    /// Maps into the engine taxonomy for the given resource.
    pub fn into_engine_error(self, purpose: FetchPurpose, url: &Url) -> EngineError {
        let status = self.status();
        match (self, purpose) {
            (Self::Cancelled, _) => EngineError::Cancelled,
            (err, FetchPurpose::Manifest) => {
                EngineError::manifest_fetch_failed(url.as_str(), status, err.to_string())
            }
            (err, FetchPurpose::Segment) => {
                EngineError::segment_fetch_failed(url.as_str(), status, err.to_string())
            }
        }
    }
}

/// Source of manifest and segment bytes.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetches `url`, sending `referrer` when known. Resolves to
    /// `FetchError::Cancelled` as soon as `token` fires.
    async fn fetch(
        &self,
        url: &Url,
        referrer: Option<&Url>,
        purpose: FetchPurpose,
        token: &CancellationToken,
    ) -> Result<Bytes, FetchError>;
}

pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// `reqwest` backed fetcher with a cookie store shared across requests.
pub struct HttpFetcher {
    client: Client,
    config: HttpConfig,
}

impl HttpFetcher {
    pub fn new(config: HttpConfig) -> Result<Self, EngineError> {
        install_rustls_provider();

        let mut builder = Client::builder()
            .user_agent(config.user_agent.clone())
            .default_headers(config.header_map()?)
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .cookie_store(true)
            .danger_accept_invalid_certs(config.danger_accept_invalid_certs);

        if let Some(proxy) = &config.proxy {
            builder = builder.proxy(build_proxy_from_config(proxy)?);
        } else if !config.use_system_proxy {
            builder = builder.no_proxy();
        }

        let client = builder
            .build()
            .map_err(|e| EngineError::configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    async fn fetch_once(&self, url: &Url, referrer: Option<&Url>) -> Result<Bytes, AttemptError> {
        let mut request = self.client.get(url.clone());
        if let Some(referrer) = referrer {
            request = request.header(reqwest::header::REFERER, referrer.as_str());
        }

        let response = request.send().await.map_err(AttemptError::from)?;
        let status = response.status();
        if !status.is_success() {
            return Err(AttemptError::Final(FetchError::Status { status }));
        }
        trace!(url = %url, http_version = ?response.version(), "Response received");

        response.bytes().await.map_err(AttemptError::from)
    }
}

/// Outcome of one attempt: either worth retrying or final.
enum AttemptError {
    Transient(FetchError),
    Final(FetchError),
}

impl From<reqwest::Error> for AttemptError {
    fn from(e: reqwest::Error) -> Self {
        let err = FetchError::Network {
            reason: e.to_string(),
        };
        if e.is_connect() || e.is_timeout() {
            Self::Transient(err)
        } else {
            Self::Final(err)
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(
        &self,
        url: &Url,
        referrer: Option<&Url>,
        purpose: FetchPurpose,
        token: &CancellationToken,
    ) -> Result<Bytes, FetchError> {
        let max_retries = match purpose {
            FetchPurpose::Manifest => 0,
            FetchPurpose::Segment => self.config.segment_retries,
        };
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let result = tokio::select! {
                _ = token.cancelled() => return Err(FetchError::Cancelled),
                result = self.fetch_once(url, referrer) => result,
            };

            let err = match result {
                Ok(bytes) => {
                    debug!(url = %url, size = bytes.len(), ?purpose, "Fetched");
                    return Ok(bytes);
                }
                Err(AttemptError::Final(err)) => return Err(err),
                Err(AttemptError::Transient(err)) if attempts > max_retries => return Err(err),
                Err(AttemptError::Transient(err)) => err,
            };

            let delay = self.config.segment_retry_delay_base * 2_u32.pow(attempts.saturating_sub(1));
            warn!(url = %url, attempt = attempts, error = %err, ?delay, "Fetch failed, retrying");
            tokio::select! {
                _ = token.cancelled() => return Err(FetchError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
