use std::path::PathBuf;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::EngineError;
use crate::proxy::ProxyConfig;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/142.0.0.0 Safari/537.36";

/// Environment variable overriding the ffmpeg binary location.
pub const FFMPEG_PATH_ENV: &str = "FFMPEG_PATH";

/// HTTP client options shared by manifest and segment requests.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub user_agent: String,

    /// Extra request headers, merged over the defaults.
    pub headers: Vec<(String, String)>,

    /// Connection timeout (time to establish initial connection)
    pub connect_timeout: Duration,

    /// Upper bound for one whole request, body included.
    pub request_timeout: Duration,

    /// Retries for a segment after a connect or timeout failure.
    /// HTTP error statuses are never retried.
    pub segment_retries: u32,

    /// Base delay for exponential backoff between segment retries.
    pub segment_retry_delay_base: Duration,

    pub proxy: Option<ProxyConfig>,

    /// Whether to use system proxy settings when no explicit proxy is set
    pub use_system_proxy: bool,

    pub danger_accept_invalid_certs: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            headers: Vec::new(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            segment_retries: 2,
            segment_retry_delay_base: Duration::from_millis(500),
            proxy: None,
            use_system_proxy: true,
            danger_accept_invalid_certs: false,
        }
    }
}

impl HttpConfig {
    pub fn default_headers() -> HeaderMap {
        let mut default_headers = HeaderMap::new();

        default_headers.insert(
            reqwest::header::ACCEPT,
            HeaderValue::from_static("*/*"),
        );

        default_headers.insert(
            reqwest::header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("en-US,en;q=0.5"),
        );
        default_headers
    }

    /// Default headers with the configured extras layered on top.
    pub fn header_map(&self) -> Result<HeaderMap, EngineError> {
        let mut headers = Self::default_headers();
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.trim().as_bytes())
                .map_err(|e| EngineError::configuration(format!("invalid header name `{name}`: {e}")))?;
            let value = HeaderValue::from_str(value.trim())
                .map_err(|e| EngineError::configuration(format!("invalid value for header `{name}`: {e}")))?;
            headers.insert(name, value);
        }
        Ok(headers)
    }
}

/// Engine-wide configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub http: HttpConfig,

    /// Maximum number of master playlists followed before giving up.
    pub max_manifest_hops: usize,

    /// Jobs allowed to download or convert at the same time. Others wait as pending.
    pub max_concurrent_jobs: usize,

    /// How long finished jobs stay visible before being purged.
    pub terminal_grace_period: Duration,

    pub ffmpeg_path: PathBuf,

    /// Capacity of the job event broadcast channel.
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            max_manifest_hops: 5,
            max_concurrent_jobs: 3,
            terminal_grace_period: Duration::from_secs(10),
            ffmpeg_path: default_ffmpeg_path(),
            event_capacity: 256,
        }
    }
}

impl EngineConfig {
    pub fn with_http(mut self, http: HttpConfig) -> Self {
        self.http = http;
        self
    }

    pub fn with_max_manifest_hops(mut self, hops: usize) -> Self {
        self.max_manifest_hops = hops;
        self
    }

    pub fn with_max_concurrent_jobs(mut self, jobs: usize) -> Self {
        self.max_concurrent_jobs = jobs;
        self
    }

    pub fn with_terminal_grace_period(mut self, period: Duration) -> Self {
        self.terminal_grace_period = period;
        self
    }

    pub fn with_ffmpeg_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ffmpeg_path = path.into();
        self
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.max_concurrent_jobs == 0 {
            return Err(EngineError::configuration(
                "max_concurrent_jobs must be at least 1",
            ));
        }
        if self.event_capacity == 0 {
            return Err(EngineError::configuration("event_capacity must be at least 1"));
        }
        Ok(())
    }
}

fn default_ffmpeg_path() -> PathBuf {
    std::env::var_os(FFMPEG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("ffmpeg"))
}
