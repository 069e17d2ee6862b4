use media_types::ManifestError;
use reqwest::StatusCode;

use crate::transcode::TranscodeError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("job cancelled")]
    Cancelled,

    #[error("failed to fetch manifest {url}: {reason}")]
    ManifestFetchFailed {
        url: String,
        status: Option<StatusCode>,
        reason: String,
    },

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("manifest chain starting at {url} exceeds {max_hops} hops")]
    ManifestChainTooDeep { url: String, max_hops: usize },

    #[error("failed to fetch segment {url}: {reason}")]
    SegmentFetchFailed {
        url: String,
        status: Option<StatusCode>,
        reason: String,
    },

    #[error("transcode failed: {cause}")]
    TranscodeFailed { argv: Vec<String>, cause: String },

    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error("artifact delivery failed: {reason}")]
    Sink { reason: String },

    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

impl EngineError {
    pub fn manifest_fetch_failed(
        url: impl Into<String>,
        status: Option<StatusCode>,
        reason: impl Into<String>,
    ) -> Self {
        Self::ManifestFetchFailed {
            url: url.into(),
            status,
            reason: reason.into(),
        }
    }

    pub fn segment_fetch_failed(
        url: impl Into<String>,
        status: Option<StatusCode>,
        reason: impl Into<String>,
    ) -> Self {
        Self::SegmentFetchFailed {
            url: url.into(),
            status,
            reason: reason.into(),
        }
    }

    pub fn transcode_failed(argv: Vec<String>, cause: impl Into<String>) -> Self {
        Self::TranscodeFailed {
            argv,
            cause: cause.into(),
        }
    }

    pub fn invalid_request(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }

    pub fn sink(reason: impl Into<String>) -> Self {
        Self::Sink {
            reason: reason.into(),
        }
    }

    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// A transcode failure can be retried with a heavier fallback tier.
    pub fn is_transcode_failure(&self) -> bool {
        matches!(self, Self::TranscodeFailed { .. })
    }
}

impl From<TranscodeError> for EngineError {
    fn from(err: TranscodeError) -> Self {
        match err {
            TranscodeError::Terminated => Self::Cancelled,
            TranscodeError::Failed { argv, cause } => Self::TranscodeFailed { argv, cause },
            other => Self::TranscodeFailed {
                argv: Vec::new(),
                cause: other.to_string(),
            },
        }
    }
}
