use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

/// Opaque job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    RawSegmentDownload,
    HlsToMp4,
    DashToMp4,
}

impl JobKind {
    pub fn is_conversion(&self) -> bool {
        !matches!(self, Self::RawSegmentDownload)
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::RawSegmentDownload => "raw",
            Self::HlsToMp4 => "hls-to-mp4",
            Self::DashToMp4 => "dash-to-mp4",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Pending,
    Downloading,
    Converting,
    Done,
    Canceled,
    Error,
}

impl JobPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Canceled | Self::Error)
    }

    /// Phase reported in progress notifications, `None` while pending.
    pub fn notification(&self) -> Option<NotificationPhase> {
        match self {
            Self::Pending => None,
            Self::Downloading => Some(NotificationPhase::Download),
            Self::Converting => Some(NotificationPhase::Convert),
            Self::Done => Some(NotificationPhase::Done),
            Self::Canceled => Some(NotificationPhase::Canceled),
            Self::Error => Some(NotificationPhase::Error),
        }
    }
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Downloading => "downloading",
            Self::Converting => "converting",
            Self::Done => "done",
            Self::Canceled => "canceled",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMetadata {
    pub url: Url,
    pub filename: String,
    pub compress: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

/// Snapshot of one job as held by the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub phase: JobPhase,
    pub progress: f64,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Failure or cancellation message once terminal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub metadata: JobMetadata,
}

impl Job {
    pub fn new(kind: JobKind, metadata: JobMetadata) -> Self {
        Self {
            id: JobId::new(),
            kind,
            phase: JobPhase::Pending,
            progress: 0.0,
            started_at: Utc::now(),
            finished_at: None,
            message: None,
            metadata,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationPhase {
    Download,
    Convert,
    Done,
    Canceled,
    Error,
}

impl NotificationPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Canceled | Self::Error)
    }
}

/// Progress notification pushed to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    pub job_id: JobId,
    pub phase: NotificationPhase,
    pub progress: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
