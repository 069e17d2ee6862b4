use serde::{Deserialize, Serialize};
use url::Url;

/// Kind of media a URL points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum StreamKind {
    Hls,
    Dash,
    Direct,
}

const DIRECT_EXTENSIONS: [&str; 4] = ["mp4", "m4v", "webm", "mov"];

impl StreamKind {
    /// Classifies a URL by its path extension, ignoring query and case.
    pub fn detect(url: &Url) -> Option<Self> {
        let path = url.path().to_ascii_lowercase();
        let (_, extension) = path.rsplit_once('.')?;
        match extension {
            "m3u8" => Some(Self::Hls),
            "mpd" => Some(Self::Dash),
            ext if DIRECT_EXTENSIONS.contains(&ext) => Some(Self::Direct),
            _ => None,
        }
    }

    pub fn is_manifest(&self) -> bool {
        matches!(self, Self::Hls | Self::Dash)
    }
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hls => f.write_str("hls"),
            Self::Dash => f.write_str("dash"),
            Self::Direct => f.write_str("direct"),
        }
    }
}

/// A candidate stream as reported by whoever discovered it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRecord {
    pub url: Url,
    pub kind: StreamKind,
    /// Page that requested the stream; used as the referrer for every fetch.
    pub initiator: Option<Url>,
}

impl StreamRecord {
    /// Builds a record when the URL can be classified.
    pub fn classify(url: Url, initiator: Option<Url>) -> Option<Self> {
        let kind = StreamKind::detect(&url)?;
        Some(Self {
            url,
            kind,
            initiator,
        })
    }
}
