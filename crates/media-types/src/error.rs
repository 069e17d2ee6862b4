use std::fmt;

use serde::Serialize;

/// Why a manifest was refused before any media was fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum UnsupportedReason {
    /// HLS media playlist carries an `#EXT-X-KEY` tag.
    Encrypted,
    /// DASH manifest declares a `ContentProtection` element.
    Drm,
    /// No segment addressing scheme we know how to expand.
    Pattern,
    /// `SegmentTemplate` without a `SegmentTimeline`, so the segment count is unbounded.
    NoTimeline,
}

impl fmt::Display for UnsupportedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Encrypted => "encrypted HLS content",
            Self::Drm => "DRM-protected DASH content",
            Self::Pattern => "unsupported segment addressing pattern",
            Self::NoTimeline => "segment template without a timeline",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ManifestError {
    #[error("unsupported manifest: {0}")]
    Unsupported(UnsupportedReason),

    #[error("manifest parse failed: {reason}")]
    ParseFailed { reason: String },

    #[error("no variants found in manifest")]
    NoVariantsFound,

    #[error("no segments found in manifest")]
    NoSegmentsFound,
}

impl ManifestError {
    pub fn parse_failed(reason: impl Into<String>) -> Self {
        Self::ParseFailed {
            reason: reason.into(),
        }
    }

    pub fn unsupported(reason: UnsupportedReason) -> Self {
        Self::Unsupported(reason)
    }

    pub fn unsupported_reason(&self) -> Option<UnsupportedReason> {
        match self {
            Self::Unsupported(reason) => Some(*reason),
            _ => None,
        }
    }
}
