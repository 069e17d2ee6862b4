use serde::Serialize;
use url::Url;

use crate::ManifestError;

/// An ordered list of byte sources that concatenate into one track.
///
/// Implemented by both the HLS media playlist and the DASH segment source so
/// the assembler does not care which manifest format produced it.
pub trait SegmentSequence {
    /// Initialization segment fetched before any media segment.
    fn init_url(&self) -> Option<&Url>;

    /// Media segments in playback order.
    fn segment_urls(&self) -> Vec<&Url>;

    /// Total number of fetches needed to assemble the track.
    fn fetch_count(&self) -> usize {
        self.segment_urls().len() + usize::from(self.init_url().is_some())
    }
}

/// A resolved video track with an optional separate audio track.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedMedia<T> {
    pub video: T,
    pub audio: Option<T>,
}

impl<T> ResolvedMedia<T> {
    pub fn video_only(video: T) -> Self {
        Self { video, audio: None }
    }
}

/// Resolves a manifest reference against the manifest's own URL.
pub fn resolve_url(base: &Url, reference: &str) -> Result<Url, ManifestError> {
    let reference = reference.trim();
    base.join(reference)
        .map_err(|e| ManifestError::parse_failed(format!("invalid URI `{reference}`: {e}")))
}
