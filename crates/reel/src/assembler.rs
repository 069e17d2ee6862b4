//! Sequential segment download and concatenation.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use media_types::{ContainerKind, ManifestError, SegmentSequence};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

use crate::EngineError;
use crate::fetcher::{FetchPurpose, Fetcher};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssemblyProgress {
    pub completed: usize,
    pub total: usize,
}

impl AssemblyProgress {
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.completed as f64 / self.total as f64
    }
}

/// One track's bytes, concatenated in playback order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledTrack {
    pub bytes: Bytes,
    pub container: ContainerKind,
    pub first_segment: Option<Url>,
}

impl AssembledTrack {
    /// True for a transport stream whose segments are raw ADTS audio.
    pub fn is_raw_aac(&self) -> bool {
        self.container == ContainerKind::MpegTransportStream
            && self
                .first_segment
                .as_ref()
                .is_some_and(|u| u.path().to_ascii_lowercase().ends_with(".aac"))
    }
}

#[derive(Clone)]
pub struct Assembler {
    fetcher: Arc<dyn Fetcher>,
}

impl Assembler {
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self { fetcher }
    }

    /// Fetches the init segment (if any) and then every segment, strictly in
    /// order. The first failed fetch aborts the assembly and discards what
    /// was collected.
    pub async fn assemble<S, F>(
        &self,
        source: &S,
        referrer: Option<&Url>,
        token: &CancellationToken,
        mut on_progress: F,
    ) -> Result<AssembledTrack, EngineError>
    where
        S: SegmentSequence + ?Sized,
        F: FnMut(AssemblyProgress) + Send,
    {
        let init = source.init_url();
        let segments = source.segment_urls();
        if segments.is_empty() {
            return Err(ManifestError::NoSegmentsFound.into());
        }

        let total = source.fetch_count();
        let mut buffer = BytesMut::new();
        let mut completed = 0usize;

        for url in init.into_iter().chain(segments.iter().copied()) {
            if token.is_cancelled() {
                debug!(completed, total, "Assembly cancelled");
                return Err(EngineError::Cancelled);
            }

            let bytes = self
                .fetcher
                .fetch(url, referrer, FetchPurpose::Segment, token)
                .await
                .map_err(|e| e.into_engine_error(FetchPurpose::Segment, url))?;

            buffer.extend_from_slice(&bytes);
            completed += 1;
            debug!(url = %url, size = bytes.len(), completed, total, "Segment appended");
            on_progress(AssemblyProgress { completed, total });
        }

        let first_segment = segments.first().map(|u| (*u).clone());
        let container = ContainerKind::infer(init.is_some(), first_segment.as_ref());
        info!(bytes = buffer.len(), fetches = total, %container, "Track assembled");

        Ok(AssembledTrack {
            bytes: buffer.freeze(),
            container,
            first_segment,
        })
    }
}
