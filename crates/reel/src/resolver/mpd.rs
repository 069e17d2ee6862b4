use std::sync::Arc;

use dash::{DashMedia, Representation, build_segment_source, parse_variants};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};
use url::Url;

use super::fetch_manifest_text;
use crate::EngineError;
use crate::fetcher::Fetcher;

/// DASH manifests are a single document, so resolution is one fetch plus parsing.
#[derive(Clone)]
pub struct DashResolver {
    fetcher: Arc<dyn Fetcher>,
}

impl DashResolver {
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self { fetcher }
    }

    #[instrument(skip_all, fields(url = %url))]
    pub async fn list_variants(
        &self,
        url: &Url,
        referrer: Option<&Url>,
        token: &CancellationToken,
    ) -> Result<Vec<Representation>, EngineError> {
        let xml = fetch_manifest_text(self.fetcher.as_ref(), url, referrer, token).await?;
        Ok(parse_variants(&xml, url)?)
    }

    #[instrument(skip_all, fields(url = %url))]
    pub async fn build(
        &self,
        url: &Url,
        representation_id: Option<&str>,
        referrer: Option<&Url>,
        token: &CancellationToken,
    ) -> Result<DashMedia, EngineError> {
        let xml = fetch_manifest_text(self.fetcher.as_ref(), url, referrer, token).await?;
        let media = build_segment_source(&xml, url, representation_id)?;
        info!(
            segments = media.video.segments.len(),
            audio = media.audio.is_some(),
            "Resolved DASH manifest"
        );
        Ok(media)
    }
}
