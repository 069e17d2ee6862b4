use std::sync::Arc;

use hls::{MediaPlaylist, Playlist, Variant, parse_playlist, pick_default_variant};
use media_types::ResolvedMedia;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::fetch_manifest_text;
use crate::EngineError;
use crate::fetcher::Fetcher;

/// Result of listing an HLS URL's variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VariantListing {
    pub is_master: bool,
    /// Empty when the URL is already a media playlist.
    pub variants: Vec<Variant>,
}

/// A media playlist plus the variant entry that led to it, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPlaylist {
    pub url: Url,
    pub playlist: MediaPlaylist,
    pub variant: Option<Variant>,
}

#[derive(Clone)]
pub struct HlsResolver {
    fetcher: Arc<dyn Fetcher>,
    max_hops: usize,
}

impl HlsResolver {
    pub fn new(fetcher: Arc<dyn Fetcher>, max_hops: usize) -> Self {
        Self { fetcher, max_hops }
    }

    #[instrument(skip_all, fields(url = %url))]
    pub async fn list_variants(
        &self,
        url: &Url,
        referrer: Option<&Url>,
        token: &CancellationToken,
    ) -> Result<VariantListing, EngineError> {
        let text = fetch_manifest_text(self.fetcher.as_ref(), url, referrer, token).await?;
        match parse_playlist(url, &text)? {
            Playlist::Master(master) => Ok(VariantListing {
                is_master: true,
                variants: master.variants,
            }),
            Playlist::Media(_) => Ok(VariantListing {
                is_master: false,
                variants: Vec::new(),
            }),
        }
    }

    /// Follows master playlists until a media playlist is reached.
    ///
    /// `explicit_variant` replaces the bandwidth pick at the first master only.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn expand_to_media(
        &self,
        url: &Url,
        explicit_variant: Option<&Url>,
        referrer: Option<&Url>,
        token: &CancellationToken,
    ) -> Result<ResolvedPlaylist, EngineError> {
        let mut current = url.clone();
        let mut explicit = explicit_variant.cloned();
        let mut chosen: Option<Variant> = None;
        let mut hops = 0usize;

        loop {
            let text = fetch_manifest_text(self.fetcher.as_ref(), &current, referrer, token).await?;

            let master = match parse_playlist(&current, &text)? {
                Playlist::Master(master) => master,
                Playlist::Media(playlist) => {
                    info!(
                        playlist = %current,
                        segments = playlist.segments.len(),
                        hops,
                        "Resolved HLS media playlist"
                    );
                    return Ok(ResolvedPlaylist {
                        url: current,
                        playlist,
                        variant: chosen,
                    });
                }
            };

            if hops >= self.max_hops {
                return Err(EngineError::ManifestChainTooDeep {
                    url: url.to_string(),
                    max_hops: self.max_hops,
                });
            }
            hops += 1;

            let next = match explicit.take() {
                Some(target) => {
                    chosen = master.variants.iter().find(|v| v.uri == target).cloned();
                    target
                }
                None => {
                    let variant = pick_default_variant(&master.variants)?.clone();
                    let uri = variant.uri.clone();
                    chosen = Some(variant);
                    uri
                }
            };
            debug!(from = %current, to = %next, "Following master playlist");
            current = next;
        }
    }

    /// Like [`expand_to_media`](Self::expand_to_media), also resolving the
    /// chosen variant's audio rendition. Audio failures leave the result
    /// video-only; cancellation still propagates.
    pub async fn expand_to_media_with_audio(
        &self,
        url: &Url,
        explicit_variant: Option<&Url>,
        referrer: Option<&Url>,
        token: &CancellationToken,
    ) -> Result<ResolvedMedia<MediaPlaylist>, EngineError> {
        let video = self
            .expand_to_media(url, explicit_variant, referrer, token)
            .await?;

        let audio_uri = video.variant.as_ref().and_then(|v| v.audio_uri.clone());
        let audio = match audio_uri {
            Some(audio_uri) => match self.expand_to_media(&audio_uri, None, referrer, token).await {
                Ok(resolved) => Some(resolved.playlist),
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    warn!(audio = %audio_uri, error = %e, "Audio rendition unavailable, continuing video-only");
                    None
                }
            },
            None => None,
        };

        Ok(ResolvedMedia {
            video: video.playlist,
            audio,
        })
    }
}
