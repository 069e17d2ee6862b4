//! Fetches manifests and expands them into concrete segment sources.

mod mpd;
mod playlist;

pub use mpd::DashResolver;
pub use playlist::{HlsResolver, ResolvedPlaylist, VariantListing};

use tokio_util::sync::CancellationToken;
use url::Url;

use crate::EngineError;
use crate::fetcher::{FetchPurpose, Fetcher};
use media_types::ManifestError;

/// Downloads a manifest and decodes it as UTF-8 text.
pub(crate) async fn fetch_manifest_text(
    fetcher: &dyn Fetcher,
    url: &Url,
    referrer: Option<&Url>,
    token: &CancellationToken,
) -> Result<String, EngineError> {
    let bytes = fetcher
        .fetch(url, referrer, FetchPurpose::Manifest, token)
        .await
        .map_err(|e| e.into_engine_error(FetchPurpose::Manifest, url))?;

    let text = String::from_utf8(bytes.to_vec())
        .map_err(|_| ManifestError::parse_failed(format!("manifest {url} is not valid UTF-8")))?;
    Ok(text.trim_start_matches('\u{feff}').to_string())
}
