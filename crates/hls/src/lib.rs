//! HLS (HTTP Live Streaming) playlist parsing.
//!
//! Playlists are parsed with `m3u8-rs` and turned into fully resolved
//! descriptions: absolute URLs, bandwidth-ordered variants, one audio
//! rendition per group. Fetching and recursion across playlists live in the
//! engine.

mod attributes;
mod master;
mod media;

pub use attributes::{AttributeList, parse_attributes};
pub use master::{AudioGroups, MasterPlaylist, Variant, is_master, parse_master, pick_default_variant};
pub use media::{MediaPlaylist, MediaSegment, parse_media};

// Export common types for ease of use
pub use media_types::{ManifestError, Resolution, UnsupportedReason};

use url::Url;

/// A parsed playlist of either kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Playlist {
    Master(MasterPlaylist),
    Media(MediaPlaylist),
}

/// Parses a playlist fetched from `url`, deciding its kind from the tags it carries.
pub fn parse_playlist(url: &Url, text: &str) -> Result<Playlist, ManifestError> {
    match m3u8_rs::parse_playlist_res(text.as_bytes()).map_err(parse_error)? {
        m3u8_rs::Playlist::MasterPlaylist(pl) => master::convert(pl, url).map(Playlist::Master),
        m3u8_rs::Playlist::MediaPlaylist(pl) => media::convert(pl, url, text).map(Playlist::Media),
    }
}

/// Maps an `m3u8-rs` failure to a parse error, keeping the message short.
pub(crate) fn parse_error(err: impl std::fmt::Display) -> ManifestError {
    let mut reason: String = err.to_string().chars().take(160).collect();
    reason.insert_str(0, "malformed playlist: ");
    ManifestError::parse_failed(reason)
}
