use m3u8_rs::ExtTag;
use media_types::{ManifestError, SegmentSequence, UnsupportedReason, resolve_url};
use serde::Serialize;
use tracing::debug;
use url::Url;

use crate::{parse_attributes, parse_error};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaSegment {
    pub uri: Url,
    /// Position in playback order, counting from 0 without gaps.
    pub index: usize,
}

/// A resolved media playlist: optional init map plus ordered segments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaPlaylist {
    pub init_url: Option<Url>,
    pub segments: Vec<MediaSegment>,
}

impl SegmentSequence for MediaPlaylist {
    fn init_url(&self) -> Option<&Url> {
        self.init_url.as_ref()
    }

    fn segment_urls(&self) -> Vec<&Url> {
        self.segments.iter().map(|s| &s.uri).collect()
    }
}

/// Parses a media playlist fetched from `url`.
///
/// Any `#EXT-X-KEY` tag rejects the whole playlist. When no `#EXTINF`
/// segments exist, `#EXT-X-PART` entries are used instead.
pub fn parse_media(url: &Url, text: &str) -> Result<MediaPlaylist, ManifestError> {
    let playlist = m3u8_rs::parse_media_playlist_res(text.as_bytes()).map_err(parse_error)?;
    convert(playlist, url, text)
}

pub(crate) fn convert(
    playlist: m3u8_rs::MediaPlaylist,
    url: &Url,
    text: &str,
) -> Result<MediaPlaylist, ManifestError> {
    let mut resolved = resolve(&playlist, url)?;

    if resolved.segments.is_empty()
        && let Some(promoted) = promote_partial_segments(text)
    {
        let playlist =
            m3u8_rs::parse_media_playlist_res(promoted.as_bytes()).map_err(parse_error)?;
        resolved = resolve(&playlist, url)?;
        debug!(
            parts = resolved.segments.len(),
            "Using partial segments as playlist entries"
        );
    }

    if resolved.segments.is_empty() {
        return Err(ManifestError::NoSegmentsFound);
    }

    debug!(
        segments = resolved.segments.len(),
        has_init = resolved.init_url.is_some(),
        "Parsed media playlist"
    );
    Ok(resolved)
}

fn resolve(playlist: &m3u8_rs::MediaPlaylist, url: &Url) -> Result<MediaPlaylist, ManifestError> {
    if is_encrypted(playlist) {
        return Err(ManifestError::unsupported(UnsupportedReason::Encrypted));
    }

    // a dangling #EXTINF yields a segment without a URI
    let segments = playlist
        .segments
        .iter()
        .map(|s| s.uri.trim())
        .filter(|uri| !uri.is_empty())
        .enumerate()
        .map(|(index, uri)| {
            Ok(MediaSegment {
                uri: resolve_url(url, uri)?,
                index,
            })
        })
        .collect::<Result<Vec<_>, ManifestError>>()?;

    let init_uri = match playlist.segments.iter().rev().find_map(|s| s.map.as_ref()) {
        Some(map) => Some(map.uri.clone()),
        None => playlist_level_map(&playlist.unknown_tags),
    };
    let init_url = init_uri.map(|uri| resolve_url(url, &uri)).transpose()?;

    Ok(MediaPlaylist { init_url, segments })
}

/// True when any key tag is present, including `METHOD=NONE` and tags
/// `m3u8-rs` could not type.
fn is_encrypted(playlist: &m3u8_rs::MediaPlaylist) -> bool {
    let untyped_key = |tags: &[ExtTag]| tags.iter().any(|t| t.tag == "X-KEY");
    untyped_key(&playlist.unknown_tags)
        || playlist
            .segments
            .iter()
            .any(|s| s.key.is_some() || untyped_key(&s.unknown_tags))
}

/// `EXT-X-MAP` declared ahead of the first segment lands in the playlist's
/// unknown tags rather than on a segment.
fn playlist_level_map(tags: &[ExtTag]) -> Option<String> {
    let rest = tags.iter().rev().find(|t| t.tag == "X-MAP")?.rest.as_deref()?;
    parse_attributes(rest).get("URI").map(str::to_string)
}

/// Rewrites `#EXT-X-PART` entries into plain segments so a low-latency
/// playlist without complete segments can still be parsed.
fn promote_partial_segments(text: &str) -> Option<String> {
    let mut promoted = 0usize;
    let mut out = String::with_capacity(text.len());
    for line in text.lines().map(str::trim) {
        let Some(rest) = line.strip_prefix("#EXT-X-PART:") else {
            out.push_str(line);
            out.push('\n');
            continue;
        };
        let attrs = parse_attributes(rest);
        let Some(uri) = attrs.get("URI") else {
            continue;
        };
        let duration = attrs
            .get("DURATION")
            .and_then(|d| d.parse::<f64>().ok())
            .unwrap_or(0.0);
        out.push_str(&format!("#EXTINF:{duration},\n{uri}\n"));
        promoted += 1;
    }
    (promoted > 0).then_some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url() -> Url {
        Url::parse("https://cdn.test/v/720p/index.m3u8?token=t").unwrap()
    }

    #[test]
    fn test_fmp4_playlist_with_map() {
        let text = "#EXTM3U
#EXT-X-TARGETDURATION:4
#EXT-X-MAP:URI=\"init.mp4\"
#EXTINF:4.0,
seg0.ts
#EXTINF:4.0,
seg1.ts

#EXTINF:4.0,
https://other.test/seg2.ts
#EXT-X-ENDLIST
";
        let playlist = parse_media(&url(), text).unwrap();
        assert_eq!(
            playlist.init_url.as_ref().map(Url::as_str),
            Some("https://cdn.test/v/720p/init.mp4")
        );
        let indices: Vec<usize> = playlist.segments.iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(playlist.segments[1].uri.as_str(), "https://cdn.test/v/720p/seg1.ts");
        assert_eq!(playlist.segments[2].uri.as_str(), "https://other.test/seg2.ts");
        assert_eq!(playlist.fetch_count(), 4);
    }

    #[test]
    fn test_key_tag_is_rejected() {
        let aes = "#EXTM3U
#EXT-X-TARGETDURATION:4
#EXT-X-KEY:METHOD=AES-128,URI=\"key.bin\"
#EXTINF:4,
seg0.ts
";
        assert_eq!(
            parse_media(&url(), aes),
            Err(ManifestError::Unsupported(UnsupportedReason::Encrypted))
        );

        // key rotation after clear segments
        let rotated = "#EXTM3U
#EXT-X-TARGETDURATION:4
#EXTINF:4,
seg0.ts
#EXT-X-KEY:METHOD=SAMPLE-AES,URI=\"key2.bin\"
#EXTINF:4,
seg1.ts
";
        assert_eq!(
            parse_media(&url(), rotated),
            Err(ManifestError::Unsupported(UnsupportedReason::Encrypted))
        );
    }

    #[test]
    fn test_partial_segments_fallback() {
        let text = "#EXTM3U
#EXT-X-TARGETDURATION:4
#EXT-X-PART:DURATION=1.0,URI=\"part0.m4s\"
#EXT-X-PART:DURATION=1.0,URI=\"part1.m4s\",INDEPENDENT=YES
#EXT-X-PRELOAD-HINT:TYPE=PART,URI=\"part2.m4s\"
";
        let playlist = parse_media(&url(), text).unwrap();
        assert!(playlist.init_url.is_none());
        let uris: Vec<&str> = playlist.segments.iter().map(|s| s.uri.as_str()).collect();
        assert_eq!(
            uris,
            vec![
                "https://cdn.test/v/720p/part0.m4s",
                "https://cdn.test/v/720p/part1.m4s"
            ]
        );
    }

    #[test]
    fn test_parts_ignored_when_full_segments_exist() {
        let text = "#EXTM3U
#EXT-X-TARGETDURATION:2
#EXTINF:2,
full0.ts
#EXT-X-PART:DURATION=1.0,URI=\"part0.ts\"
";
        let playlist = parse_media(&url(), text).unwrap();
        assert_eq!(playlist.segments.len(), 1);
        assert_eq!(playlist.segments[0].uri.as_str(), "https://cdn.test/v/720p/full0.ts");
    }

    #[test]
    fn test_promote_partial_segments() {
        let promoted = promote_partial_segments(
            "#EXTM3U\n#EXT-X-PART:DURATION=0.5,URI=\"p0.m4s\"\n#EXT-X-PART:DURATION=x\n",
        )
        .unwrap();
        assert_eq!(promoted, "#EXTM3U\n#EXTINF:0.5,\np0.m4s\n");
        assert_eq!(promote_partial_segments("#EXTM3U\n#EXT-X-ENDLIST\n"), None);
    }

    #[test]
    fn test_no_segments() {
        assert_eq!(
            parse_media(&url(), "#EXTM3U\n#EXT-X-TARGETDURATION:4\n#EXT-X-ENDLIST\n"),
            Err(ManifestError::NoSegmentsFound)
        );
    }
}
