use std::collections::BTreeMap;

use m3u8_rs::{AlternativeMedia, AlternativeMediaType, QuotedOrUnquoted, VariantStream};
use media_types::{ManifestError, Resolution, resolve_url};
use serde::Serialize;
use tracing::debug;
use url::Url;

use crate::parse_error;

/// One rendition listed by a master playlist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Variant {
    pub uri: Url,
    /// `AVERAGE-BANDWIDTH` when declared, else `BANDWIDTH`.
    pub bandwidth: u64,
    pub resolution: Option<Resolution>,
    pub name: Option<String>,
    pub audio_group: Option<String>,
    /// Audio rendition chosen for `audio_group`, if the group resolved to one.
    pub audio_uri: Option<Url>,
}

/// Audio group id mapped to the single rendition picked for it.
pub type AudioGroups = BTreeMap<String, Url>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MasterPlaylist {
    /// Sorted by descending bandwidth; equal bandwidths keep declaration order.
    pub variants: Vec<Variant>,
    pub audio_groups: AudioGroups,
}

/// True if the playlist lists variant streams.
pub fn is_master(text: &str) -> bool {
    m3u8_rs::is_master_playlist(text.as_bytes())
}

pub fn parse_master(text: &str, base: &Url) -> Result<MasterPlaylist, ManifestError> {
    let playlist = m3u8_rs::parse_master_playlist_res(text.as_bytes()).map_err(parse_error)?;
    convert(playlist, base)
}

pub(crate) fn convert(
    playlist: m3u8_rs::MasterPlaylist,
    base: &Url,
) -> Result<MasterPlaylist, ManifestError> {
    // m3u8-rs keeps a stream-info tag it cannot type as an unknown tag
    if let Some(tag) = playlist.unknown_tags.iter().find(|t| t.tag == "X-STREAM-INF") {
        return Err(ManifestError::parse_failed(format!(
            "invalid EXT-X-STREAM-INF `{}`",
            tag.rest.as_deref().unwrap_or_default()
        )));
    }

    let audio_groups = audio_groups(&playlist.alternatives, base)?;

    let mut variants = Vec::new();
    for stream in playlist.variants.iter().filter(|v| !v.is_i_frame) {
        let uri = stream.uri.trim();
        if uri.is_empty() {
            debug!(bandwidth = stream.bandwidth, "Stream info tag without a URI line, skipping");
            continue;
        }

        let audio_uri = stream
            .audio
            .as_ref()
            .and_then(|group| audio_groups.get(group))
            .cloned();

        variants.push(Variant {
            uri: resolve_url(base, uri)?,
            bandwidth: stream.average_bandwidth.unwrap_or(stream.bandwidth),
            resolution: stream.resolution.map(resolution).transpose()?,
            name: other_attribute(stream, "NAME"),
            audio_group: stream.audio.clone(),
            audio_uri,
        });
    }

    // sort_by is stable, ties keep declaration order
    variants.sort_by(|a, b| b.bandwidth.cmp(&a.bandwidth));

    debug!(
        variants = variants.len(),
        audio_groups = audio_groups.len(),
        "Parsed master playlist"
    );

    Ok(MasterPlaylist {
        variants,
        audio_groups,
    })
}

#[derive(Default)]
struct AudioCandidates {
    default: Vec<Url>,
    other: Vec<Url>,
}

/// Picks one rendition per audio group: the first `DEFAULT=YES` entry, else the first entry.
fn audio_groups(alternatives: &[AlternativeMedia], base: &Url) -> Result<AudioGroups, ManifestError> {
    let mut candidates: BTreeMap<String, AudioCandidates> = BTreeMap::new();
    for media in alternatives
        .iter()
        .filter(|m| matches!(m.media_type, AlternativeMediaType::Audio))
    {
        let Some(uri) = media.uri.as_deref() else {
            continue;
        };
        let uri = resolve_url(base, uri)?;
        let entry = candidates.entry(media.group_id.clone()).or_default();
        if media.default {
            entry.default.push(uri);
        } else {
            entry.other.push(uri);
        }
    }

    Ok(candidates
        .into_iter()
        .filter_map(|(group, c)| {
            let pick = c.default.into_iter().next().or_else(|| c.other.into_iter().next())?;
            Some((group, pick))
        })
        .collect())
}

fn resolution(r: m3u8_rs::Resolution) -> Result<Resolution, ManifestError> {
    match (u32::try_from(r.width), u32::try_from(r.height)) {
        (Ok(width), Ok(height)) => Ok(Resolution::new(width, height)),
        _ => Err(ManifestError::parse_failed(format!(
            "resolution {}x{} out of range",
            r.width, r.height
        ))),
    }
}

/// Attributes outside the HLS stream-info set, such as `NAME`.
fn other_attribute(stream: &VariantStream, key: &str) -> Option<String> {
    stream
        .other_attributes
        .as_ref()?
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, value)| match value {
            QuotedOrUnquoted::Quoted(s) | QuotedOrUnquoted::Unquoted(s) => s.clone(),
        })
}

/// Picks the variant with the highest bandwidth, the earliest one on ties.
pub fn pick_default_variant(variants: &[Variant]) -> Result<&Variant, ManifestError> {
    variants
        .iter()
        .reduce(|best, v| if v.bandwidth > best.bandwidth { v } else { best })
        .ok_or(ManifestError::NoVariantsFound)
}
