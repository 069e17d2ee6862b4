use media_types::{ManifestError, Resolution, UnsupportedReason, resolve_url};
use serde::Serialize;
use tracing::debug;
use url::Url;

use crate::xml::{Element, parse_document};

/// A video representation offered by the MPD.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Representation {
    pub id: String,
    pub bandwidth: u64,
    pub resolution: Option<Resolution>,
    pub base_url: Url,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TrackType {
    Video,
    Audio,
    Other,
}

/// A `Representation` element together with its ancestors.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RepresentationNode<'a> {
    pub period_index: usize,
    pub period: &'a Element,
    pub adaptation_set: &'a Element,
    pub representation: &'a Element,
    pub track: TrackType,
    pub bandwidth: u64,
}

impl RepresentationNode<'_> {
    pub fn id(&self) -> &str {
        self.representation.attr("id").unwrap_or_default()
    }
}

/// Parses the document and refuses it if any `ContentProtection` element exists.
pub(crate) fn parse_unprotected(xml: &str) -> Result<Element, ManifestError> {
    let root = parse_document(xml)?;
    if root.name != "MPD" {
        return Err(ManifestError::parse_failed(format!(
            "expected MPD root element, found `{}`",
            root.name
        )));
    }
    if root.contains("ContentProtection") {
        return Err(ManifestError::unsupported(UnsupportedReason::Drm));
    }
    Ok(root)
}

fn track_type(adaptation_set: &Element) -> TrackType {
    let first_rep_mime = adaptation_set
        .child("Representation")
        .and_then(|r| r.attr("mimeType"));
    let hint = adaptation_set
        .attr("contentType")
        .or_else(|| adaptation_set.attr("mimeType"))
        .or(first_rep_mime)
        .unwrap_or_default()
        .to_ascii_lowercase();

    if hint.contains("video") {
        TrackType::Video
    } else if hint.contains("audio") {
        TrackType::Audio
    } else {
        TrackType::Other
    }
}

fn parse_bandwidth(representation: &Element) -> Result<u64, ManifestError> {
    match representation.attr("bandwidth") {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ManifestError::parse_failed(format!("invalid bandwidth `{raw}`"))),
        None => Ok(0),
    }
}

/// Every representation in document order.
pub(crate) fn representations(root: &Element) -> Result<Vec<RepresentationNode<'_>>, ManifestError> {
    let mut nodes = Vec::new();
    for (period_index, period) in root.children_named("Period").enumerate() {
        for adaptation_set in period.children_named("AdaptationSet") {
            let track = track_type(adaptation_set);
            for representation in adaptation_set.children_named("Representation") {
                nodes.push(RepresentationNode {
                    period_index,
                    period,
                    adaptation_set,
                    representation,
                    track,
                    bandwidth: parse_bandwidth(representation)?,
                });
            }
        }
    }
    Ok(nodes)
}

fn declared_base(element: &Element) -> Option<&str> {
    element
        .child("BaseURL")
        .map(Element::text)
        .filter(|text| !text.is_empty())
}

/// The most specific declared BaseURL, resolved against the MPD URL.
pub(crate) fn effective_base_url(
    root: &Element,
    node: &RepresentationNode<'_>,
    mpd_url: &Url,
) -> Result<Url, ManifestError> {
    let declared = declared_base(node.representation)
        .or_else(|| declared_base(node.adaptation_set))
        .or_else(|| declared_base(node.period))
        .or_else(|| declared_base(root));

    match declared {
        Some(base) => resolve_url(mpd_url, base),
        None => Ok(mpd_url.clone()),
    }
}

/// Lists video representations, highest bandwidth first.
pub fn parse_variants(xml: &str, mpd_url: &Url) -> Result<Vec<Representation>, ManifestError> {
    let root = parse_unprotected(xml)?;

    let mut variants = Vec::new();
    for node in representations(&root)?
        .iter()
        .filter(|n| n.track == TrackType::Video)
    {
        let rep = node.representation;
        let resolution = match (rep.attr("width"), rep.attr("height")) {
            (Some(w), Some(h)) => Some(format!("{w}x{h}").parse::<Resolution>()?),
            _ => None,
        };
        variants.push(Representation {
            id: node.id().to_string(),
            bandwidth: node.bandwidth,
            resolution,
            base_url: effective_base_url(&root, node, mpd_url)?,
        });
    }

    variants.sort_by(|a, b| b.bandwidth.cmp(&a.bandwidth));
    debug!(variants = variants.len(), "Parsed MPD representations");
    Ok(variants)
}
