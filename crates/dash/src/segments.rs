use media_types::{
    ManifestError, ResolvedMedia, SegmentSequence, UnsupportedReason, resolve_url,
};
use serde::Serialize;
use tracing::{debug, warn};
use url::Url;

use crate::mpd::{
    RepresentationNode, TrackType, effective_base_url, parse_unprotected, representations,
};
use crate::xml::Element;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SourceKind {
    List,
    Template,
}

/// Ordered byte sources for one DASH representation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SegmentSource {
    pub kind: SourceKind,
    pub init_url: Option<Url>,
    pub segments: Vec<Url>,
}

impl SegmentSequence for SegmentSource {
    fn init_url(&self) -> Option<&Url> {
        self.init_url.as_ref()
    }

    fn segment_urls(&self) -> Vec<&Url> {
        self.segments.iter().collect()
    }
}

pub type DashMedia = ResolvedMedia<SegmentSource>;

const MAX_TIMELINE_SEGMENTS: u64 = 200_000;

/// Builds the video segment source, and audio from the same period when available.
///
/// `representation_id` selects a representation by id among all adaptation
/// sets; otherwise the highest-bandwidth video representation is used.
pub fn build_segment_source(
    xml: &str,
    mpd_url: &Url,
    representation_id: Option<&str>,
) -> Result<DashMedia, ManifestError> {
    let root = parse_unprotected(xml)?;
    let nodes = representations(&root)?;

    let explicit = representation_id
        .filter(|id| !id.is_empty())
        .and_then(|id| nodes.iter().find(|n| n.id() == id));
    let chosen = match explicit {
        Some(node) => node,
        None => best_of(&nodes, TrackType::Video).ok_or(ManifestError::NoVariantsFound)?,
    };

    let video = build_for(&root, chosen, mpd_url)?;
    debug!(
        representation = chosen.id(),
        segments = video.segments.len(),
        kind = ?video.kind,
        "Built video segment source"
    );

    let same_period: Vec<RepresentationNode<'_>> = nodes
        .iter()
        .filter(|n| {
            n.period_index == chosen.period_index
                && !std::ptr::eq(n.representation, chosen.representation)
        })
        .copied()
        .collect();

    let audio = match best_of(&same_period, TrackType::Audio) {
        Some(node) => match build_for(&root, node, mpd_url) {
            Ok(source) => Some(source),
            Err(e) => {
                warn!(representation = node.id(), error = %e, "Audio track unusable, continuing video-only");
                None
            }
        },
        None => None,
    };

    Ok(ResolvedMedia { video, audio })
}

/// First representation with the strictly highest bandwidth for the given track type.
fn best_of<'n, 'a>(
    nodes: &'n [RepresentationNode<'a>],
    track: TrackType,
) -> Option<&'n RepresentationNode<'a>> {
    nodes
        .iter()
        .filter(|n| n.track == track)
        .reduce(|best, n| if n.bandwidth > best.bandwidth { n } else { best })
}

/// Segment addressing inherited from Representation, then AdaptationSet, then Period.
fn inherited<'a>(node: &RepresentationNode<'a>, name: &str) -> Option<&'a Element> {
    node.representation
        .child(name)
        .or_else(|| node.adaptation_set.child(name))
        .or_else(|| node.period.child(name))
}

fn build_for(
    root: &Element,
    node: &RepresentationNode<'_>,
    mpd_url: &Url,
) -> Result<SegmentSource, ManifestError> {
    let base = effective_base_url(root, node, mpd_url)?;

    if let Some(list) = inherited(node, "SegmentList")
        && let Some(source) = from_segment_list(list, &base)?
    {
        return Ok(source);
    }

    match inherited(node, "SegmentTemplate") {
        Some(template) => from_segment_template(template, node, &base),
        None => Err(ManifestError::unsupported(UnsupportedReason::Pattern)),
    }
}

fn from_segment_list(list: &Element, base: &Url) -> Result<Option<SegmentSource>, ManifestError> {
    let segments = list
        .children_named("SegmentURL")
        .filter_map(|s| s.attr("media"))
        .map(|media| resolve_url(base, media))
        .collect::<Result<Vec<_>, _>>()?;
    if segments.is_empty() {
        return Ok(None);
    }

    let init_url = list
        .child("Initialization")
        .and_then(|i| i.attr("sourceURL"))
        .map(|src| resolve_url(base, src))
        .transpose()?;

    Ok(Some(SegmentSource {
        kind: SourceKind::List,
        init_url,
        segments,
    }))
}

fn parse_number(element: &Element, attr: &str, default: u64) -> Result<u64, ManifestError> {
    match element.attr(attr) {
        Some(raw) => raw.trim().parse().map_err(|_| {
            ManifestError::parse_failed(format!("invalid {}@{attr} `{raw}`", element.name))
        }),
        None => Ok(default),
    }
}

fn from_segment_template(
    template: &Element,
    node: &RepresentationNode<'_>,
    base: &Url,
) -> Result<SegmentSource, ManifestError> {
    let media = template
        .attr("media")
        .ok_or(ManifestError::unsupported(UnsupportedReason::Pattern))?;
    let timeline = template
        .child("SegmentTimeline")
        .ok_or(ManifestError::unsupported(UnsupportedReason::NoTimeline))?;

    let start_number = parse_number(template, "startNumber", 1)?;
    let id = node.id();

    // `None` once a counter has run past u64::MAX
    let mut segments = Vec::new();
    let mut number = Some(start_number);
    let mut time = Some(0u64);
    for entry in timeline.children_named("S") {
        if entry.attr("t").is_some() {
            time = Some(parse_number(entry, "t", 0)?);
        }
        let duration = parse_number(entry, "d", 0)?;
        let repeat: i64 = match entry.attr("r") {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| ManifestError::parse_failed(format!("invalid S@r `{raw}`")))?,
            None => 0,
        };
        // a negative repeat runs to the end of the period; count it once
        let count = repeat.max(0) as u64 + 1;
        if segments.len() as u64 + count > MAX_TIMELINE_SEGMENTS {
            return Err(ManifestError::parse_failed(format!(
                "segment timeline exceeds {MAX_TIMELINE_SEGMENTS} segments"
            )));
        }

        for _ in 0..count {
            let (Some(n), Some(t)) = (number, time) else {
                return Err(ManifestError::parse_failed(
                    "segment timeline overflows $Number$ or $Time$",
                ));
            };
            let vars = TemplateVars {
                representation_id: id,
                number: n,
                bandwidth: node.bandwidth,
                time: t,
            };
            segments.push(resolve_url(base, &expand_template(media, &vars))?);
            number = n.checked_add(1);
            time = t.checked_add(duration);
        }
    }

    if segments.is_empty() {
        return Err(ManifestError::unsupported(UnsupportedReason::Pattern));
    }

    let init_url = template
        .attr("initialization")
        .map(|init| {
            let vars = TemplateVars {
                representation_id: id,
                number: start_number,
                bandwidth: node.bandwidth,
                time: 0,
            };
            resolve_url(base, &expand_template(init, &vars))
        })
        .transpose()?;

    Ok(SegmentSource {
        kind: SourceKind::Template,
        init_url,
        segments,
    })
}

struct TemplateVars<'a> {
    representation_id: &'a str,
    number: u64,
    bandwidth: u64,
    time: u64,
}

/// Substitutes `$RepresentationID$`, `$Number$`, `$Bandwidth$` and `$Time$`.
///
/// Numeric identifiers accept a `%0Nd` width suffix, `$$` is a literal `$`,
/// and unknown identifiers are copied through unchanged.
fn expand_template(template: &str, vars: &TemplateVars<'_>) -> String {
    let mut out = String::with_capacity(template.len() + 16);
    let mut rest = template;

    while let Some(start) = rest.find('$') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let Some(end) = after.find('$') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let ident = &after[..end];
        rest = &after[end + 1..];

        if ident.is_empty() {
            out.push('$');
            continue;
        }

        let (name, format) = match ident.split_once('%') {
            Some((name, format)) => (name, Some(format)),
            None => (ident, None),
        };
        let value = match name {
            "RepresentationID" => {
                out.push_str(vars.representation_id);
                continue;
            }
            "Number" => vars.number,
            "Bandwidth" => vars.bandwidth,
            "Time" => vars.time,
            _ => {
                out.push('$');
                out.push_str(ident);
                out.push('$');
                continue;
            }
        };

        let width = format
            .and_then(|f| f.strip_suffix('d'))
            .and_then(|w| w.trim_start_matches('0').parse::<usize>().ok())
            .unwrap_or(0);
        out.push_str(&format!("{value:0width$}"));
    }

    out.push_str(rest);
    out
}
