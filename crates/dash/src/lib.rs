//! MPEG-DASH manifest handling.
//!
//! Turns an MPD document into a list of selectable video representations and
//! expands the chosen one (plus the best audio track in the same period) into
//! ordered segment URLs. DRM-protected manifests are refused outright.

mod mpd;
mod segments;
mod xml;

pub use mpd::{Representation, parse_variants};
pub use segments::{DashMedia, SegmentSource, SourceKind, build_segment_source};
pub use xml::{Element, parse_document};

pub use media_types::{ManifestError, UnsupportedReason};
