//! Value types shared by the manifest parsers and the assembly engine.
//!
//! Everything here is plain data: parsers produce these types, the engine
//! consumes them, and nothing holds shared mutable state.

mod container;
mod error;
mod segment;

pub use container::{ContainerKind, is_fragment_uri};
pub use error::{ManifestError, UnsupportedReason};
pub use segment::{ResolvedMedia, SegmentSequence, resolve_url};

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Video resolution information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    #[inline]
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = ManifestError;

    /// Parses a `WIDTHxHEIGHT` label such as `1920x1080`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .trim()
            .split_once(['x', 'X'])
            .ok_or_else(|| ManifestError::parse_failed(format!("invalid resolution `{s}`")))?;
        let width = w
            .trim()
            .parse()
            .map_err(|_| ManifestError::parse_failed(format!("invalid resolution width `{s}`")))?;
        let height = h
            .trim()
            .parse()
            .map_err(|_| ManifestError::parse_failed(format!("invalid resolution height `{s}`")))?;
        Ok(Self { width, height })
    }
}
