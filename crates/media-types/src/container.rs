use serde::{Deserialize, Serialize};
use url::Url;

/// Container format of an assembled byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerKind {
    /// Fragmented MP4 (an init segment followed by `moof`/`mdat` fragments).
    FragmentedMp4,
    /// MPEG-2 transport stream.
    MpegTransportStream,
}

impl ContainerKind {
    /// Infers the container from the shape of a segment source.
    ///
    /// An initialization segment always means fMP4; otherwise the first
    /// segment's extension decides.
    pub fn infer(has_init_segment: bool, first_segment: Option<&Url>) -> Self {
        if has_init_segment || first_segment.is_some_and(is_fragment_uri) {
            Self::FragmentedMp4
        } else {
            Self::MpegTransportStream
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::FragmentedMp4 => "mp4",
            Self::MpegTransportStream => "ts",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::FragmentedMp4 => "video/mp4",
            Self::MpegTransportStream => "video/mp2t",
        }
    }
}

impl std::fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FragmentedMp4 => f.write_str("fMP4"),
            Self::MpegTransportStream => f.write_str("MPEG-TS"),
        }
    }
}

/// Returns true when the URL path names an fMP4 media fragment (`.m4s`).
pub fn is_fragment_uri(url: &Url) -> bool {
    url.path().to_ascii_lowercase().ends_with(".m4s")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_fragment_detection_ignores_query_and_case() {
        assert!(is_fragment_uri(&url("https://cdn.test/v/seg1.m4s")));
        assert!(is_fragment_uri(&url("https://cdn.test/v/SEG1.M4S?token=abc")));
        assert!(!is_fragment_uri(&url("https://cdn.test/v/seg1.ts")));
        assert!(!is_fragment_uri(&url("https://cdn.test/v/seg1.m4s.ts")));
    }

    #[test]
    fn test_infer_container() {
        let ts = url("https://cdn.test/a.ts");
        let m4s = url("https://cdn.test/a.m4s");

        assert_eq!(ContainerKind::infer(true, Some(&ts)), ContainerKind::FragmentedMp4);
        assert_eq!(ContainerKind::infer(false, Some(&m4s)), ContainerKind::FragmentedMp4);
        assert_eq!(
            ContainerKind::infer(false, Some(&ts)),
            ContainerKind::MpegTransportStream
        );
        assert_eq!(ContainerKind::infer(false, None), ContainerKind::MpegTransportStream);
    }
}
