use reel_engine::{JobEvent, Representation, Resolution, Response, Variant};

use crate::error::{AppError, Result};

/// Renders engine responses for the terminal.
pub struct OutputManager {
    json: bool,
}

impl OutputManager {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    pub fn is_json(&self) -> bool {
        self.json
    }

    pub fn format_response(&self, response: &Response) -> Result<String> {
        if self.json {
            return Ok(serde_json::to_string_pretty(response)?);
        }
        match response {
            Response::HlsVariants(listing) if !listing.is_master => {
                Ok("Media playlist: no variants to choose from.\n".to_string())
            }
            Response::HlsVariants(listing) => Ok(format_hls_variants(&listing.variants)),
            Response::DashVariants { variants } => Ok(format_dash_variants(variants)),
            other => Err(AppError::InvalidInput(format!(
                "no text rendering for {other:?}"
            ))),
        }
    }

    pub fn format_event(&self, event: &JobEvent) -> Result<String> {
        Ok(serde_json::to_string(event)?)
    }
}

fn kbps(bandwidth: u64) -> String {
    format!("{} kbps", bandwidth / 1000)
}

fn resolution_label(resolution: Option<Resolution>) -> String {
    resolution.map_or_else(|| "-".to_string(), |r| r.to_string())
}

fn format_hls_variants(variants: &[Variant]) -> String {
    let mut output = String::from("HLS variants (best first):\n");
    for (idx, variant) in variants.iter().enumerate() {
        output.push_str(&format!(
            "  [{idx}] {:>10}  {:<10}  {}\n",
            kbps(variant.bandwidth),
            resolution_label(variant.resolution),
            variant.uri
        ));
        if let Some(name) = &variant.name {
            output.push_str(&format!("       name: {name}\n"));
        }
        if let Some(audio) = &variant.audio_uri {
            output.push_str(&format!("       audio: {audio}\n"));
        }
    }
    output
}

fn format_dash_variants(variants: &[Representation]) -> String {
    let mut output = String::from("DASH representations (best first):\n");
    for variant in variants {
        output.push_str(&format!(
            "  {:<12} {:>10}  {}\n",
            variant.id,
            kbps(variant.bandwidth),
            resolution_label(variant.resolution)
        ));
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn variant(uri: &str, bandwidth: u64) -> Variant {
        Variant {
            uri: Url::parse(uri).unwrap(),
            bandwidth,
            resolution: Some(Resolution::new(1280, 720)),
            name: None,
            audio_group: None,
            audio_uri: None,
        }
    }

    #[test]
    fn test_text_listing() {
        let text = format_hls_variants(&[variant("https://cdn.test/hi.m3u8", 2_500_000)]);
        assert!(text.contains("2500 kbps"));
        assert!(text.contains("1280x720"));
        assert!(text.contains("https://cdn.test/hi.m3u8"));
    }

    #[test]
    fn test_dash_listing_marks_unknown_resolution() {
        let rep = |id: &str, resolution| Representation {
            id: id.to_string(),
            bandwidth: 800_000,
            resolution,
            base_url: Url::parse("https://cdn.test/v/").unwrap(),
        };
        let text = format_dash_variants(&[
            rep("v-hd", Some(Resolution::new(1920, 1080))),
            rep("v-any", None),
        ]);
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[1].contains("v-hd") && lines[1].ends_with("1920x1080"));
        assert!(lines[2].contains("v-any") && lines[2].ends_with('-'));
    }

    #[test]
    fn test_json_listing() {
        let output = OutputManager::new(true);
        let text = output
            .format_response(&Response::DashVariants {
                variants: Vec::new(),
            })
            .unwrap();
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["type"], "dash_variants");
    }
}
