use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use reel_engine::ProxyType;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AppError, Result};

/// Settings read from `config.toml`. Command-line flags win over these.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub output_dir: Option<PathBuf>,
    pub user_agent: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub request_timeout_secs: Option<u64>,
    pub connect_timeout_secs: Option<u64>,
    pub segment_retries: Option<u32>,
    pub max_concurrent_jobs: Option<usize>,
    pub max_manifest_hops: Option<usize>,
    pub ffmpeg_path: Option<PathBuf>,
    pub proxy: Option<ProxyTable>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProxyTable {
    pub url: String,
    #[serde(default)]
    pub proxy_type: ProxyType,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl AppConfig {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("reel").join("config.toml"))
    }

    /// Loads `path`, or the default location when none is given.
    ///
    /// An explicit path must exist; a missing default file yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => match Self::default_path() {
                Some(path) => (path, false),
                None => return Ok(Self::default()),
            },
        };

        if !path.exists() {
            if explicit {
                return Err(AppError::Config(format!(
                    "config file {} does not exist",
                    path.display()
                )));
            }
            debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(&path)?;
        let config = Self::parse(&text)?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Configured output directory, else the user's download directory,
    /// else the current directory.
    pub fn output_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .or_else(dirs::download_dir)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let config = AppConfig::parse(
            r#"
            output_dir = "/tmp/videos"
            request_timeout_secs = 45
            max_concurrent_jobs = 2

            [headers]
            Cookie = "a=b"

            [proxy]
            url = "socks5://127.0.0.1:1080"
            proxy_type = "socks5"
            "#,
        )
        .unwrap();

        assert_eq!(config.output_dir(), PathBuf::from("/tmp/videos"));
        assert_eq!(config.request_timeout_secs, Some(45));
        assert_eq!(config.max_concurrent_jobs, Some(2));
        assert_eq!(config.headers.get("Cookie").map(String::as_str), Some("a=b"));
        let proxy = config.proxy.unwrap();
        assert_eq!(proxy.proxy_type, ProxyType::Socks5);
        assert!(proxy.username.is_none());
    }

    #[test]
    fn test_unknown_keys_rejected() {
        assert!(matches!(
            AppConfig::parse("outptu_dir = \"x\""),
            Err(AppError::ConfigParse(_))
        ));
    }

    #[test]
    fn test_load_paths() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        assert!(matches!(
            AppConfig::load(Some(&missing)),
            Err(AppError::Config(_))
        ));

        let path = dir.path().join("config.toml");
        std::fs::write(&path, "segment_retries = 5\n").unwrap();
        assert_eq!(AppConfig::load(Some(&path)).unwrap().segment_retries, Some(5));
    }
}
