use std::path::PathBuf;

use clap::{Parser, Subcommand};
use reel_engine::{DownloadKind, ProxyType, StreamKind};
use url::Url;

#[derive(Parser, Debug)]
#[command(
    name = "reel",
    version,
    about = "Download HLS and DASH streams as single media files",
    long_about = None
)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Configuration file (defaults to <config dir>/reel/config.toml)
    #[arg(long, global = true, env = "REEL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Proxy server URL
    #[arg(long, global = true)]
    pub proxy: Option<String>,

    /// Proxy type
    #[arg(long, global = true, value_enum)]
    pub proxy_type: Option<ProxyType>,

    /// Proxy username
    #[arg(long, global = true, requires = "proxy")]
    pub proxy_username: Option<String>,

    /// Proxy password
    #[arg(long, global = true, requires = "proxy_username")]
    pub proxy_password: Option<String>,

    /// Extra request header as `Name: value` (repeatable)
    #[arg(short = 'H', long = "header", global = true)]
    pub headers: Vec<String>,

    /// Per-request timeout in seconds
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    /// ffmpeg binary used for MP4 output
    #[arg(long, global = true, env = "FFMPEG_PATH")]
    pub ffmpeg: Option<PathBuf>,

    /// Accept invalid TLS certificates
    #[arg(long, global = true)]
    pub insecure: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List the variants offered by an HLS or DASH manifest
    Variants {
        /// Manifest URL
        url: Url,

        /// Page the stream was found on, sent as Referer
        #[arg(long)]
        referrer: Option<Url>,

        /// Manifest type, when the URL extension does not tell
        #[arg(long, value_enum)]
        stream: Option<StreamKind>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Download a stream into one file
    Download {
        /// Manifest URL
        url: Url,

        /// Output kind
        #[arg(short, long, value_enum, default_value_t = DownloadKind::Mp4)]
        format: DownloadKind,

        /// HLS variant URI or DASH representation id (default: highest bandwidth)
        #[arg(long)]
        variant: Option<String>,

        /// Re-encode to a smaller file
        #[arg(long)]
        compress: bool,

        /// Page the stream was found on, sent as Referer
        #[arg(long)]
        referrer: Option<Url>,

        /// Manifest type, when the URL extension does not tell
        #[arg(long, value_enum)]
        stream: Option<StreamKind>,

        /// Output directory
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Output file name
        #[arg(long)]
        filename: Option<String>,

        /// Print progress events as JSON lines
        #[arg(long)]
        json: bool,
    },
}

impl Commands {
    pub fn json(&self) -> bool {
        match self {
            Self::Variants { json, .. } | Self::Download { json, .. } => *json,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_download_defaults() {
        let args = Args::parse_from([
            "reel",
            "-H",
            "Cookie: a=b",
            "download",
            "https://cdn.test/master.m3u8",
            "--compress",
        ]);
        assert_eq!(args.headers, vec!["Cookie: a=b"]);
        match args.command {
            Commands::Download {
                format,
                compress,
                variant,
                ..
            } => {
                assert_eq!(format, DownloadKind::Mp4);
                assert!(compress);
                assert!(variant.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_variants_with_stream_override() {
        let args = Args::parse_from([
            "reel",
            "variants",
            "https://cdn.test/manifest",
            "--stream",
            "dash",
            "--json",
        ]);
        assert!(args.command.json());
        assert!(matches!(
            args.command,
            Commands::Variants {
                stream: Some(StreamKind::Dash),
                ..
            }
        ));
    }
}
