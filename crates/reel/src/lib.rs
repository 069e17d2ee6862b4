//! Engine for turning HLS and DASH manifests into single downloadable files.
//!
//! The pipeline for one job is: resolve the manifest into ordered segment
//! sources, fetch and concatenate the segments, optionally remux through
//! ffmpeg, then hand the artifact to an [`ArtifactSink`].

pub mod api;
pub mod assembler;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod job;
pub mod proxy;
pub mod resolver;
pub mod stream;
pub mod transcode;

#[cfg(test)]
mod testing;

pub use api::{Engine, Request, Response};
pub use assembler::{AssembledTrack, Assembler, AssemblyProgress};
pub use config::{EngineConfig, HttpConfig};
pub use error::EngineError;
pub use fetcher::{FetchError, FetchPurpose, Fetcher, HttpFetcher};
pub use job::{
    Artifact, ArtifactSink, DownloadKind, DownloadRequest, FileSink, Job, JobController, JobEvent,
    JobId, JobKind, JobPhase, NotificationPhase,
};
pub use proxy::{ProxyAuth, ProxyConfig, ProxyType};
pub use resolver::{DashResolver, HlsResolver, VariantListing};
pub use stream::{StreamKind, StreamRecord};

pub use dash::Representation;
pub use hls::Variant;
pub use media_types::{ContainerKind, ManifestError, Resolution, UnsupportedReason};
