//! Operation catalog exposed to front ends.

use std::sync::Arc;

use dash::Representation;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::EngineError;
use crate::config::EngineConfig;
use crate::fetcher::{Fetcher, HttpFetcher};
use crate::job::{ArtifactSink, DownloadRequest, Job, JobController, JobId, JobRegistry};
use crate::resolver::{DashResolver, HlsResolver, VariantListing};
use crate::transcode::{FfmpegBackend, TranscodeBackend};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    ListHlsVariants {
        manifest_url: Url,
        #[serde(default)]
        referrer: Option<Url>,
    },
    ListDashVariants {
        mpd_url: Url,
        #[serde(default)]
        referrer: Option<Url>,
    },
    StartDownload(DownloadRequest),
    CancelJob {
        job_id: JobId,
    },
    QueryActiveJobs,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    HlsVariants(VariantListing),
    DashVariants { variants: Vec<Representation> },
    JobStarted { job_id: JobId },
    /// `found` is false when the job was unknown or already finished.
    CancelRequested { job_id: JobId, found: bool },
    ActiveJobs { jobs: Vec<Job> },
}

/// Entry point wiring the resolvers and job controller together.
#[derive(Clone)]
pub struct Engine {
    config: EngineConfig,
    hls: HlsResolver,
    dash: DashResolver,
    controller: JobController,
}

impl Engine {
    /// Builds an engine with the HTTP fetcher and the ffmpeg backend.
    pub fn new(config: EngineConfig, sink: Arc<dyn ArtifactSink>) -> Result<Self, EngineError> {
        config.validate()?;
        let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(config.http.clone())?);
        let backend: Arc<dyn TranscodeBackend> =
            Arc::new(FfmpegBackend::new(config.ffmpeg_path.clone()));
        Ok(Self::with_parts(config, fetcher, backend, sink))
    }

    pub fn with_parts(
        config: EngineConfig,
        fetcher: Arc<dyn Fetcher>,
        backend: Arc<dyn TranscodeBackend>,
        sink: Arc<dyn ArtifactSink>,
    ) -> Self {
        let controller = JobController::new(
            &config,
            Arc::new(JobRegistry::new()),
            fetcher.clone(),
            backend,
            sink,
        );
        Self {
            hls: HlsResolver::new(fetcher.clone(), config.max_manifest_hops),
            dash: DashResolver::new(fetcher),
            controller,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn controller(&self) -> &JobController {
        &self.controller
    }

    /// Dispatches one request. `token` only bounds the listing operations;
    /// started jobs are cancelled through `CancelJob`.
    pub async fn handle(
        &self,
        request: Request,
        token: &CancellationToken,
    ) -> Result<Response, EngineError> {
        debug!(?request, "Handling request");
        match request {
            Request::ListHlsVariants {
                manifest_url,
                referrer,
            } => {
                let listing = self
                    .hls
                    .list_variants(&manifest_url, referrer.as_ref(), token)
                    .await?;
                Ok(Response::HlsVariants(listing))
            }
            Request::ListDashVariants { mpd_url, referrer } => {
                let variants = self
                    .dash
                    .list_variants(&mpd_url, referrer.as_ref(), token)
                    .await?;
                Ok(Response::DashVariants { variants })
            }
            Request::StartDownload(download) => {
                let job_id = self.controller.start(download)?;
                Ok(Response::JobStarted { job_id })
            }
            Request::CancelJob { job_id } => {
                let found = self.controller.cancel(&job_id);
                Ok(Response::CancelRequested { job_id, found })
            }
            Request::QueryActiveJobs => Ok(Response::ActiveJobs {
                jobs: self.controller.active_jobs(),
            }),
        }
    }
}
