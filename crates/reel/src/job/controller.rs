//! Job state machine: resolve, assemble, optionally remux, deliver.
//!
//! `Pending -> Downloading -> (Converting)? -> {Done, Canceled, Error}`.
//! Each job runs on its own task and holds one slot of the concurrency
//! semaphore while past `Pending`. The registry is the only shared state.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use futures::{Stream, StreamExt};
use media_types::{ContainerKind, ResolvedMedia, SegmentSequence, resolve_url};
use serde::{Deserialize, Serialize};
use tokio::sync::{Semaphore, broadcast};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use super::model::{Job, JobEvent, JobId, JobKind, JobMetadata, JobPhase};
use super::registry::JobRegistry;
use super::sink::{Artifact, ArtifactSink};
use crate::EngineError;
use crate::assembler::{AssembledTrack, Assembler};
use crate::config::EngineConfig;
use crate::fetcher::Fetcher;
use crate::resolver::{DashResolver, HlsResolver};
use crate::stream::StreamKind;
use crate::transcode::{TranscodeBackend, TranscodeEngine, remux_to_mp4};

/// Output requested by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum DownloadKind {
    /// Concatenated segments as served.
    #[default]
    Raw,
    /// Remuxed into a single MP4.
    Mp4,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRequest {
    #[serde(default)]
    pub kind: DownloadKind,
    pub url: Url,
    #[serde(default)]
    pub filename_hint: Option<String>,
    /// HLS variant URI (relative to `url` or absolute) or DASH representation id.
    #[serde(default)]
    pub variant: Option<String>,
    #[serde(default)]
    pub compress: bool,
    #[serde(default)]
    pub referrer: Option<Url>,
    /// Overrides detection from the URL extension.
    #[serde(default)]
    pub stream: Option<StreamKind>,
}

impl DownloadRequest {
    pub fn new(kind: DownloadKind, url: Url) -> Self {
        Self {
            kind,
            url,
            filename_hint: None,
            variant: None,
            compress: false,
            referrer: None,
            stream: None,
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename_hint = Some(filename.into());
        self
    }

    pub fn with_variant(mut self, variant: impl Into<String>) -> Self {
        self.variant = Some(variant.into());
        self
    }

    pub fn with_compress(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    pub fn with_referrer(mut self, referrer: Option<Url>) -> Self {
        self.referrer = referrer;
        self
    }

    pub fn with_stream(mut self, stream: StreamKind) -> Self {
        self.stream = Some(stream);
        self
    }
}

/// Everything a job task needs, fixed at submission time.
#[derive(Debug, Clone)]
struct JobPlan {
    kind: JobKind,
    stream: StreamKind,
    url: Url,
    variant: Option<String>,
    referrer: Option<Url>,
    compress: bool,
    filename_hint: Option<String>,
}

/// Suggested artifact name: the caller's hint (given an extension when it
/// has none) or `video.<ext>`.
fn artifact_filename(hint: Option<&str>, extension: &str) -> String {
    match hint.map(str::trim).filter(|h| !h.is_empty()) {
        Some(hint) if Path::new(hint).extension().is_some() => hint.to_string(),
        Some(hint) => format!("{hint}.{extension}"),
        None => format!("video.{extension}"),
    }
}

struct Inner {
    registry: Arc<JobRegistry>,
    hls: HlsResolver,
    dash: DashResolver,
    assembler: Assembler,
    backend: Arc<dyn TranscodeBackend>,
    sink: Arc<dyn ArtifactSink>,
    slots: Arc<Semaphore>,
    events: broadcast::Sender<JobEvent>,
    tokens: DashMap<JobId, CancellationToken>,
    engines: DashMap<JobId, Arc<dyn TranscodeEngine>>,
    grace_period: Duration,
}

/// Owns every job from submission until it is purged.
#[derive(Clone)]
pub struct JobController {
    inner: Arc<Inner>,
}

impl JobController {
    pub fn new(
        config: &EngineConfig,
        registry: Arc<JobRegistry>,
        fetcher: Arc<dyn Fetcher>,
        backend: Arc<dyn TranscodeBackend>,
        sink: Arc<dyn ArtifactSink>,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                registry,
                hls: HlsResolver::new(fetcher.clone(), config.max_manifest_hops),
                dash: DashResolver::new(fetcher.clone()),
                assembler: Assembler::new(fetcher),
                backend,
                sink,
                slots: Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1))),
                events,
                tokens: DashMap::new(),
                engines: DashMap::new(),
                grace_period: config.terminal_grace_period,
            }),
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.inner.registry
    }

    /// Accepts a request and returns its job id without waiting for the job.
    pub fn start(&self, request: DownloadRequest) -> Result<JobId, EngineError> {
        let stream = request
            .stream
            .or_else(|| StreamKind::detect(&request.url))
            .ok_or_else(|| {
                EngineError::invalid_request(format!(
                    "cannot tell whether {} is an HLS or DASH manifest",
                    request.url
                ))
            })?;

        let kind = match (request.kind, stream) {
            (_, StreamKind::Direct) => {
                return Err(EngineError::invalid_request(format!(
                    "{} is a direct media file, not a manifest",
                    request.url
                )));
            }
            (DownloadKind::Raw, _) => JobKind::RawSegmentDownload,
            (DownloadKind::Mp4, StreamKind::Hls) => JobKind::HlsToMp4,
            (DownloadKind::Mp4, StreamKind::Dash) => JobKind::DashToMp4,
        };

        let variant = request
            .variant
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        if stream == StreamKind::Hls
            && let Some(variant) = &variant
        {
            resolve_url(&request.url, variant)?;
        }

        let extension = if kind.is_conversion() { "mp4" } else { "ts" };
        let filename = artifact_filename(request.filename_hint.as_deref(), extension);
        let job = Job::new(
            kind,
            JobMetadata {
                url: request.url.clone(),
                filename,
                compress: request.compress,
                variant: variant.clone(),
            },
        );
        let id = job.id;

        let plan = JobPlan {
            kind,
            stream,
            url: request.url,
            variant,
            referrer: request.referrer,
            compress: request.compress,
            filename_hint: request.filename_hint,
        };

        let token = CancellationToken::new();
        self.inner.tokens.insert(id, token.clone());
        self.inner.registry.insert(job);
        info!(job_id = %id, %kind, url = %plan.url, "Job accepted");

        let inner = self.inner.clone();
        tokio::spawn(async move {
            let outcome = inner.execute(id, &plan, &token).await;
            inner.finish(id, outcome, &token);
            inner.tokens.remove(&id);
            inner.engines.remove(&id);

            tokio::time::sleep(inner.grace_period).await;
            if inner.registry.remove(&id).is_some() {
                debug!(job_id = %id, "Purged terminal job");
            }
        });

        Ok(id)
    }

    /// Signals cancellation. Returns `false` when the job is unknown or
    /// already terminal.
    pub fn cancel(&self, id: &JobId) -> bool {
        let Some(token) = self.inner.tokens.get(id).map(|t| t.value().clone()) else {
            return false;
        };
        token.cancel();
        info!(job_id = %id, "Cancellation requested");

        let engine = self.inner.engines.get(id).map(|e| e.value().clone());
        if let Some(engine) = engine {
            tokio::spawn(async move { engine.terminate().await });
        }
        true
    }

    /// Every job still in the registry, including terminal ones within
    /// their grace period.
    pub fn active_jobs(&self) -> Vec<Job> {
        self.inner.registry.list()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.inner.events.subscribe()
    }

    /// Events for one job, ending after its terminal event.
    ///
    /// A job that is already terminal yields its outcome once; an unknown
    /// job yields nothing.
    pub fn subscribe_job(&self, id: JobId) -> impl Stream<Item = JobEvent> + Send + 'static {
        enum Follow {
            Replay(JobEvent),
            Live(BroadcastStream<JobEvent>),
            Finished,
        }

        let receiver = self.inner.events.subscribe();
        let initial = match self.inner.registry.get(&id) {
            None => Follow::Finished,
            Some(job) => match job.phase.notification() {
                Some(phase) if phase.is_terminal() => Follow::Replay(JobEvent {
                    job_id: id,
                    phase,
                    progress: job.progress,
                    message: job.message,
                }),
                _ => Follow::Live(BroadcastStream::new(receiver)),
            },
        };

        futures::stream::unfold(initial, move |state| async move {
            match state {
                Follow::Finished => None,
                Follow::Replay(event) => Some((event, Follow::Finished)),
                Follow::Live(mut events) => loop {
                    match events.next().await {
                        None => return None,
                        Some(Ok(event)) if event.job_id == id => {
                            let next = if event.phase.is_terminal() {
                                Follow::Finished
                            } else {
                                Follow::Live(events)
                            };
                            return Some((event, next));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                            warn!(job_id = %id, skipped, "Job event subscriber lagged");
                        }
                    }
                },
            }
        })
    }
}

impl Inner {
    #[instrument(skip_all, fields(job_id = %id))]
    async fn execute(
        self: &Arc<Self>,
        id: JobId,
        plan: &JobPlan,
        token: &CancellationToken,
    ) -> Result<String, EngineError> {
        let _permit = tokio::select! {
            _ = token.cancelled() => return Err(EngineError::Cancelled),
            permit = self.slots.clone().acquire_owned() => permit
                .map_err(|_| EngineError::configuration("job slots closed"))?,
        };

        self.transition(id, JobPhase::Downloading);
        let (video, audio) = self.download(id, plan, token).await?;

        let (bytes, filename, mime_type) = if plan.kind.is_conversion() {
            self.transition(id, JobPhase::Converting);
            let bytes = self.convert(id, plan, &video, audio.as_ref(), token).await?;
            let filename = artifact_filename(plan.filename_hint.as_deref(), "mp4");
            (bytes, filename, ContainerKind::FragmentedMp4.mime_type())
        } else {
            let filename =
                artifact_filename(plan.filename_hint.as_deref(), video.container.extension());
            (video.bytes, filename, video.container.mime_type())
        };

        if token.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        self.registry
            .update(&id, |job| job.metadata.filename = filename.clone());
        self.sink
            .deliver(Artifact {
                job_id: id,
                filename,
                bytes,
                mime_type,
            })
            .await
    }

    async fn download(
        self: &Arc<Self>,
        id: JobId,
        plan: &JobPlan,
        token: &CancellationToken,
    ) -> Result<(AssembledTrack, Option<AssembledTrack>), EngineError> {
        let referrer = plan.referrer.as_ref();
        let with_audio = plan.kind.is_conversion();

        match plan.stream {
            StreamKind::Hls => {
                let explicit = plan
                    .variant
                    .as_deref()
                    .map(|v| resolve_url(&plan.url, v))
                    .transpose()?;
                let media = if with_audio {
                    self.hls
                        .expand_to_media_with_audio(&plan.url, explicit.as_ref(), referrer, token)
                        .await?
                } else {
                    let resolved = self
                        .hls
                        .expand_to_media(&plan.url, explicit.as_ref(), referrer, token)
                        .await?;
                    ResolvedMedia::video_only(resolved.playlist)
                };
                self.assemble_media(id, &media, referrer, token).await
            }
            StreamKind::Dash => {
                let mut media = self
                    .dash
                    .build(&plan.url, plan.variant.as_deref(), referrer, token)
                    .await?;
                if !with_audio {
                    media.audio = None;
                }
                self.assemble_media(id, &media, referrer, token).await
            }
            StreamKind::Direct => Err(EngineError::invalid_request(format!(
                "{} is a direct media file, not a manifest",
                plan.url
            ))),
        }
    }

    /// Assembles video then audio, reporting progress over both tracks.
    async fn assemble_media<S>(
        self: &Arc<Self>,
        id: JobId,
        media: &ResolvedMedia<S>,
        referrer: Option<&Url>,
        token: &CancellationToken,
    ) -> Result<(AssembledTrack, Option<AssembledTrack>), EngineError>
    where
        S: SegmentSequence + Sync,
    {
        let video_fetches = media.video.fetch_count();
        let total = video_fetches + media.audio.as_ref().map_or(0, |a| a.fetch_count());
        let fraction = |done: usize| done as f64 / total.max(1) as f64;

        let video = self
            .assembler
            .assemble(&media.video, referrer, token, |p| {
                self.report(id, JobPhase::Downloading, fraction(p.completed))
            })
            .await?;

        let audio = match &media.audio {
            Some(source) => Some(
                self.assembler
                    .assemble(source, referrer, token, |p| {
                        self.report(id, JobPhase::Downloading, fraction(video_fetches + p.completed))
                    })
                    .await?,
            ),
            None => None,
        };

        Ok((video, audio))
    }

    async fn convert(
        self: &Arc<Self>,
        id: JobId,
        plan: &JobPlan,
        video: &AssembledTrack,
        audio: Option<&AssembledTrack>,
        token: &CancellationToken,
    ) -> Result<bytes::Bytes, EngineError> {
        let engine = self.backend.open().await?;
        self.engines.insert(id, engine.clone());

        let result = if token.is_cancelled() {
            Err(EngineError::Cancelled)
        } else {
            let reporter = self.clone();
            let _subscription = engine.subscribe_progress(Box::new(move |fraction| {
                reporter.report(id, JobPhase::Converting, fraction)
            }));
            remux_to_mp4(engine.as_ref(), video, audio, plan.compress, token).await
        };

        self.engines.remove(&id);
        engine.terminate().await;
        result
    }

    fn transition(&self, id: JobId, phase: JobPhase) {
        info!(job_id = %id, %phase, "Job phase changed");
        self.report(id, phase, 0.0);
    }

    fn report(&self, id: JobId, phase: JobPhase, progress: f64) {
        let progress = progress.clamp(0.0, 1.0);
        let updated = self.registry.update(&id, |job| {
            job.phase = phase;
            job.progress = progress;
        });
        if updated.is_none() {
            return;
        }
        if let Some(phase) = phase.notification() {
            let _ = self.events.send(JobEvent {
                job_id: id,
                phase,
                progress,
                message: None,
            });
        }
    }

    fn finish(&self, id: JobId, outcome: Result<String, EngineError>, token: &CancellationToken) {
        let (phase, message) = match outcome {
            Ok(location) => {
                info!(job_id = %id, %location, "Job done");
                (JobPhase::Done, Some(location))
            }
            Err(e) if token.is_cancelled() || e.is_cancelled() => {
                info!(job_id = %id, "Job canceled");
                (JobPhase::Canceled, None)
            }
            Err(e) => {
                error!(job_id = %id, error = %e, "Job failed");
                (JobPhase::Error, Some(e.to_string()))
            }
        };

        let Some(job) = self.registry.update(&id, |job| {
            job.phase = phase;
            if phase == JobPhase::Done {
                job.progress = 1.0;
            }
            job.finished_at = Some(Utc::now());
            job.message = message.clone();
        }) else {
            return;
        };

        if let Some(phase) = phase.notification() {
            let _ = self.events.send(JobEvent {
                job_id: id,
                phase,
                progress: job.progress,
                message,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::model::NotificationPhase;
    use crate::testing::{FakeBackend, FakeEngine, FakeFetcher, MemorySink, url};
    use reqwest::StatusCode;

    const MASTER: &str = "#EXTM3U
#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"aud\",NAME=\"main\",DEFAULT=YES,URI=\"audio/index.m3u8\"
#EXT-X-STREAM-INF:BANDWIDTH=800000,AUDIO=\"aud\"
low/index.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=2400000,AUDIO=\"aud\"
high/index.m3u8
";

    struct Harness {
        controller: JobController,
        fetcher: Arc<FakeFetcher>,
        engine: Arc<FakeEngine>,
        sink: Arc<MemorySink>,
    }

    fn harness_with(config: EngineConfig, engine: Arc<FakeEngine>) -> Harness {
        let fetcher = FakeFetcher::new();
        fetcher
            .body("https://cdn.test/master.m3u8", MASTER)
            .body(
                "https://cdn.test/high/index.m3u8",
                "#EXTM3U\n#EXTINF:4,\nv0.ts\n#EXTINF:4,\nv1.ts\n#EXT-X-ENDLIST\n",
            )
            .body(
                "https://cdn.test/audio/index.m3u8",
                "#EXTM3U\n#EXTINF:4,\na0.ts\n#EXT-X-ENDLIST\n",
            )
            .body("https://cdn.test/high/v0.ts", "V0")
            .body("https://cdn.test/high/v1.ts", "V1")
            .body("https://cdn.test/audio/a0.ts", "A0");
        let sink = MemorySink::new();
        let controller = JobController::new(
            &config,
            Arc::new(JobRegistry::new()),
            fetcher.clone(),
            Arc::new(FakeBackend {
                engine: engine.clone(),
            }),
            sink.clone(),
        );
        Harness {
            controller,
            fetcher,
            engine,
            sink,
        }
    }

    fn harness() -> Harness {
        harness_with(EngineConfig::default(), FakeEngine::new(vec![true]))
    }

    async fn events_of(controller: &JobController, id: JobId) -> Vec<JobEvent> {
        tokio::time::timeout(
            Duration::from_secs(10),
            controller.subscribe_job(id).collect::<Vec<_>>(),
        )
        .await
        .unwrap()
    }

    async fn wait_for_phase(controller: &JobController, id: JobId, phase: JobPhase) {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                if controller.registry().get(&id).map(|j| j.phase) == Some(phase) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[test]
    fn test_artifact_filename() {
        assert_eq!(artifact_filename(None, "ts"), "video.ts");
        assert_eq!(artifact_filename(Some("  "), "mp4"), "video.mp4");
        assert_eq!(artifact_filename(Some("clip"), "mp4"), "clip.mp4");
        assert_eq!(artifact_filename(Some("clip.mkv"), "mp4"), "clip.mkv");
    }

    #[tokio::test]
    async fn test_raw_download_reaches_done() {
        let h = harness();
        let id = h
            .controller
            .start(DownloadRequest::new(
                DownloadKind::Raw,
                url("https://cdn.test/master.m3u8"),
            ))
            .unwrap();

        let events = events_of(&h.controller, id).await;
        let last = events.last().unwrap();
        assert_eq!(last.phase, NotificationPhase::Done);
        assert_eq!(last.progress, 1.0);
        assert!(events[..events.len() - 1]
            .iter()
            .all(|e| e.phase == NotificationPhase::Download));

        let delivered = h.sink.delivered.lock();
        assert_eq!(delivered.len(), 1);
        assert_eq!(&delivered[0].bytes[..], b"V0V1");
        assert_eq!(delivered[0].filename, "video.ts");
        assert_eq!(delivered[0].mime_type, "video/mp2t");
        drop(delivered);

        // raw downloads never touch audio or the engine
        assert!(!h.fetcher.requested().iter().any(|u| u.contains("audio")));
        assert!(h.engine.runs.lock().is_empty());

        let job = h.controller.registry().get(&id).unwrap();
        assert_eq!(job.phase, JobPhase::Done);
        assert_eq!(job.message.as_deref(), Some("memory://video.ts"));
    }

    #[tokio::test]
    async fn test_conversion_with_audio() {
        let h = harness();
        let page = url("https://site.test/watch");
        let id = h
            .controller
            .start(
                DownloadRequest::new(DownloadKind::Mp4, url("https://cdn.test/master.m3u8"))
                    .with_filename("talk")
                    .with_referrer(Some(page)),
            )
            .unwrap();

        let events = events_of(&h.controller, id).await;
        let phases: Vec<NotificationPhase> = events.iter().map(|e| e.phase).collect();
        assert!(phases.contains(&NotificationPhase::Download));
        assert!(phases.contains(&NotificationPhase::Convert));
        assert_eq!(phases.last(), Some(&NotificationPhase::Done));

        // download progress covers both tracks: 2 video + 1 audio fetches
        let download: Vec<f64> = events
            .iter()
            .filter(|e| e.phase == NotificationPhase::Download && e.progress > 0.0)
            .map(|e| e.progress)
            .collect();
        assert_eq!(download.len(), 3);
        assert!((download[0] - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(download[2], 1.0);

        let runs = h.engine.runs.lock();
        assert!(runs[0].join(" ").contains("-i v.ts -fflags +genpts -i a.ts"));
        drop(runs);
        // engine files are removed and the session discarded afterwards
        assert_eq!(h.engine.input("v.ts"), None);
        assert!(h.engine.deleted.lock().contains(&"a.ts".to_string()));
        assert!(*h.engine.terminated.lock());

        let delivered = h.sink.delivered.lock();
        assert_eq!(&delivered[0].bytes[..], b"A0V0V1");
        assert_eq!(delivered[0].filename, "talk.mp4");
        assert_eq!(delivered[0].mime_type, "video/mp4");
        assert!(
            h.fetcher
                .referrers()
                .iter()
                .all(|r| r.as_deref() == Some("https://site.test/watch"))
        );
    }

    #[tokio::test]
    async fn test_cancel_during_download_is_canceled_not_error() {
        let h = harness();
        h.fetcher
            .delay("https://cdn.test/high/v1.ts", Duration::from_secs(30));
        let id = h
            .controller
            .start(DownloadRequest::new(
                DownloadKind::Raw,
                url("https://cdn.test/master.m3u8"),
            ))
            .unwrap();

        wait_for_phase(&h.controller, id, JobPhase::Downloading).await;
        let events = h.controller.subscribe_job(id);
        assert!(h.controller.cancel(&id));

        let events: Vec<JobEvent> = tokio::time::timeout(Duration::from_secs(10), events.collect())
            .await
            .unwrap();
        assert_eq!(events.last().unwrap().phase, NotificationPhase::Canceled);
        assert!(!events.iter().any(|e| e.phase == NotificationPhase::Error));
        assert!(h.sink.delivered.lock().is_empty());
        assert!(!h.controller.cancel(&id));
    }

    #[tokio::test]
    async fn test_cancel_during_conversion_terminates_engine() {
        let h = harness_with(
            EngineConfig::default(),
            FakeEngine::slow(vec![true], Duration::from_secs(30)),
        );
        let id = h
            .controller
            .start(DownloadRequest::new(
                DownloadKind::Mp4,
                url("https://cdn.test/master.m3u8"),
            ))
            .unwrap();

        wait_for_phase(&h.controller, id, JobPhase::Converting).await;
        let events = h.controller.subscribe_job(id);
        h.controller.cancel(&id);

        let events: Vec<JobEvent> = tokio::time::timeout(Duration::from_secs(10), events.collect())
            .await
            .unwrap();
        assert_eq!(events.last().unwrap().phase, NotificationPhase::Canceled);
        assert!(*h.engine.terminated.lock());
        assert!(h.sink.delivered.lock().is_empty());
    }

    #[tokio::test]
    async fn test_failure_is_isolated_to_its_job() {
        let h = harness();
        h.fetcher
            .body("https://cdn.test/broken.m3u8", "#EXTM3U\n#EXTINF:4,\nmissing.ts\n")
            .status("https://cdn.test/missing.ts", StatusCode::FORBIDDEN);

        let broken = h
            .controller
            .start(DownloadRequest::new(
                DownloadKind::Raw,
                url("https://cdn.test/broken.m3u8"),
            ))
            .unwrap();
        let healthy = h
            .controller
            .start(DownloadRequest::new(
                DownloadKind::Raw,
                url("https://cdn.test/master.m3u8"),
            ))
            .unwrap();

        let failed = events_of(&h.controller, broken).await;
        let last = failed.last().unwrap();
        assert_eq!(last.phase, NotificationPhase::Error);
        assert!(last.message.as_deref().unwrap().contains("missing.ts"));

        let ok = events_of(&h.controller, healthy).await;
        assert_eq!(ok.last().unwrap().phase, NotificationPhase::Done);
        assert_eq!(h.controller.active_jobs().len(), 2);
    }

    #[tokio::test]
    async fn test_jobs_over_the_cap_stay_pending() {
        let h = harness_with(
            EngineConfig::default().with_max_concurrent_jobs(1),
            FakeEngine::new(vec![true]),
        );
        h.fetcher
            .delay("https://cdn.test/high/v0.ts", Duration::from_secs(30));
        let request = DownloadRequest::new(DownloadKind::Raw, url("https://cdn.test/master.m3u8"));

        let first = h.controller.start(request.clone()).unwrap();
        wait_for_phase(&h.controller, first, JobPhase::Downloading).await;
        let second = h.controller.start(request).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            h.controller.registry().get(&second).unwrap().phase,
            JobPhase::Pending
        );

        let queued = h.controller.subscribe_job(second);
        assert!(h.controller.cancel(&second));
        let events: Vec<JobEvent> = tokio::time::timeout(Duration::from_secs(10), queued.collect())
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].phase, NotificationPhase::Canceled);

        h.controller.cancel(&first);
        let events = events_of(&h.controller, first).await;
        assert_eq!(events.last().unwrap().phase, NotificationPhase::Canceled);
    }

    #[tokio::test]
    async fn test_terminal_jobs_are_purged_after_grace() {
        let h = harness_with(
            EngineConfig::default().with_terminal_grace_period(Duration::from_millis(50)),
            FakeEngine::new(vec![true]),
        );
        let id = h
            .controller
            .start(DownloadRequest::new(
                DownloadKind::Raw,
                url("https://cdn.test/master.m3u8"),
            ))
            .unwrap();

        events_of(&h.controller, id).await;
        assert!(h.controller.registry().get(&id).is_some());
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(h.controller.registry().get(&id).is_none());
        assert!(h.controller.subscribe_job(id).collect::<Vec<_>>().await.is_empty());
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_outcome() {
        let h = harness();
        let id = h
            .controller
            .start(DownloadRequest::new(
                DownloadKind::Raw,
                url("https://cdn.test/master.m3u8"),
            ))
            .unwrap();
        wait_for_phase(&h.controller, id, JobPhase::Done).await;

        let events = events_of(&h.controller, id).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].phase, NotificationPhase::Done);
    }

    #[tokio::test]
    async fn test_rejects_unroutable_urls() {
        let h = harness();
        let direct = h
            .controller
            .start(DownloadRequest::new(DownloadKind::Mp4, url("https://cdn.test/clip.mp4")))
            .unwrap_err();
        assert!(matches!(direct, EngineError::InvalidRequest { .. }));

        let unknown = h
            .controller
            .start(DownloadRequest::new(DownloadKind::Raw, url("https://cdn.test/watch?v=1")))
            .unwrap_err();
        assert!(matches!(unknown, EngineError::InvalidRequest { .. }));

        // an explicit stream kind overrides detection
        let id = h
            .controller
            .start(
                DownloadRequest::new(DownloadKind::Raw, url("https://cdn.test/master.m3u8"))
                    .with_stream(StreamKind::Hls),
            )
            .unwrap();
        assert_eq!(
            events_of(&h.controller, id).await.last().unwrap().phase,
            NotificationPhase::Done
        );
        assert!(h.controller.active_jobs().iter().all(|j| j.id == id));
    }

    #[tokio::test]
    async fn test_dash_conversion() {
        let h = harness();
        h.fetcher
            .body(
                "https://cdn.test/dash/manifest.mpd",
                r#"<MPD><Period>
                  <AdaptationSet contentType="video">
                    <Representation id="hd" bandwidth="5000000">
                      <SegmentList><Initialization sourceURL="hd/init.mp4"/><SegmentURL media="hd/1.m4s"/></SegmentList>
                    </Representation>
                  </AdaptationSet>
                </Period></MPD>"#,
            )
            .body("https://cdn.test/dash/hd/init.mp4", "I")
            .body("https://cdn.test/dash/hd/1.m4s", "S");

        let id = h
            .controller
            .start(DownloadRequest::new(
                DownloadKind::Mp4,
                url("https://cdn.test/dash/manifest.mpd"),
            ))
            .unwrap();
        let events = events_of(&h.controller, id).await;
        assert_eq!(events.last().unwrap().phase, NotificationPhase::Done);
        assert_eq!(h.controller.registry().get(&id).unwrap().kind, JobKind::DashToMp4);
        assert_eq!(&h.sink.delivered.lock()[0].bytes[..], b"IS");
        // a single fMP4 track still goes through the engine once
        let runs = h.engine.runs.lock();
        assert_eq!(runs.len(), 1);
        assert!(runs[0].join(" ").starts_with("-i v.mp4 -c copy"));
    }
}
