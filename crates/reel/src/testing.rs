//! In-memory collaborators shared by unit tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::EngineError;
use crate::fetcher::{FetchError, FetchPurpose, Fetcher};
use crate::job::{Artifact, ArtifactSink};
use crate::transcode::{
    ProgressCallback, ProgressHub, ProgressSubscription, TranscodeBackend, TranscodeEngine,
    TranscodeError,
};

pub fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
}

#[derive(Clone)]
enum Reply {
    Body(Bytes),
    Status(StatusCode),
}

/// Serves canned responses and records every request.
#[derive(Default)]
pub struct FakeFetcher {
    replies: Mutex<HashMap<String, Reply>>,
    delays: Mutex<HashMap<String, Duration>>,
    log: Mutex<Vec<(String, Option<String>)>>,
}

impl FakeFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn body(&self, url: &str, body: impl Into<Bytes>) -> &Self {
        self.replies
            .lock()
            .insert(url.to_string(), Reply::Body(body.into()));
        self
    }

    pub fn status(&self, url: &str, status: StatusCode) -> &Self {
        self.replies
            .lock()
            .insert(url.to_string(), Reply::Status(status));
        self
    }

    pub fn delay(&self, url: &str, delay: Duration) -> &Self {
        self.delays.lock().insert(url.to_string(), delay);
        self
    }

    /// URLs requested so far, in request order.
    pub fn requested(&self) -> Vec<String> {
        self.log.lock().iter().map(|(u, _)| u.clone()).collect()
    }

    pub fn referrers(&self) -> Vec<Option<String>> {
        self.log.lock().iter().map(|(_, r)| r.clone()).collect()
    }
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn fetch(
        &self,
        url: &Url,
        referrer: Option<&Url>,
        _purpose: FetchPurpose,
        token: &CancellationToken,
    ) -> Result<Bytes, FetchError> {
        self.log
            .lock()
            .push((url.to_string(), referrer.map(|r| r.to_string())));

        let delay = self.delays.lock().get(url.as_str()).copied();
        if let Some(delay) = delay {
            tokio::select! {
                _ = token.cancelled() => return Err(FetchError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let reply = self.replies.lock().get(url.as_str()).cloned();
        match reply {
            Some(Reply::Body(bytes)) => Ok(bytes),
            Some(Reply::Status(status)) => Err(FetchError::Status { status }),
            None => Err(FetchError::Status {
                status: StatusCode::NOT_FOUND,
            }),
        }
    }
}

/// Engine that succeeds or fails per tier according to a script.
pub struct FakeEngine {
    files: Mutex<HashMap<String, Bytes>>,
    /// Outcome for each successive `run`; `true` writes `out.mp4`.
    script: Mutex<Vec<bool>>,
    pub runs: Mutex<Vec<Vec<String>>>,
    pub deleted: Mutex<Vec<String>>,
    pub terminated: Mutex<bool>,
    run_delay: Option<Duration>,
    progress: Arc<ProgressHub>,
}

impl FakeEngine {
    pub fn new(script: Vec<bool>) -> Arc<Self> {
        Arc::new(Self::build(script, None))
    }

    pub fn slow(script: Vec<bool>, delay: Duration) -> Arc<Self> {
        Arc::new(Self::build(script, Some(delay)))
    }

    fn build(script: Vec<bool>, run_delay: Option<Duration>) -> Self {
        Self {
            files: Mutex::new(HashMap::new()),
            script: Mutex::new(script),
            runs: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            terminated: Mutex::new(false),
            run_delay,
            progress: Arc::new(ProgressHub::default()),
        }
    }

    pub fn input(&self, name: &str) -> Option<Bytes> {
        self.files.lock().get(name).cloned()
    }
}

#[async_trait]
impl TranscodeEngine for FakeEngine {
    async fn write_input(&self, name: &str, bytes: Bytes) -> Result<(), TranscodeError> {
        self.files.lock().insert(name.to_string(), bytes);
        Ok(())
    }

    async fn run(&self, argv: &[String], token: &CancellationToken) -> Result<(), TranscodeError> {
        self.runs.lock().push(argv.to_vec());
        if let Some(delay) = self.run_delay {
            tokio::select! {
                _ = token.cancelled() => return Err(TranscodeError::Terminated),
                _ = tokio::time::sleep(delay) => {}
            }
        }
        let succeed = {
            let mut script = self.script.lock();
            if script.is_empty() { false } else { script.remove(0) }
        };
        if !succeed {
            return Err(TranscodeError::Failed {
                argv: argv.to_vec(),
                cause: "scripted failure".into(),
            });
        }

        self.progress.emit(0.5);
        self.progress.emit(1.0);
        let joined: Vec<u8> = {
            let files = self.files.lock();
            let mut names: Vec<&String> = files.keys().filter(|k| *k != "out.mp4").collect();
            names.sort();
            names
                .into_iter()
                .flat_map(|n| files[n].iter().copied())
                .collect()
        };
        self.files
            .lock()
            .insert("out.mp4".to_string(), Bytes::from(joined));
        Ok(())
    }

    async fn read_output(&self, name: &str) -> Result<Bytes, TranscodeError> {
        self.files
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| TranscodeError::MissingFile {
                name: name.to_string(),
            })
    }

    async fn delete_file(&self, name: &str) -> Result<(), TranscodeError> {
        self.files.lock().remove(name);
        self.deleted.lock().push(name.to_string());
        Ok(())
    }

    fn subscribe_progress(&self, callback: ProgressCallback) -> ProgressSubscription {
        self.progress.subscribe(callback)
    }

    async fn terminate(&self) {
        *self.terminated.lock() = true;
    }
}

/// Hands out the same fake engine to every job.
pub struct FakeBackend {
    pub engine: Arc<FakeEngine>,
}

#[async_trait]
impl TranscodeBackend for FakeBackend {
    async fn open(&self) -> Result<Arc<dyn TranscodeEngine>, TranscodeError> {
        Ok(self.engine.clone())
    }
}

/// Keeps delivered artifacts in memory.
#[derive(Default)]
pub struct MemorySink {
    pub delivered: Mutex<Vec<Artifact>>,
}

impl MemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl ArtifactSink for MemorySink {
    async fn deliver(&self, artifact: Artifact) -> Result<String, EngineError> {
        let location = format!("memory://{}", artifact.filename);
        self.delivered.lock().push(artifact);
        Ok(location)
    }
}
