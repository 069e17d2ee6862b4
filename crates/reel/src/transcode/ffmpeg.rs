use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    ProgressCallback, ProgressHub, ProgressSubscription, TranscodeBackend, TranscodeEngine,
    TranscodeError,
};

/// Arguments placed before every command line.
const BASE_ARGS: [&str; 7] = [
    "-y",
    "-hide_banner",
    "-nostats",
    "-loglevel",
    "info",
    "-progress",
    "pipe:1",
];

const STDERR_TAIL_LINES: usize = 20;

/// Seconds from an ffmpeg clock such as `00:01:02.50` or `-00:00:00.023`.
///
/// The clock must have exactly three fields with minutes and seconds below
/// 60. A negative clock (ffmpeg reports one before the first output frame)
/// counts as zero.
fn clock_seconds(clock: &str) -> Option<f64> {
    let clock = clock.trim();
    let (negative, clock) = match clock.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, clock),
    };

    let mut fields = clock.splitn(3, ':');
    let hours: u64 = fields.next()?.parse().ok()?;
    let minutes: u64 = fields.next()?.parse().ok()?;
    let seconds: f64 = fields.next()?.parse().ok()?;
    if minutes >= 60 || !(0.0..60.0).contains(&seconds) {
        return None;
    }

    let total = (hours * 60 + minutes) as f64 * 60.0 + seconds;
    Some(if negative { 0.0 } else { total })
}

/// Input duration from a stderr banner line (`Duration: 00:01:02.50, start: ...`).
fn parse_duration_line(line: &str) -> Option<f64> {
    let (_, rest) = line.split_once("Duration:")?;
    let clock = rest.split(',').next()?;
    clock_seconds(clock)
}

enum ProgressLine {
    Position(f64),
    End,
}

/// One `key=value` line of `-progress` output.
fn parse_progress_line(line: &str) -> Option<ProgressLine> {
    let (key, value) = line.trim().split_once('=')?;
    match key {
        "out_time_us" => value
            .parse::<f64>()
            .ok()
            .map(|us| ProgressLine::Position(us / 1_000_000.0)),
        "out_time" => clock_seconds(value).map(ProgressLine::Position),
        "progress" if value == "end" => Some(ProgressLine::End),
        _ => None,
    }
}

/// Spawns `ffmpeg` sessions, each in its own temporary directory.
#[derive(Debug, Clone)]
pub struct FfmpegBackend {
    ffmpeg_path: PathBuf,
}

impl FfmpegBackend {
    pub fn new(ffmpeg_path: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }
}

#[async_trait]
impl TranscodeBackend for FfmpegBackend {
    async fn open(&self) -> Result<Arc<dyn TranscodeEngine>, TranscodeError> {
        let session = FfmpegSession::new(self.ffmpeg_path.clone())?;
        Ok(Arc::new(session))
    }
}

/// A private working directory plus the `ffmpeg` binary that runs in it.
pub struct FfmpegSession {
    ffmpeg_path: PathBuf,
    dir: PathBuf,
    workdir: Mutex<Option<TempDir>>,
    progress: Arc<ProgressHub>,
    shutdown: CancellationToken,
}

impl FfmpegSession {
    pub fn new(ffmpeg_path: PathBuf) -> Result<Self, TranscodeError> {
        let workdir = tempfile::Builder::new().prefix("reel-").tempdir()?;
        let dir = workdir.path().to_path_buf();
        debug!(dir = %dir.display(), "Opened engine session");
        Ok(Self {
            ffmpeg_path,
            dir,
            workdir: Mutex::new(Some(workdir)),
            progress: Arc::new(ProgressHub::default()),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Resolves a bare file name inside the session directory.
    fn path_for(&self, name: &str) -> Result<PathBuf, TranscodeError> {
        if self.shutdown.is_cancelled() {
            return Err(TranscodeError::Terminated);
        }
        let is_plain = !name.is_empty()
            && Path::new(name).file_name().and_then(|n| n.to_str()) == Some(name);
        if !is_plain {
            return Err(TranscodeError::InvalidName {
                name: name.to_string(),
            });
        }
        Ok(self.dir.join(name))
    }

    fn missing_or_io(name: &str, err: std::io::Error) -> TranscodeError {
        if err.kind() == std::io::ErrorKind::NotFound {
            TranscodeError::MissingFile {
                name: name.to_string(),
            }
        } else {
            err.into()
        }
    }
}

#[async_trait]
impl TranscodeEngine for FfmpegSession {
    async fn write_input(&self, name: &str, bytes: Bytes) -> Result<(), TranscodeError> {
        let path = self.path_for(name)?;
        tokio::fs::write(&path, &bytes).await?;
        debug!(file = name, size = bytes.len(), "Wrote engine input");
        Ok(())
    }

    async fn run(&self, argv: &[String], token: &CancellationToken) -> Result<(), TranscodeError> {
        if self.shutdown.is_cancelled() {
            return Err(TranscodeError::Terminated);
        }

        let mut command = Command::new(&self.ffmpeg_path);
        command
            .args(BASE_ARGS)
            .args(argv)
            .current_dir(&self.dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(program = %self.ffmpeg_path.display(), args = ?argv, "Spawning engine");
        let mut child = command.spawn().map_err(|e| TranscodeError::Spawn {
            reason: format!("{}: {e}", self.ffmpeg_path.display()),
        })?;

        // longest input duration seen on stderr, 0 until known
        let duration = Arc::new(Mutex::new(0.0f64));

        let stderr_task: Option<JoinHandle<VecDeque<String>>> = child.stderr.take().map(|stderr| {
            let duration = duration.clone();
            tokio::spawn(async move {
                let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if let Some(secs) = parse_duration_line(&line) {
                        let mut known = duration.lock();
                        *known = known.max(secs);
                    }
                    if line.to_lowercase().contains("error") {
                        warn!("ffmpeg: {}", line);
                    } else {
                        debug!("ffmpeg: {}", line);
                    }
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
                tail
            })
        });

        let stdout_task: Option<JoinHandle<()>> = child.stdout.take().map(|stdout| {
            let duration = duration.clone();
            let progress = self.progress.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    match parse_progress_line(&line) {
                        Some(ProgressLine::Position(secs)) => {
                            let total = *duration.lock();
                            if total > 0.0 {
                                progress.emit(secs / total);
                            }
                        }
                        Some(ProgressLine::End) => progress.emit(1.0),
                        None => {}
                    }
                }
            })
        });

        let status = tokio::select! {
            _ = token.cancelled() => {
                let _ = child.kill().await;
                None
            }
            _ = self.shutdown.cancelled() => {
                let _ = child.kill().await;
                None
            }
            status = child.wait() => Some(status?),
        };

        let Some(status) = status else {
            info!("Engine run terminated");
            return Err(TranscodeError::Terminated);
        };

        if let Some(task) = stdout_task {
            let _ = task.await;
        }
        let tail = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => VecDeque::new(),
        };

        if status.success() {
            return Ok(());
        }

        let cause = match status.code() {
            Some(code) if tail.is_empty() => format!("exit status {code}"),
            Some(code) => format!(
                "exit status {code}: {}",
                tail.iter().cloned().collect::<Vec<_>>().join("\n")
            ),
            None => "terminated by signal".to_string(),
        };
        Err(TranscodeError::Failed {
            argv: argv.to_vec(),
            cause,
        })
    }

    async fn read_output(&self, name: &str) -> Result<Bytes, TranscodeError> {
        let path = self.path_for(name)?;
        let data = tokio::fs::read(&path)
            .await
            .map_err(|e| Self::missing_or_io(name, e))?;
        Ok(Bytes::from(data))
    }

    async fn delete_file(&self, name: &str) -> Result<(), TranscodeError> {
        let path = self.path_for(name)?;
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| Self::missing_or_io(name, e))
    }

    fn subscribe_progress(&self, callback: ProgressCallback) -> ProgressSubscription {
        self.progress.subscribe(callback)
    }

    async fn terminate(&self) {
        self.shutdown.cancel();
        let workdir = self.workdir.lock().take();
        if let Some(workdir) = workdir {
            match tokio::task::spawn_blocking(move || workdir.close()).await {
                Ok(Ok(())) => debug!(dir = %self.dir.display(), "Removed engine session directory"),
                Ok(Err(e)) => warn!(dir = %self.dir.display(), error = %e, "Failed to remove engine session directory"),
                Err(e) => warn!(error = %e, "Engine cleanup task failed"),
            }
        }
    }
}
