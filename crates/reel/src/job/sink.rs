use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};

use super::model::JobId;
use crate::EngineError;

const MAX_NAME_ATTEMPTS: u32 = 1000;

/// A finished artifact ready to leave the engine.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub job_id: JobId,
    /// Suggested file name; the sink may adjust it.
    pub filename: String,
    pub bytes: Bytes,
    pub mime_type: &'static str,
}

/// Destination for completed artifacts.
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    /// Stores the artifact and returns a description of where it went.
    async fn deliver(&self, artifact: Artifact) -> Result<String, EngineError>;
}

/// Writes artifacts into a directory without overwriting existing files.
#[derive(Debug, Clone)]
pub struct FileSink {
    dir: PathBuf,
}

impl FileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Replaces path separators and reserved characters.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim().trim_start_matches('.').trim();
    if cleaned.is_empty() {
        "video".to_string()
    } else {
        cleaned.to_string()
    }
}

/// `name`, then `stem (1).ext`, `stem (2).ext`, ...
fn candidate_name(name: &str, attempt: u32) -> String {
    if attempt == 0 {
        return name.to_string();
    }
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem} ({attempt}).{ext}"),
        _ => format!("{name} ({attempt})"),
    }
}

/// Writes `bytes` to the freshly created file at `path`. On failure the
/// partial file is removed so no truncated artifact is left behind.
async fn write_or_remove<W>(path: &Path, mut writer: W, bytes: &[u8]) -> Result<(), EngineError>
where
    W: AsyncWrite + Unpin,
{
    let written = async {
        writer.write_all(bytes).await?;
        writer.flush().await
    }
    .await;

    let Err(e) = written else {
        return Ok(());
    };
    drop(writer);
    match tokio::fs::remove_file(path).await {
        Ok(()) => warn!(path = %path.display(), error = %e, "Artifact write failed, partial file removed"),
        Err(remove_err) => warn!(
            path = %path.display(),
            error = %e,
            remove_error = %remove_err,
            "Artifact write failed and partial file could not be removed"
        ),
    }
    Err(e.into())
}

#[async_trait]
impl ArtifactSink for FileSink {
    async fn deliver(&self, artifact: Artifact) -> Result<String, EngineError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let name = sanitize_filename(&artifact.filename);

        for attempt in 0..MAX_NAME_ATTEMPTS {
            let path = self.dir.join(candidate_name(&name, attempt));
            let file = match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => file,
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            };

            write_or_remove(&path, file, &artifact.bytes).await?;
            info!(
                job_id = %artifact.job_id,
                path = %path.display(),
                size = artifact.bytes.len(),
                mime = artifact.mime_type,
                "Artifact saved"
            );
            return Ok(path.display().to_string());
        }

        Err(EngineError::sink(format!(
            "no free file name for {name} in {}",
            self.dir.display()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(name: &str, bytes: &'static [u8]) -> Artifact {
        Artifact {
            job_id: JobId::new(),
            filename: name.to_string(),
            bytes: Bytes::from_static(bytes),
            mime_type: "video/mp4",
        }
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("clip.mp4"), "clip.mp4");
        assert_eq!(sanitize_filename("../etc/passwd"), "_etc_passwd");
        assert_eq!(sanitize_filename("a:b?.ts"), "a_b_.ts");
        assert_eq!(sanitize_filename("  "), "video");
    }

    #[test]
    fn test_candidate_names() {
        assert_eq!(candidate_name("video.mp4", 0), "video.mp4");
        assert_eq!(candidate_name("video.mp4", 2), "video (2).mp4");
        assert_eq!(candidate_name("video", 1), "video (1)");
    }

    /// Accepts nothing and fails every write.
    struct FullDisk;

    impl AsyncWrite for FullDisk {
        fn poll_write(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            _buf: &[u8],
        ) -> std::task::Poll<std::io::Result<usize>> {
            std::task::Poll::Ready(Err(std::io::Error::other("no space left on device")))
        }

        fn poll_flush(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }

        fn poll_shutdown(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_failed_write_removes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("video.mp4");
        std::fs::write(&path, b"partial").unwrap();

        let result = write_or_remove(&path, FullDisk, b"whole artifact").await;

        assert!(result.is_err());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_successful_write_keeps_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("video.mp4");
        let file = tokio::fs::File::create(&path).await.unwrap();

        write_or_remove(&path, file, b"whole artifact").await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"whole artifact");
    }

    #[tokio::test]
    async fn test_file_sink_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSink::new(dir.path().join("out"));

        let first = sink.deliver(artifact("video.mp4", b"one")).await.unwrap();
        let second = sink.deliver(artifact("video.mp4", b"two")).await.unwrap();

        assert!(first.ends_with("video.mp4"));
        assert!(second.ends_with("video (1).mp4"));
        assert_eq!(std::fs::read(&first).unwrap(), b"one");
        assert_eq!(std::fs::read(&second).unwrap(), b"two");
    }
}
