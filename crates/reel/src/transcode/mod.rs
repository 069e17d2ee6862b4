//! Boundary to the external remux/transcode engine.
//!
//! The engine is treated as a command executor with its own private file
//! namespace: inputs are written by name, a command line runs over them and
//! outputs are read back by name.

mod ffmpeg;
mod policy;

pub use ffmpeg::{FfmpegBackend, FfmpegSession};
pub use policy::{RemuxTier, input_name, remux_to_mp4, tier_args};

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum TranscodeError {
    #[error("engine command failed: {cause}")]
    Failed { argv: Vec<String>, cause: String },

    #[error("engine was terminated")]
    Terminated,

    #[error("failed to start engine: {reason}")]
    Spawn { reason: String },

    #[error("engine file `{name}` not found")]
    MissingFile { name: String },

    #[error("invalid engine file name `{name}`")]
    InvalidName { name: String },

    #[error("engine I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

pub type ProgressCallback = Box<dyn Fn(f64) + Send + Sync>;

/// One engine session. Sessions never share files or state with each other.
#[async_trait]
pub trait TranscodeEngine: Send + Sync {
    async fn write_input(&self, name: &str, bytes: Bytes) -> Result<(), TranscodeError>;

    /// Runs one engine command line. A non-zero result is `TranscodeError::Failed`.
    async fn run(&self, argv: &[String], token: &CancellationToken) -> Result<(), TranscodeError>;

    async fn read_output(&self, name: &str) -> Result<Bytes, TranscodeError>;

    async fn delete_file(&self, name: &str) -> Result<(), TranscodeError>;

    /// Registers a progress callback receiving fractions in `[0, 1]`.
    /// The callback stays registered until the returned guard is dropped.
    fn subscribe_progress(&self, callback: ProgressCallback) -> ProgressSubscription;

    /// Hard-stops any in-flight run and discards the session's files.
    async fn terminate(&self);
}

/// Opens a fresh engine session per job.
#[async_trait]
pub trait TranscodeBackend: Send + Sync {
    async fn open(&self) -> Result<Arc<dyn TranscodeEngine>, TranscodeError>;
}

/// Fan-out of progress fractions to registered callbacks.
#[derive(Default)]
pub struct ProgressHub {
    next_id: Mutex<u64>,
    callbacks: Mutex<Vec<(u64, Arc<dyn Fn(f64) + Send + Sync>)>>,
}

impl ProgressHub {
    pub fn subscribe(self: &Arc<Self>, callback: ProgressCallback) -> ProgressSubscription {
        let id = {
            let mut next = self.next_id.lock();
            *next += 1;
            *next
        };
        self.callbacks.lock().push((id, Arc::from(callback)));
        ProgressSubscription {
            id,
            hub: Arc::downgrade(self),
        }
    }

    pub fn emit(&self, fraction: f64) {
        let fraction = fraction.clamp(0.0, 1.0);
        // clone out so callbacks may subscribe or unsubscribe
        let callbacks: Vec<_> = self.callbacks.lock().iter().map(|(_, cb)| cb.clone()).collect();
        for callback in callbacks {
            callback(fraction);
        }
    }

    fn remove(&self, id: u64) {
        self.callbacks.lock().retain(|(cb_id, _)| *cb_id != id);
    }
}

/// Keeps a progress callback registered while alive.
#[must_use = "dropping the subscription unregisters the callback"]
pub struct ProgressSubscription {
    id: u64,
    hub: Weak<ProgressHub>,
}

impl Drop for ProgressSubscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.remove(self.id);
        }
    }
}
