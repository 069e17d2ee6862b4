//! Job lifecycle: records, registry, artifact delivery and the controller
//! that drives each job through its phases.

mod controller;
mod model;
mod registry;
mod sink;

pub use controller::{DownloadKind, DownloadRequest, JobController};
pub use model::{Job, JobEvent, JobId, JobKind, JobMetadata, JobPhase, NotificationPhase};
pub use registry::JobRegistry;
pub use sink::{Artifact, ArtifactSink, FileSink, sanitize_filename};
