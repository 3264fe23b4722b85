//! # Chunked Upload Pipeline
//!
//! The core of the service: session lifecycle and stream assembly
//! (`session`), stream settle detection (`stability`), the external encoder
//! seam (`encoder`), deferred directory reclamation (`cleanup`), and the
//! finalize orchestration that ties them together (`service`).

pub mod cleanup;
pub mod encoder;
pub mod service;
pub mod session;
pub mod stability;

pub use encoder::{EncodeJob, FfmpegEncoder, StreamEncoder};
pub use service::{FinalizedArtifact, UploadService};
pub use session::{SessionStore, UploadStatus};
