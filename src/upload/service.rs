//! # Upload Service: Finalization Orchestration
//!
//! Ties the pieces together: session store, stability detector, encoder
//! invoker, and deferred cleanup. The finalize state machine is
//! `UPLOADING → FINALIZING → FINALIZED`, monotonic and terminal; a failed
//! encode leaves the session stuck in `FINALIZING` with no retry path, which
//! callers must treat as a permanent failure of that upload.

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::upload::cleanup::CleanupScheduler;
use crate::upload::encoder::{EncodeJob, StreamEncoder};
use crate::upload::session::{SessionStore, UploadStatus};
use crate::upload::stability::wait_file_stable;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// File the captured encoder log is persisted to, alongside the session, for
/// diagnostics after a successful finalize.
pub const ENCODER_LOG_FILE: &str = "ffmpeg_final.log";

/// Descriptor of the final encoded output, produced once per successful
/// finalize and never mutated afterward.
#[derive(Debug, Clone)]
pub struct FinalizedArtifact {
    /// Fresh unique identifier for the artifact (distinct from the upload id)
    pub id: String,

    /// Deterministic storage key: `<ISO-date>/<artifact-id>.<ext>`
    pub key: String,

    /// Content type derived from the configured container extension
    pub content_type: String,

    /// Byte size of the encoded output file
    pub size: u64,
}

/// The upload pipeline behind the HTTP surface.
///
/// One instance per process; all mutable per-session state lives inside the
/// session store, so this struct is freely shared across request handlers.
pub struct UploadService {
    store: Arc<SessionStore>,
    encoder: Arc<dyn StreamEncoder>,
    cleanup: CleanupScheduler,
    upload_root: PathBuf,
    extension: String,
    stable_window: Duration,
    stability_timeout: Duration,
    cleanup_delay: Duration,
}

impl UploadService {
    /// Build the service: create both storage roots (permanent and
    /// temporary) and spawn the cleanup worker. Must run inside the tokio
    /// runtime, once, at startup.
    pub fn new(config: &AppConfig, encoder: Arc<dyn StreamEncoder>) -> AppResult<Self> {
        let upload_root = PathBuf::from(&config.storage.upload_root);
        let tmp_root = PathBuf::from(&config.storage.tmp_root);
        std::fs::create_dir_all(&upload_root)?;
        std::fs::create_dir_all(&tmp_root)?;

        let store = Arc::new(SessionStore::new(tmp_root));
        let cleanup = CleanupScheduler::spawn(store.clone());

        Ok(Self {
            store,
            encoder,
            cleanup,
            upload_root,
            extension: config.encoder.extension.clone(),
            stable_window: Duration::from_millis(config.upload.stable_window_ms),
            stability_timeout: Duration::from_millis(config.upload.stability_timeout_ms),
            cleanup_delay: Duration::from_secs(config.upload.cleanup_delay_secs),
        })
    }

    /// Allocate a fresh upload session.
    pub async fn create_session(&self) -> AppResult<String> {
        let upload_id = self.store.create_session().await?;
        info!(upload_id = %upload_id, "upload session created");
        Ok(upload_id)
    }

    /// Append one chunk to a session's stream. `seq` is recorded as a
    /// diagnostic watermark only; chunks are concatenated in acceptance
    /// order, never reordered.
    pub async fn append_chunk(&self, upload_id: &str, seq: u32, bytes: &[u8]) -> AppResult<()> {
        self.store.append_chunk(upload_id, seq, bytes).await
    }

    /// Current lifecycle status of a session.
    pub async fn status(&self, upload_id: &str) -> AppResult<UploadStatus> {
        self.store.status(upload_id).await
    }

    /// Number of sessions currently live in this process.
    pub fn session_count(&self) -> usize {
        self.store.active_count()
    }

    /// Finalize a session: freeze the stream, encode it exactly once, place
    /// the artifact under the date-partitioned permanent root, and schedule
    /// deferred cleanup.
    ///
    /// ## State machine:
    /// - status must be `UPLOADING` on entry (`AlreadyFinalized` otherwise)
    /// - the `UPLOADING → FINALIZING` transition happens under the session
    ///   lock, so a concurrent append or second finalize can never slip past
    /// - `FINALIZING → FINALIZED` only on encoder success; on failure the
    ///   session stays in `FINALIZING` and every retry sees `AlreadyFinalized`
    ///
    /// `total_chunks` is advisory: validated as a positive integer, logged,
    /// never used to gate readiness.
    pub async fn finalize(&self, upload_id: &str, total_chunks: i64) -> AppResult<FinalizedArtifact> {
        if total_chunks <= 0 {
            return Err(AppError::InvalidArgument(
                "totalChunks must be a positive integer".to_string(),
            ));
        }

        let session = self.store.get(upload_id)?;

        // Fast precondition pass; the authoritative re-check happens under
        // the lock right before the transition.
        if session.status().await != UploadStatus::Uploading {
            return Err(AppError::AlreadyFinalized);
        }

        let stream_path = session.stream_path();
        let stream_len = match tokio::fs::metadata(&stream_path).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };
        if stream_len == 0 {
            return Err(AppError::NoStream);
        }

        // The last chunk append may still be in flight; give the stream a
        // short settle window. A timeout is logged but not fatal.
        if !wait_file_stable(&stream_path, self.stable_window, self.stability_timeout).await {
            warn!(upload_id, "stream did not stabilize within the timeout; finalizing anyway");
        }

        {
            let mut state = session.lock().await;
            if state.status != UploadStatus::Uploading {
                return Err(AppError::AlreadyFinalized);
            }
            state.status = UploadStatus::Finalizing;
            session.write_marker(UploadStatus::Finalizing).await?;
            info!(
                upload_id,
                total_chunks,
                last_seq = ?state.last_seq,
                appended_bytes = state.appended_bytes,
                session_age_secs = (Utc::now() - session.created_at).num_seconds(),
                "finalizing upload session"
            );
        }

        let artifact_id = Uuid::new_v4().to_string();
        let date = Utc::now().date_naive().to_string();
        let out_dir = self.upload_root.join(&date);
        tokio::fs::create_dir_all(&out_dir).await?;
        let out_name = format!("{}.{}", artifact_id, self.extension);
        let out_path = out_dir.join(&out_name);

        let job = EncodeJob {
            work_dir: session.dir.clone(),
            input: stream_path,
            output: out_path.clone(),
        };
        // A non-zero exit propagates here and the session stays in FINALIZING.
        let log = self.encoder.encode(&job).await?;

        if let Err(err) = tokio::fs::write(session.dir.join(ENCODER_LOG_FILE), &log).await {
            warn!(upload_id, error = %err, "could not persist encoder log");
        }

        let size = tokio::fs::metadata(&out_path).await?.len();
        let content_type = content_type_for(&self.extension).to_string();

        {
            let mut state = session.lock().await;
            state.status = UploadStatus::Finalized;
            session.write_marker(UploadStatus::Finalized).await?;
        }

        self.cleanup
            .schedule(upload_id, &session.dir, self.cleanup_delay);

        let artifact = FinalizedArtifact {
            id: artifact_id,
            key: format!("{}/{}", date, out_name),
            content_type,
            size,
        };
        info!(upload_id, key = %artifact.key, size, "upload finalized");
        Ok(artifact)
    }
}

/// Content type of the final artifact, derived from the container extension.
fn content_type_for(extension: &str) -> &'static str {
    match extension {
        "webm" => "audio/webm",
        "ogg" | "oga" | "opus" => "audio/ogg",
        "mp3" => "audio/mpeg",
        "m4a" | "mp4" => "audio/mp4",
        "wav" => "audio/wav",
        "flac" => "audio/flac",
        _ => "application/octet-stream",
    }
}
