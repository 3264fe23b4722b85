//! # Upload Session Store
//!
//! Manages the lifecycle of chunked upload sessions. Each session owns one
//! working directory under the temporary storage root, one growing stream
//! file that every accepted chunk is appended to, and a status marker.
//!
//! ## Session Lifecycle:
//! 1. **UPLOADING**: Created; chunk appends are accepted
//! 2. **FINALIZING**: Finalize has begun; all further appends are rejected
//! 3. **FINALIZED**: The encoded artifact exists; cleanup is scheduled
//!
//! The status is monotonic: it never moves backward, and any append or
//! finalize against a session that has left `UPLOADING` fails with
//! `AlreadyFinalized` instead of silently corrupting the stream.

use crate::error::{AppError, AppResult};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// Status marker file kept alongside the stream for diagnostics. Its content
/// is the literal status name, durable across the appends of a single run.
pub const STATUS_MARKER: &str = "status.txt";

/// The single growing byte-stream file all accepted chunks are appended to.
pub const STREAM_FILE: &str = "stream.webm";

/// Current status of an upload session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStatus {
    /// Accepting chunk appends
    Uploading,
    /// Finalize has started; the stream is frozen
    Finalizing,
    /// The final artifact was produced (terminal)
    Finalized,
}

impl UploadStatus {
    /// Marker-file spelling of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Uploading => "UPLOADING",
            UploadStatus::Finalizing => "FINALIZING",
            UploadStatus::Finalized => "FINALIZED",
        }
    }
}

/// Mutable session state guarded by the per-session lock.
///
/// Everything a chunk append or a status transition touches lives here, so
/// holding the lock makes "append while finalizing" structurally impossible.
#[derive(Debug)]
pub struct SessionState {
    /// Where the session is in its lifecycle
    pub status: UploadStatus,

    /// Last client-supplied sequence number observed. Advisory only: it is
    /// never used to order or deduplicate chunks, only for auditing.
    pub last_seq: Option<u32>,

    /// Total payload bytes accepted so far
    pub appended_bytes: u64,
}

/// One in-progress chunked upload.
///
/// ## Thread Safety:
/// The immutable identity (id, directory, creation time) is freely shared;
/// the mutable state sits behind a `tokio::sync::Mutex` so status checks,
/// stream appends, and status transitions are one atomic unit per session.
pub struct UploadSession {
    /// Unique identifier for this session, never reused
    pub upload_id: String,

    /// Per-session working directory under the temporary storage root
    pub dir: PathBuf,

    /// When the session was created
    pub created_at: DateTime<Utc>,

    state: Mutex<SessionState>,
}

impl UploadSession {
    fn new(upload_id: String, dir: PathBuf) -> Self {
        Self {
            upload_id,
            dir,
            created_at: Utc::now(),
            state: Mutex::new(SessionState {
                status: UploadStatus::Uploading,
                last_seq: None,
                appended_bytes: 0,
            }),
        }
    }

    /// Path of the growing stream file for this session.
    pub fn stream_path(&self) -> PathBuf {
        self.dir.join(STREAM_FILE)
    }

    /// Path of the on-disk status marker.
    pub fn marker_path(&self) -> PathBuf {
        self.dir.join(STATUS_MARKER)
    }

    /// Acquire the per-session lock. Callers perform the status check, any
    /// stream write, and any status transition while holding the guard.
    pub async fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().await
    }

    /// Read the current status (takes and releases the lock).
    pub async fn status(&self) -> UploadStatus {
        self.state.lock().await.status
    }

    /// Rewrite the on-disk status marker. The in-memory state under the lock
    /// stays authoritative; the marker exists for diagnostics and parity with
    /// the on-disk layout.
    pub async fn write_marker(&self, status: UploadStatus) -> AppResult<()> {
        tokio::fs::write(self.marker_path(), status.as_str()).await?;
        Ok(())
    }
}

/// Maps upload ids to live sessions and owns the temporary storage root.
///
/// ## Thread Safety:
/// The map sits behind an `RwLock` so concurrent requests for different
/// sessions never contend beyond the brief map lookup; per-session work is
/// serialized by each session's own lock.
pub struct SessionStore {
    tmp_root: PathBuf,
    sessions: RwLock<HashMap<String, Arc<UploadSession>>>,
}

impl SessionStore {
    pub fn new(tmp_root: PathBuf) -> Self {
        Self {
            tmp_root,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Allocate a fresh session: new UUID, new working directory, status
    /// marker written as `UPLOADING`.
    ///
    /// Safe to call concurrently for different sessions. Storage I/O errors
    /// are fatal to this call and propagate; nothing is retried.
    pub async fn create_session(&self) -> AppResult<String> {
        let upload_id = Uuid::new_v4().to_string();
        let dir = self.tmp_root.join(&upload_id);
        tokio::fs::create_dir_all(&dir).await?;

        let session = Arc::new(UploadSession::new(upload_id.clone(), dir));
        session.write_marker(UploadStatus::Uploading).await?;

        self.sessions
            .write()
            .unwrap()
            .insert(upload_id.clone(), session);
        Ok(upload_id)
    }

    /// Look up a live session, failing with `NoSession` for unknown or
    /// already-cleaned-up ids.
    pub fn get(&self, upload_id: &str) -> AppResult<Arc<UploadSession>> {
        self.sessions
            .read()
            .unwrap()
            .get(upload_id)
            .cloned()
            .ok_or(AppError::NoSession)
    }

    /// Current status of a session.
    pub async fn status(&self, upload_id: &str) -> AppResult<UploadStatus> {
        Ok(self.get(upload_id)?.status().await)
    }

    /// Drop a session from the map (cleanup). Subsequent operations on the
    /// id observe `NoSession`.
    pub fn remove(&self, upload_id: &str) -> Option<Arc<UploadSession>> {
        self.sessions.write().unwrap().remove(upload_id)
    }

    /// Number of sessions currently known to this process.
    pub fn active_count(&self) -> usize {
        self.sessions.read().unwrap().len()
    }

    /// Append one chunk's payload to the session's stream file.
    ///
    /// ## Preconditions:
    /// - `bytes` non-empty (`EmptyChunk` otherwise)
    /// - session exists (`NoSession` otherwise)
    /// - session status is `UPLOADING` (`AlreadyFinalized` otherwise)
    ///
    /// ## Guarantee:
    /// The whole payload is appended to the end of the stream file, in the
    /// order calls are accepted. The write happens under the session lock,
    /// so it can never interleave with a status transition. No reordering,
    /// no deduplication, no container-level validation: this is deliberate
    /// byte-stream concatenation of fragments of one continuous recording.
    pub async fn append_chunk(&self, upload_id: &str, seq: u32, bytes: &[u8]) -> AppResult<()> {
        if bytes.is_empty() {
            return Err(AppError::EmptyChunk);
        }

        let session = self.get(upload_id)?;
        let mut state = session.lock().await;
        if state.status != UploadStatus::Uploading {
            return Err(AppError::AlreadyFinalized);
        }

        let mut stream = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(session.stream_path())
            .await?;
        stream.write_all(bytes).await?;
        stream.flush().await?;

        state.last_seq = Some(seq);
        state.appended_bytes += bytes.len() as u64;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, Arc<SessionStore>) {
        let tmp = TempDir::new().expect("temp dir");
        let store = Arc::new(SessionStore::new(tmp.path().join("tmp")));
        (tmp, store)
    }

    #[tokio::test]
    async fn test_create_session_writes_uploading_marker() {
        let (_tmp, store) = store();
        let id = store.create_session().await.unwrap();

        let session = store.get(&id).unwrap();
        assert_eq!(session.status().await, UploadStatus::Uploading);

        let marker = tokio::fs::read_to_string(session.marker_path())
            .await
            .unwrap();
        assert_eq!(marker, "UPLOADING");
    }

    #[tokio::test]
    async fn test_stream_length_is_sum_of_chunk_lengths() {
        let (_tmp, store) = store();
        let id = store.create_session().await.unwrap();

        store.append_chunk(&id, 0, b"hello").await.unwrap();
        store.append_chunk(&id, 1, b", world").await.unwrap();
        store.append_chunk(&id, 2, b"!").await.unwrap();

        let session = store.get(&id).unwrap();
        let meta = tokio::fs::metadata(session.stream_path()).await.unwrap();
        assert_eq!(meta.len(), 13);

        let state = session.lock().await;
        assert_eq!(state.appended_bytes, 13);
        assert_eq!(state.last_seq, Some(2));
    }

    #[tokio::test]
    async fn test_append_rejects_empty_chunk() {
        let (_tmp, store) = store();
        let id = store.create_session().await.unwrap();
        let err = store.append_chunk(&id, 0, b"").await.unwrap_err();
        assert!(matches!(err, AppError::EmptyChunk));
    }

    #[tokio::test]
    async fn test_append_rejects_unknown_session() {
        let (_tmp, store) = store();
        let err = store
            .append_chunk("not-a-session", 0, b"data")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NoSession));
    }

    #[tokio::test]
    async fn test_append_rejects_non_uploading_session() {
        let (_tmp, store) = store();
        let id = store.create_session().await.unwrap();

        {
            let session = store.get(&id).unwrap();
            let mut state = session.lock().await;
            state.status = UploadStatus::Finalizing;
        }

        let err = store.append_chunk(&id, 5, b"late").await.unwrap_err();
        assert!(matches!(err, AppError::AlreadyFinalized));
    }

    #[tokio::test]
    async fn test_concurrent_sessions_do_not_interfere() {
        let (_tmp, store) = store();
        let a = store.create_session().await.unwrap();
        let b = store.create_session().await.unwrap();

        let store_a = store.clone();
        let id_a = a.clone();
        let task_a = tokio::spawn(async move {
            for seq in 0..20u32 {
                store_a.append_chunk(&id_a, seq, &[0xAA; 11]).await.unwrap();
            }
        });

        let store_b = store.clone();
        let id_b = b.clone();
        let task_b = tokio::spawn(async move {
            for seq in 0..20u32 {
                store_b.append_chunk(&id_b, seq, &[0xBB; 7]).await.unwrap();
            }
        });

        task_a.await.unwrap();
        task_b.await.unwrap();

        let size_a = tokio::fs::metadata(store.get(&a).unwrap().stream_path())
            .await
            .unwrap()
            .len();
        let size_b = tokio::fs::metadata(store.get(&b).unwrap().stream_path())
            .await
            .unwrap()
            .len();
        assert_eq!(size_a, 20 * 11);
        assert_eq!(size_b, 20 * 7);
    }

    #[tokio::test]
    async fn test_remove_expires_session() {
        let (_tmp, store) = store();
        let id = store.create_session().await.unwrap();
        assert_eq!(store.active_count(), 1);

        store.remove(&id);
        assert_eq!(store.active_count(), 0);
        assert!(matches!(store.status(&id).await, Err(AppError::NoSession)));
    }
}
