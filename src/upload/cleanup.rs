//! # Deferred Session Cleanup
//!
//! Finalized sessions leave their working directory behind for a grace
//! period before it is reclaimed. Any chunk-append or finalize call that was
//! in flight when `FINALIZED` was set observes the non-`UPLOADING` status and
//! rejects itself long before the directory disappears; the delay is a
//! safety margin, not a correctness mechanism.
//!
//! One long-lived worker task drains the queue serially, so deletions never
//! compete with each other or with foreground request handling.

use crate::upload::session::SessionStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

struct CleanupTask {
    upload_id: String,
    dir: PathBuf,
    deadline: Instant,
}

/// Handle for enqueueing one-shot deferred deletions.
///
/// All tasks carry the same delay, so draining the channel in FIFO order is
/// draining it in deadline order.
#[derive(Clone)]
pub struct CleanupScheduler {
    tx: mpsc::UnboundedSender<CleanupTask>,
}

impl CleanupScheduler {
    /// Spawn the single background worker. Called once at process start; the
    /// worker lives until the runtime shuts down.
    pub fn spawn(store: Arc<SessionStore>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<CleanupTask>();

        tokio::spawn(async move {
            while let Some(task) = rx.recv().await {
                sleep_until(task.deadline).await;
                remove_tree_best_effort(&task.dir);
                store.remove(&task.upload_id);
                debug!(upload_id = %task.upload_id, "session directory reclaimed");
            }
        });

        Self { tx }
    }

    /// Enqueue removal of a session's directory after `delay`. The session
    /// id is expired from the store at the same moment the directory goes.
    pub fn schedule(&self, upload_id: &str, dir: &Path, delay: Duration) {
        let task = CleanupTask {
            upload_id: upload_id.to_string(),
            dir: dir.to_path_buf(),
            deadline: Instant::now() + delay,
        };
        if self.tx.send(task).is_err() {
            warn!(upload_id, "cleanup worker is gone; leaving session directory behind");
        }
    }
}

/// Recursively delete everything under `dir`, deepest first, swallowing
/// individual failures: one undeletable file must not abort cleanup of its
/// siblings. Cleanup failures are never surfaced to any caller.
fn remove_tree_best_effort(dir: &Path) {
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                remove_tree_best_effort(&path);
            } else if std::fs::remove_file(&path).is_err() {
                debug!(path = %path.display(), "could not remove file during cleanup");
            }
        }
    }
    let _ = std::fs::remove_dir(dir);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;

    #[tokio::test]
    async fn test_cleanup_removes_directory_and_expires_session() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = Arc::new(SessionStore::new(tmp.path().join("tmp")));
        let scheduler = CleanupScheduler::spawn(store.clone());

        let id = store.create_session().await.unwrap();
        store.append_chunk(&id, 0, b"payload").await.unwrap();
        let dir = store.get(&id).unwrap().dir.clone();
        assert!(dir.exists());

        scheduler.schedule(&id, &dir, Duration::from_millis(20));

        // Give the worker time to fire well past the tiny delay.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!dir.exists());
        assert!(matches!(store.status(&id).await, Err(AppError::NoSession)));
    }

    #[tokio::test]
    async fn test_cleanup_tasks_run_serially_in_order() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = Arc::new(SessionStore::new(tmp.path().join("tmp")));
        let scheduler = CleanupScheduler::spawn(store.clone());

        let first = store.create_session().await.unwrap();
        let second = store.create_session().await.unwrap();
        let first_dir = store.get(&first).unwrap().dir.clone();
        let second_dir = store.get(&second).unwrap().dir.clone();

        scheduler.schedule(&first, &first_dir, Duration::from_millis(10));
        scheduler.schedule(&second, &second_dir, Duration::from_millis(10));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!first_dir.exists());
        assert!(!second_dir.exists());
        assert_eq!(store.active_count(), 0);
    }

    #[test]
    fn test_remove_tree_handles_nested_directories() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path().join("session");
        std::fs::create_dir_all(root.join("nested/deeper")).unwrap();
        std::fs::write(root.join("stream.webm"), b"data").unwrap();
        std::fs::write(root.join("nested/deeper/log.txt"), b"log").unwrap();

        remove_tree_best_effort(&root);
        assert!(!root.exists());
    }

    #[test]
    fn test_remove_tree_tolerates_missing_directory() {
        // Deleting something that is already gone is not an error.
        remove_tree_best_effort(Path::new("/definitely/not/a/real/dir"));
    }
}
