//! # Stream Stability Detection
//!
//! Chunk delivery is asynchronous, so a finalize request can race the very
//! last chunk append. A bare "size != 0" check could hand a still-growing
//! stream to the encoder mid-write; instead the file's size is polled until
//! it has stayed constant for a short settle window.

use std::path::Path;
use std::time::Duration;
use tokio::time::{sleep, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Wait until `path`'s size is positive and has remained unchanged for
/// `stable_window` continuously.
///
/// ## Returns:
/// - `true` once the size settles within the window
/// - `false` if `timeout` elapses first, or if the file never comes into
///   existence within the timeout
///
/// Whenever the observed size changes, the settle clock restarts; a file
/// that keeps growing until the deadline therefore reports `false`.
pub async fn wait_file_stable(path: &Path, stable_window: Duration, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    let mut last_size: Option<u64> = None;
    let mut last_change = Instant::now();

    loop {
        let now = Instant::now();

        if let Ok(meta) = tokio::fs::metadata(path).await {
            let size = meta.len();
            if Some(size) != last_size {
                last_size = Some(size);
                last_change = now;
            }
            if size > 0 && now.duration_since(last_change) >= stable_window {
                return true;
            }
        }

        if now >= deadline {
            return false;
        }
        sleep(POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_settled_file_reports_stable() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("stream.webm");
        tokio::fs::write(&path, b"settled bytes").await.unwrap();

        let stable = wait_file_stable(
            &path,
            Duration::from_millis(100),
            Duration::from_secs(2),
        )
        .await;
        assert!(stable);
    }

    #[tokio::test]
    async fn test_missing_file_times_out() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("never-created");

        let start = Instant::now();
        let stable = wait_file_stable(
            &path,
            Duration::from_millis(50),
            Duration::from_millis(200),
        )
        .await;
        assert!(!stable);
        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_growing_file_times_out() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("stream.webm");

        // Writer appends faster than the settle window for the whole timeout.
        let writer_path = path.clone();
        let writer = tokio::spawn(async move {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&writer_path)
                .await
                .unwrap();
            for _ in 0..20 {
                file.write_all(&[0u8; 64]).await.unwrap();
                file.flush().await.unwrap();
                sleep(Duration::from_millis(30)).await;
            }
        });

        let stable = wait_file_stable(
            &path,
            Duration::from_millis(250),
            Duration::from_millis(500),
        )
        .await;
        assert!(!stable);

        writer.abort();
    }

    #[tokio::test]
    async fn test_file_stabilizing_late_still_reports_stable() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("stream.webm");

        // A couple of appends, then silence: the detector should report true
        // roughly one settle window after the last write.
        let writer_path = path.clone();
        tokio::spawn(async move {
            for _ in 0..3 {
                let mut file = tokio::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&writer_path)
                    .await
                    .unwrap();
                file.write_all(b"chunk").await.unwrap();
                file.flush().await.unwrap();
                sleep(Duration::from_millis(40)).await;
            }
        });

        let stable = wait_file_stable(
            &path,
            Duration::from_millis(150),
            Duration::from_secs(3),
        )
        .await;
        assert!(stable);
    }
}
