//! # Encoder Invocation
//!
//! The external transcoder is treated as an opaque synchronous subprocess
//! behind a narrow trait, so the finalize logic is testable with a fake
//! encoder that succeeds, fails, or writes whatever a test needs, without
//! ever spawning a real binary.
//!
//! The production implementation launches ffmpeg against the assembled
//! stream file and blocks the calling task until the process exits, capturing
//! the combined stdout/stderr text as it runs.

use crate::config::EncoderConfig;
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// One encode request: the assembled stream in, the final artifact out.
///
/// The working directory is the session directory, so relative artifacts the
/// encoder produces (list files, logs) land next to the stream.
#[derive(Debug, Clone)]
pub struct EncodeJob {
    pub work_dir: PathBuf,
    pub input: PathBuf,
    pub output: PathBuf,
}

/// Narrow seam around the external transcoding process.
///
/// ## Contract:
/// On success the implementation has produced `job.output` and returns the
/// captured process log. A non-zero exit surfaces as
/// `AppError::EncodingFailed { code, log }`; a failure to launch at all is
/// `AppError::Internal`.
#[async_trait]
pub trait StreamEncoder: Send + Sync {
    async fn encode(&self, job: &EncodeJob) -> AppResult<String>;
}

/// Production encoder: ffmpeg with timestamp regeneration, video dropped,
/// and the configured audio codec/bitrate/sample-rate/channel parameters.
pub struct FfmpegEncoder {
    config: EncoderConfig,
}

impl FfmpegEncoder {
    pub fn new(config: EncoderConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl StreamEncoder for FfmpegEncoder {
    async fn encode(&self, job: &EncodeJob) -> AppResult<String> {
        debug!(
            program = %self.config.program,
            input = %job.input.display(),
            output = %job.output.display(),
            "launching encoder"
        );

        let output = Command::new(&self.config.program)
            .current_dir(&job.work_dir)
            // Always overwrite an existing output file
            .arg("-y")
            // Regenerate presentation timestamps; the concatenated chunks
            // only carry container headers in the very first fragment
            .arg("-fflags")
            .arg("+genpts")
            .arg("-i")
            .arg(&job.input)
            // Drop any video stream
            .arg("-vn")
            .arg("-c:a")
            .arg(&self.config.audio_codec)
            .arg("-b:a")
            .arg(&self.config.audio_bitrate)
            .arg("-ar")
            .arg(self.config.sample_rate.to_string())
            .arg("-ac")
            .arg(self.config.channels.to_string())
            .arg(&job.output)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|err| {
                AppError::Internal(format!(
                    "failed to launch encoder '{}': {}",
                    self.config.program, err
                ))
            })?;

        let mut log = String::from_utf8_lossy(&output.stdout).into_owned();
        log.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            return Err(AppError::EncodingFailed {
                code: output.status.code().unwrap_or(-1),
                log,
            });
        }

        Ok(log)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_program(program: &str) -> EncoderConfig {
        EncoderConfig {
            program: program.to_string(),
            audio_codec: "libopus".to_string(),
            audio_bitrate: "64k".to_string(),
            sample_rate: 48000,
            channels: 1,
            extension: "webm".to_string(),
        }
    }

    #[tokio::test]
    async fn test_missing_program_is_internal_error() {
        let encoder = FfmpegEncoder::new(config_with_program("definitely-not-an-encoder-binary"));

        let tmp = tempfile::TempDir::new().unwrap();
        let job = EncodeJob {
            work_dir: tmp.path().to_path_buf(),
            input: tmp.path().join("stream.webm"),
            output: tmp.path().join("out.webm"),
        };
        let err = encoder.encode(&job).await.unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));
    }

    #[tokio::test]
    async fn test_nonzero_exit_maps_to_encoding_failed() {
        // /bin/sh stands in for ffmpeg: it rejects the encoder flags with a
        // non-zero exit, which must surface as EncodingFailed.
        let encoder = FfmpegEncoder::new(config_with_program("/bin/sh"));
        let tmp = tempfile::TempDir::new().unwrap();
        let job = EncodeJob {
            work_dir: tmp.path().to_path_buf(),
            input: tmp.path().join("stream.webm"),
            output: tmp.path().join("out.webm"),
        };
        let err = encoder.encode(&job).await.unwrap_err();
        assert!(matches!(err, AppError::EncodingFailed { .. }));
    }
}
