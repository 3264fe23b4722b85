//! # Configuration Management
//!
//! This module handles loading and managing application configuration from
//! multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (APP_SERVER_HOST, APP_SERVER_PORT, etc.)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impl)
//!
//! Out of the box the service runs ffmpeg producing mono libopus/WebM at
//! 64 kbps and 48 kHz, with a 200 ms stream-settle window bounded by 3 s and
//! a 60 s grace period before session directories are reclaimed.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration that contains all settings.
///
/// ## Why separate config structs:
/// Breaking configuration into logical groups (server, storage, encoder,
/// upload lifecycle) makes it easier to understand and maintain as the
/// application grows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub encoder: EncoderConfig,
    pub upload: UploadConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Filesystem roots for upload storage.
///
/// ## Fields:
/// - `upload_root`: permanent storage for finished artifacts, partitioned by
///   creation date (`<upload_root>/<ISO-date>/<artifact-id>.<ext>`)
/// - `tmp_root`: per-session working directories (`<tmp_root>/<upload-id>/`)
///   holding the growing stream file, the status marker, and the encoder log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub upload_root: String,
    pub tmp_root: String,
}

/// External encoder invocation settings.
///
/// ## Fields:
/// - `program`: the encoder binary to launch (ffmpeg)
/// - `audio_codec` / `audio_bitrate` / `sample_rate` / `channels`: the audio
///   stream parameters passed through to the encoder
/// - `extension`: container extension of the final artifact (also drives the
///   reported content type)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderConfig {
    pub program: String,
    pub audio_codec: String,
    pub audio_bitrate: String,
    pub sample_rate: u32,
    pub channels: u8,
    pub extension: String,
}

/// Upload lifecycle tuning.
///
/// ## Fields:
/// - `stable_window_ms`: how long the stream file's size must stay constant
///   before finalize hands it to the encoder
/// - `stability_timeout_ms`: upper bound on the stability wait; on expiry
///   finalize logs a warning and proceeds anyway
/// - `cleanup_delay_secs`: grace period before a finalized session's
///   directory is reclaimed, so residual in-flight requests observe a status
///   rejection instead of a half-deleted directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    pub stable_window_ms: u64,
    pub stability_timeout_ms: u64,
    pub cleanup_delay_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            storage: StorageConfig {
                upload_root: "data/uploads".to_string(),
                tmp_root: "data/tmp".to_string(),
            },
            encoder: EncoderConfig {
                program: "ffmpeg".to_string(),
                audio_codec: "libopus".to_string(), // WebM's standard audio codec
                audio_bitrate: "64k".to_string(),
                sample_rate: 48000,
                channels: 1,
                extension: "webm".to_string(),
            },
            upload: UploadConfig {
                stable_window_ms: 200,
                stability_timeout_ms: 3000,
                cleanup_delay_secs: 60,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with APP_
    /// 4. Handle special cases for HOST and PORT environment variables
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER_HOST=0.0.0.0`: Override server host
    /// - `HOST=0.0.0.0` / `PORT=3000`: Special cases for deployment platforms
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        // Deployment platforms commonly inject these without the APP_ prefix.
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Server port is not 0
    /// - Storage roots are set and distinct (a shared root would let session
    ///   cleanup walk into finished artifacts)
    /// - Encoder program and stream parameters are usable
    /// - The stability window fits inside the stability timeout
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.storage.upload_root.is_empty() || self.storage.tmp_root.is_empty() {
            return Err(anyhow::anyhow!("Storage roots must not be empty"));
        }

        if self.storage.upload_root == self.storage.tmp_root {
            return Err(anyhow::anyhow!(
                "upload_root and tmp_root must be distinct directories"
            ));
        }

        if self.encoder.program.is_empty() {
            return Err(anyhow::anyhow!("Encoder program must not be empty"));
        }

        if self.encoder.sample_rate == 0 || self.encoder.channels == 0 {
            return Err(anyhow::anyhow!(
                "Encoder sample rate and channel count must be greater than 0"
            ));
        }

        if self.encoder.extension.is_empty() || self.encoder.extension.starts_with('.') {
            return Err(anyhow::anyhow!(
                "Artifact extension must be non-empty and not start with a dot"
            ));
        }

        if self.upload.stable_window_ms > self.upload.stability_timeout_ms {
            return Err(anyhow::anyhow!(
                "Stability window must not exceed the stability timeout"
            ));
        }

        Ok(())
    }

    /// Update configuration from a JSON string (used for runtime config updates).
    ///
    /// ## Partial updates:
    /// Only the fields present in the JSON are touched. For example
    /// `{"upload": {"cleanup_delay_secs": 120}}` changes just the cleanup
    /// delay. The updated configuration is validated before it is accepted.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial_config: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(server) = partial_config.get("server") {
            if let Some(host) = server.get("host").and_then(|v| v.as_str()) {
                self.server.host = host.to_string();
            }
            if let Some(port) = server.get("port").and_then(|v| v.as_u64()) {
                self.server.port = port as u16;
            }
        }

        if let Some(encoder) = partial_config.get("encoder") {
            if let Some(bitrate) = encoder.get("audio_bitrate").and_then(|v| v.as_str()) {
                self.encoder.audio_bitrate = bitrate.to_string();
            }
            if let Some(rate) = encoder.get("sample_rate").and_then(|v| v.as_u64()) {
                self.encoder.sample_rate = rate as u32;
            }
            if let Some(channels) = encoder.get("channels").and_then(|v| v.as_u64()) {
                self.encoder.channels = channels as u8;
            }
        }

        if let Some(upload) = partial_config.get("upload") {
            if let Some(window) = upload.get("stable_window_ms").and_then(|v| v.as_u64()) {
                self.upload.stable_window_ms = window;
            }
            if let Some(timeout) = upload.get("stability_timeout_ms").and_then(|v| v.as_u64()) {
                self.upload.stability_timeout_ms = timeout;
            }
            if let Some(delay) = upload.get("cleanup_delay_secs").and_then(|v| v.as_u64()) {
                self.upload.cleanup_delay_secs = delay;
            }
        }

        self.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.encoder.audio_codec, "libopus");
        assert_eq!(config.upload.stable_window_ms, 200);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.storage.tmp_root = config.storage.upload_root.clone();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.upload.stable_window_ms = 5000; // larger than the 3000 ms timeout
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_update() {
        let mut config = AppConfig::default();
        let json = r#"{"upload": {"cleanup_delay_secs": 120}, "server": {"port": 9090}}"#;
        assert!(config.update_from_json(json).is_ok());
        assert_eq!(config.upload.cleanup_delay_secs, 120);
        assert_eq!(config.server.port, 9090);
        // Untouched fields keep their values
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.encoder.audio_bitrate, "64k");
    }

    #[test]
    fn test_config_update_rejects_invalid_result() {
        let mut config = AppConfig::default();
        // A window above the timeout must not survive a runtime update
        let json = r#"{"upload": {"stable_window_ms": 10000}}"#;
        assert!(config.update_from_json(json).is_err());
    }
}
