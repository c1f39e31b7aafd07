use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::audio::AudioBackendConfig;
use crate::coordinator::CoordinatorOptions;
use crate::format::RecordingFormat;

/// Environment variables prefixed with this override file settings,
/// e.g. `LOCALREC__HTTP__PORT=8090`
pub const ENV_PREFIX: &str = "LOCALREC";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub recording: RecordingConfig,
    pub upload: UploadConfig,
    pub signaling: SignalingConfig,
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordingConfig {
    pub default_format: String,
    pub default_mic_device: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub frame_ms: u64,
    pub adapter_timeout_ms: u64,
    pub stats_interval_ms: u64,
    pub token_range_max: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    pub directory: String,
    pub public_base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignalingConfig {
    pub nats_url: String,
    pub conference: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Config {
    /// Load defaults, then `path` (any supported extension, optional), then
    /// the environment
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .set_default("recording.default_format", "flac")?
            .set_default("recording.default_mic_device", "default")?
            .set_default("recording.sample_rate", 16000)?
            .set_default("recording.channels", 1)?
            .set_default("recording.frame_ms", 100)?
            .set_default("recording.adapter_timeout_ms", 10_000)?
            .set_default("recording.stats_interval_ms", 1000)?
            .set_default("recording.token_range_max", 100_000_000)?
            .set_default("upload.directory", "~/localrec/recordings")?
            .set_default("upload.public_base_url", "http://127.0.0.1:8090/recordings")?
            .set_default("signaling.nats_url", "nats://localhost:4222")?
            .set_default("signaling.conference", "default")?
            .set_default("http.bind", "127.0.0.1")?
            .set_default("http.port", 8090)?
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .context("Failed to read configuration")?;

        settings
            .try_deserialize()
            .context("Invalid configuration")
    }

    pub fn default_format(&self) -> Result<RecordingFormat> {
        self.recording
            .default_format
            .parse()
            .with_context(|| format!("recording.default_format = {:?}", self.recording.default_format))
    }

    pub fn audio(&self) -> AudioBackendConfig {
        AudioBackendConfig {
            sample_rate: self.recording.sample_rate,
            channels: self.recording.channels,
            frame_duration_ms: self.recording.frame_ms,
        }
    }

    pub fn coordinator_options(&self) -> Result<CoordinatorOptions> {
        Ok(CoordinatorOptions {
            default_format: self.default_format()?,
            default_mic_device: self.recording.default_mic_device.clone(),
            adapter_timeout: Duration::from_millis(self.recording.adapter_timeout_ms),
            token_range_max: self.recording.token_range_max,
            stats_interval: self.stats_interval(),
        })
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.recording.stats_interval_ms)
    }

    /// Upload directory with `~` and environment variables expanded
    pub fn upload_directory(&self) -> Result<PathBuf> {
        let expanded = shellexpand::full(&self.upload.directory)
            .with_context(|| format!("Cannot expand {}", self.upload.directory))?;
        Ok(PathBuf::from(expanded.as_ref()))
    }
}
