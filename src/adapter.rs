//! Recording adapters
//!
//! An adapter owns the capture and encoder resources of exactly one session.
//! Every format shares the [`RecordingAdapter`] contract; the
//! [`AdapterRegistry`] maps a format to the constructor that builds it.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::audio::{
    AudioBackendConfig, CaptureEngine, DeviceProvider, Encoder, FlacEncoder, OggEncoder,
    PcmBuffer, WavEncoder,
};
use crate::error::{RecordingError, Result};
use crate::format::RecordingFormat;

/// Finished payload of one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedData {
    pub data: Vec<u8>,
    pub format: RecordingFormat,
}

/// Captured amount so far
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RecordingProgress {
    /// Captured PCM bytes
    pub bytes: u64,
    /// Captured duration in seconds
    pub length_secs: f64,
}

/// Capture lifecycle of one codec
#[async_trait::async_trait]
pub trait RecordingAdapter: Send + Sync {
    fn format(&self) -> RecordingFormat;

    /// Begin capturing from `device_id`
    async fn start(&mut self, device_id: &str) -> Result<()>;

    /// Muted adapters keep encoding, but silence
    fn set_muted(&mut self, muted: bool);

    /// Swap the input device without ending the session
    async fn set_mic_device(&mut self, device_id: &str) -> Result<()>;

    /// Finalize the encoder; the adapter stays queryable
    async fn stop(&mut self) -> Result<()>;

    /// Finished payload, available any number of times after `stop`
    async fn export_recorded_data(&self) -> Result<RecordedData>;

    fn progress(&self) -> RecordingProgress;
}

/// Adapter that captures PCM and encodes it on export
pub struct EncodingAdapter {
    encoder: Arc<dyn Encoder>,
    capture: CaptureEngine,
    finished: Option<PcmBuffer>,
}

impl EncodingAdapter {
    pub fn new(encoder: Arc<dyn Encoder>, capture: CaptureEngine) -> Self {
        Self {
            encoder,
            capture,
            finished: None,
        }
    }
}

#[async_trait::async_trait]
impl RecordingAdapter for EncodingAdapter {
    fn format(&self) -> RecordingFormat {
        self.encoder.format()
    }

    async fn start(&mut self, device_id: &str) -> Result<()> {
        if self.finished.is_some() {
            return Err(RecordingError::Encoding(
                "adapter already finished its session".to_string(),
            ));
        }
        self.capture.start(device_id).await?;
        info!("{} adapter capturing from {}", self.format(), device_id);
        Ok(())
    }

    fn set_muted(&mut self, muted: bool) {
        self.capture.set_muted(muted);
    }

    async fn set_mic_device(&mut self, device_id: &str) -> Result<()> {
        if !self.capture.is_capturing() {
            return Err(RecordingError::DeviceUnavailable {
                device_id: device_id.to_string(),
                reason: "adapter is not capturing".to_string(),
            });
        }
        self.capture.switch_device(device_id).await
    }

    async fn stop(&mut self) -> Result<()> {
        if self.finished.is_some() {
            return Ok(());
        }
        if !self.capture.is_capturing() {
            return Err(RecordingError::Encoding("adapter was never started".to_string()));
        }

        let pcm = self.capture.stop().await;
        info!(
            "{} adapter stopped: {:.1}s captured ({} samples)",
            self.format(),
            pcm.duration_secs(),
            pcm.samples.len()
        );
        self.finished = Some(pcm);
        Ok(())
    }

    async fn export_recorded_data(&self) -> Result<RecordedData> {
        let pcm = self
            .finished
            .clone()
            .ok_or_else(|| RecordingError::Encoding("recording is not finished".to_string()))?;

        let encoder = Arc::clone(&self.encoder);
        let data = tokio::task::spawn_blocking(move || encoder.encode(&pcm))
            .await
            .map_err(|e| RecordingError::Encoding(format!("Encoder task failed: {}", e)))??;

        debug!("Exported {} bytes of {}", data.len(), self.format());
        Ok(RecordedData {
            data,
            format: self.format(),
        })
    }

    fn progress(&self) -> RecordingProgress {
        let (bytes, length_secs) = match &self.finished {
            Some(pcm) => (pcm.byte_len(), pcm.duration_secs()),
            None => self.capture.progress(),
        };
        RecordingProgress { bytes, length_secs }
    }
}

/// What every adapter constructor gets to build with
#[derive(Clone)]
pub struct AdapterContext {
    pub devices: Arc<dyn DeviceProvider>,
    pub audio: AudioBackendConfig,
}

pub type AdapterConstructor =
    Arc<dyn Fn(&AdapterContext) -> Box<dyn RecordingAdapter> + Send + Sync>;

/// Format → adapter constructor
pub struct AdapterRegistry {
    context: AdapterContext,
    constructors: HashMap<RecordingFormat, AdapterConstructor>,
}

impl AdapterRegistry {
    /// Registry without any format
    pub fn empty(context: AdapterContext) -> Self {
        Self {
            context,
            constructors: HashMap::new(),
        }
    }

    /// Registry with the built-in FLAC, WAV and Ogg adapters
    pub fn new(context: AdapterContext) -> Self {
        let mut registry = Self::empty(context);
        registry.register(RecordingFormat::Flac, encoding_adapter(FlacEncoder::default));
        registry.register(RecordingFormat::Wav, encoding_adapter(|| WavEncoder));
        registry.register(RecordingFormat::Ogg, encoding_adapter(OggEncoder::default));
        registry
    }

    pub fn register(&mut self, format: RecordingFormat, constructor: AdapterConstructor) {
        self.constructors.insert(format, constructor);
    }

    pub fn supports(&self, format: RecordingFormat) -> bool {
        self.constructors.contains_key(&format)
    }

    pub fn formats(&self) -> Vec<RecordingFormat> {
        let mut formats: Vec<_> = self.constructors.keys().copied().collect();
        formats.sort();
        formats
    }

    pub fn create(&self, format: RecordingFormat) -> Result<Box<dyn RecordingAdapter>> {
        let constructor = self
            .constructors
            .get(&format)
            .ok_or_else(|| RecordingError::UnknownFormat(format.to_string()))?;

        debug!("Creating recording adapter for {} format", format);
        Ok(constructor(&self.context))
    }
}

/// Constructor for an [`EncodingAdapter`] using a fresh encoder per session
pub fn encoding_adapter<E, F>(make_encoder: F) -> AdapterConstructor
where
    E: Encoder + 'static,
    F: Fn() -> E + Send + Sync + 'static,
{
    Arc::new(move |context: &AdapterContext| {
        let capture = CaptureEngine::new(Arc::clone(&context.devices), context.audio.clone());
        Box::new(EncodingAdapter::new(Arc::new(make_encoder()), capture)) as Box<dyn RecordingAdapter>
    })
}
