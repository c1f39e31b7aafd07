use anyhow::Result;
use tokio::sync::mpsc;

/// Audio sample data (16-bit PCM, interleaved)
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Raw audio samples (i16 PCM, interleaved)
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
}

impl AudioFrame {
    /// Number of sample frames (samples per channel)
    pub fn frame_count(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    /// Replace every sample with silence, keeping the frame length
    pub fn silence(&mut self) {
        self.samples.iter_mut().for_each(|s| *s = 0);
    }
}

/// Configuration for an input device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioBackendConfig {
    /// Capture sample rate
    pub sample_rate: u32,
    /// Channel count (1 = mono, 2 = stereo)
    pub channels: u16,
    /// Duration of each delivered frame in milliseconds
    pub frame_duration_ms: u64,
}

impl Default for AudioBackendConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            frame_duration_ms: 100,
        }
    }
}

impl AudioBackendConfig {
    /// Samples per channel in one frame
    pub fn samples_per_frame(&self) -> usize {
        (self.sample_rate as u64 * self.frame_duration_ms / 1000) as usize
    }
}

/// Audio capture backend trait
///
/// One backend instance captures from exactly one input device. The host
/// supplies real capture through a [`DeviceProvider`]; this crate ships only
/// synthetic devices.
#[async_trait::async_trait]
pub trait AudioBackend: Send + Sync {
    /// Start capturing audio
    ///
    /// Returns a channel receiver that will receive audio frames
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>>;

    /// Stop capturing audio
    async fn stop(&mut self) -> Result<()>;

    /// Check if backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Opens input devices by id
pub trait DeviceProvider: Send + Sync {
    /// Create a backend bound to `device_id`; fails if the device does not exist
    fn open(&self, device_id: &str, config: &AudioBackendConfig) -> Result<Box<dyn AudioBackend>>;

    /// Ids of the devices currently known to the provider
    fn device_ids(&self) -> Vec<String>;
}
