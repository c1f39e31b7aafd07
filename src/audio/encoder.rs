use crate::error::Result;
use crate::format::RecordingFormat;

/// Captured PCM for one session (16-bit, interleaved)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmBuffer {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl PcmBuffer {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            samples: Vec::new(),
            sample_rate,
            channels,
        }
    }

    /// Samples per channel
    pub fn frame_count(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    pub fn byte_len(&self) -> u64 {
        self.samples.len() as u64 * 2
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frame_count() as f64 / self.sample_rate as f64
    }
}

/// Turns captured PCM into a finished payload
pub trait Encoder: Send + Sync {
    fn format(&self) -> RecordingFormat;

    fn encode(&self, pcm: &PcmBuffer) -> Result<Vec<u8>>;
}
