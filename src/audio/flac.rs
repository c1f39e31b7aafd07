//! FLAC stream writer
//!
//! Writes fixed-blocksize frames with VERBATIM subframes. The output is a
//! valid FLAC stream that every decoder accepts; it trades compression for
//! an encoder small enough to live next to the capture path.

use super::encoder::{Encoder, PcmBuffer};
use crate::error::{RecordingError, Result};
use crate::format::RecordingFormat;

/// Samples per channel in each frame
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

const BITS_PER_SAMPLE: u64 = 16;

#[derive(Debug, Clone)]
pub struct FlacEncoder {
    block_size: usize,
}

impl FlacEncoder {
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size: block_size.clamp(16, u16::MAX as usize),
        }
    }
}

impl Default for FlacEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCK_SIZE)
    }
}

impl Encoder for FlacEncoder {
    fn format(&self) -> RecordingFormat {
        RecordingFormat::Flac
    }

    fn encode(&self, pcm: &PcmBuffer) -> Result<Vec<u8>> {
        validate(pcm)?;

        let mut out = Vec::with_capacity(42 + pcm.samples.len() * 2 + pcm.samples.len() / 256);
        out.extend_from_slice(b"fLaC");
        out.extend_from_slice(&metadata_block_header(true, 0, 34));
        out.extend_from_slice(&stream_info(pcm, self.block_size));

        for frame in frames(pcm, self.block_size) {
            out.extend_from_slice(&frame.bytes);
        }

        Ok(out)
    }
}

/// One encoded FLAC frame
pub(crate) struct FlacFrame {
    pub bytes: Vec<u8>,
    /// Samples per channel in this frame
    pub samples: usize,
}

pub(crate) fn validate(pcm: &PcmBuffer) -> Result<()> {
    if pcm.channels == 0 || pcm.channels > 8 {
        return Err(RecordingError::Encoding(format!(
            "FLAC supports 1-8 channels, got {}",
            pcm.channels
        )));
    }
    if pcm.sample_rate == 0 || pcm.sample_rate >= 1 << 20 {
        return Err(RecordingError::Encoding(format!(
            "Unsupported FLAC sample rate {}",
            pcm.sample_rate
        )));
    }
    Ok(())
}

/// METADATA_BLOCK_HEADER
pub(crate) fn metadata_block_header(last: bool, block_type: u8, length: u32) -> [u8; 4] {
    let len = length.to_be_bytes();
    [((last as u8) << 7) | (block_type & 0x7F), len[1], len[2], len[3]]
}

/// STREAMINFO body (34 bytes)
pub(crate) fn stream_info(pcm: &PcmBuffer, block_size: usize) -> [u8; 34] {
    let mut info = [0u8; 34];
    let block = (block_size as u16).to_be_bytes();
    info[0..2].copy_from_slice(&block);
    info[2..4].copy_from_slice(&block);
    // bytes 4..10: min/max frame size, 0 = unknown

    let packed = ((pcm.sample_rate as u64) << 44)
        | ((pcm.channels as u64 - 1) << 41)
        | ((BITS_PER_SAMPLE - 1) << 36)
        | (pcm.frame_count() as u64 & 0xF_FFFF_FFFF);
    info[10..18].copy_from_slice(&packed.to_be_bytes());
    // bytes 18..34: MD5 signature, 0 = not computed

    info
}

pub(crate) fn frames(pcm: &PcmBuffer, block_size: usize) -> Vec<FlacFrame> {
    let channels = pcm.channels as usize;
    pcm.samples
        .chunks(block_size * channels)
        .enumerate()
        .map(|(index, block)| encode_frame(block, channels, index as u64, pcm.sample_rate))
        .collect()
}

fn encode_frame(block: &[i16], channels: usize, frame_number: u64, sample_rate: u32) -> FlacFrame {
    let samples = block.len() / channels;
    let mut frame = Vec::with_capacity(16 + block.len() * 2 + channels);

    // Sync code, fixed blocking strategy
    frame.extend_from_slice(&[0xFF, 0xF8]);
    // Block size read from the end of the header (16 bit), sample rate code
    frame.push(0x70 | sample_rate_code(sample_rate));
    // Independent channels, 16 bits per sample
    frame.push((((channels - 1) as u8) << 4) | (0b100 << 1));
    frame.extend_from_slice(&utf8_number(frame_number));
    frame.extend_from_slice(&((samples - 1) as u16).to_be_bytes());
    frame.push(crc8(&frame));

    for channel in 0..channels {
        // VERBATIM subframe, no wasted bits
        frame.push(0b0000_0010);
        for sample in block.iter().skip(channel).step_by(channels) {
            frame.extend_from_slice(&sample.to_be_bytes());
        }
    }

    let crc = crc16(&frame);
    frame.extend_from_slice(&crc.to_be_bytes());

    FlacFrame {
        bytes: frame,
        samples,
    }
}

fn sample_rate_code(sample_rate: u32) -> u8 {
    match sample_rate {
        88200 => 0b0001,
        176400 => 0b0010,
        192000 => 0b0011,
        8000 => 0b0100,
        16000 => 0b0101,
        22050 => 0b0110,
        24000 => 0b0111,
        32000 => 0b1000,
        44100 => 0b1001,
        48000 => 0b1010,
        96000 => 0b1011,
        // taken from STREAMINFO
        _ => 0b0000,
    }
}

/// Frame number in FLAC's extended UTF-8 coding
fn utf8_number(value: u64) -> Vec<u8> {
    if value < 0x80 {
        return vec![value as u8];
    }

    let mut continuation = Vec::new();
    let mut rest = value;
    let mut lead_capacity = 0x3F; // payload bits left in the lead byte
    while rest > lead_capacity {
        continuation.push(0x80 | (rest & 0x3F) as u8);
        rest >>= 6;
        lead_capacity >>= 1;
    }

    let count = continuation.len() + 1;
    let prefix = !(0xFFu8 >> count);
    let mut out = vec![prefix | rest as u8];
    out.extend(continuation.into_iter().rev());
    out
}

pub(crate) fn crc8(data: &[u8]) -> u8 {
    let mut crc = 0u8;
    for &byte in data {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 { (crc << 1) ^ 0x07 } else { crc << 1 };
        }
    }
    crc
}

pub(crate) fn crc16(data: &[u8]) -> u16 {
    let mut crc = 0u16;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 { (crc << 1) ^ 0x8005 } else { crc << 1 };
        }
    }
    crc
}
