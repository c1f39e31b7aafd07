//! FLAC-in-Ogg encoder
//!
//! Follows the Ogg FLAC mapping: an identification packet carrying
//! STREAMINFO, a VORBIS_COMMENT header packet, then one FLAC frame per packet.

use super::encoder::{Encoder, PcmBuffer};
use super::flac::{self, DEFAULT_BLOCK_SIZE};
use crate::error::Result;
use crate::format::RecordingFormat;

const VENDOR: &str = "localrec";

const FLAG_CONTINUED: u8 = 0x01;
const FLAG_BOS: u8 = 0x02;
const FLAG_EOS: u8 = 0x04;

#[derive(Debug, Clone)]
pub struct OggEncoder {
    serial: u32,
    block_size: usize,
}

impl OggEncoder {
    pub fn new(serial: u32) -> Self {
        Self {
            serial,
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

impl Default for OggEncoder {
    fn default() -> Self {
        Self::new(rand::random())
    }
}

impl Encoder for OggEncoder {
    fn format(&self) -> RecordingFormat {
        RecordingFormat::Ogg
    }

    fn encode(&self, pcm: &PcmBuffer) -> Result<Vec<u8>> {
        flac::validate(pcm)?;

        let frames = flac::frames(pcm, self.block_size);
        let mut stream = OggStream::new(self.serial);

        let mut identification = Vec::with_capacity(51);
        identification.push(0x7F);
        identification.extend_from_slice(b"FLAC");
        identification.extend_from_slice(&[1, 0]); // mapping version 1.0
        identification.extend_from_slice(&1u16.to_be_bytes()); // header packets that follow
        identification.extend_from_slice(b"fLaC");
        identification.extend_from_slice(&flac::metadata_block_header(false, 0, 34));
        identification.extend_from_slice(&flac::stream_info(pcm, self.block_size));
        stream.write_packet(&identification, 0, true, false);

        stream.write_packet(&vorbis_comment(), 0, false, frames.is_empty());

        let mut granule = 0u64;
        let last = frames.len().saturating_sub(1);
        for (index, frame) in frames.iter().enumerate() {
            granule += frame.samples as u64;
            stream.write_packet(&frame.bytes, granule, false, index == last);
        }

        Ok(stream.into_bytes())
    }
}

fn vorbis_comment() -> Vec<u8> {
    let body_len = 4 + VENDOR.len() + 4;
    let mut packet = Vec::with_capacity(4 + body_len);
    packet.extend_from_slice(&flac::metadata_block_header(true, 4, body_len as u32));
    packet.extend_from_slice(&(VENDOR.len() as u32).to_le_bytes());
    packet.extend_from_slice(VENDOR.as_bytes());
    packet.extend_from_slice(&0u32.to_le_bytes()); // no user comments
    packet
}

/// Pages packets of one logical bitstream
struct OggStream {
    serial: u32,
    sequence: u32,
    out: Vec<u8>,
}

impl OggStream {
    fn new(serial: u32) -> Self {
        Self {
            serial,
            sequence: 0,
            out: Vec::new(),
        }
    }

    fn write_packet(&mut self, packet: &[u8], granule: u64, bos: bool, eos: bool) {
        let mut lacing = vec![255u8; packet.len() / 255];
        lacing.push((packet.len() % 255) as u8);

        let pages = lacing.len().div_ceil(255);
        let mut offset = 0;
        for (index, segments) in lacing.chunks(255).enumerate() {
            let first = index == 0;
            let last = index + 1 == pages;

            let mut flags = 0;
            if !first {
                flags |= FLAG_CONTINUED;
            }
            if bos && first {
                flags |= FLAG_BOS;
            }
            if eos && last {
                flags |= FLAG_EOS;
            }

            // pages on which no packet ends carry granule -1
            let page_granule = if last { granule } else { u64::MAX };
            let len: usize = segments.iter().map(|&s| s as usize).sum();
            self.write_page(flags, page_granule, segments, &packet[offset..offset + len]);
            offset += len;
        }
    }

    fn write_page(&mut self, flags: u8, granule: u64, segments: &[u8], body: &[u8]) {
        let start = self.out.len();
        self.out.extend_from_slice(b"OggS");
        self.out.push(0); // stream structure version
        self.out.push(flags);
        self.out.extend_from_slice(&granule.to_le_bytes());
        self.out.extend_from_slice(&self.serial.to_le_bytes());
        self.out.extend_from_slice(&self.sequence.to_le_bytes());
        self.out.extend_from_slice(&[0; 4]); // checksum placeholder
        self.out.push(segments.len() as u8);
        self.out.extend_from_slice(segments);
        self.out.extend_from_slice(body);

        let crc = crc32(&self.out[start..]);
        self.out[start + 22..start + 26].copy_from_slice(&crc.to_le_bytes());
        self.sequence += 1;
    }

    fn into_bytes(self) -> Vec<u8> {
        self.out
    }
}

fn crc32(data: &[u8]) -> u32 {
    let mut crc = 0u32;
    for &byte in data {
        crc ^= (byte as u32) << 24;
        for _ in 0..8 {
            crc = if crc & 0x8000_0000 != 0 {
                (crc << 1) ^ 0x04C1_1DB7
            } else {
                crc << 1
            };
        }
    }
    crc
}
