use std::io::Cursor;

use super::encoder::{Encoder, PcmBuffer};
use crate::error::{RecordingError, Result};
use crate::format::RecordingFormat;

/// 16-bit PCM WAV encoder
#[derive(Debug, Default, Clone)]
pub struct WavEncoder;

impl Encoder for WavEncoder {
    fn format(&self) -> RecordingFormat {
        RecordingFormat::Wav
    }

    fn encode(&self, pcm: &PcmBuffer) -> Result<Vec<u8>> {
        let spec = hound::WavSpec {
            channels: pcm.channels,
            sample_rate: pcm.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut cursor = Cursor::new(Vec::with_capacity(44 + pcm.samples.len() * 2));
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).map_err(encoding)?;
            let mut samples = writer.get_i16_writer(pcm.samples.len() as u32);
            for &sample in &pcm.samples {
                samples.write_sample(sample);
            }
            samples.flush().map_err(encoding)?;
            writer.finalize().map_err(encoding)?;
        }

        Ok(cursor.into_inner())
    }
}

fn encoding(e: hound::Error) -> RecordingError {
    RecordingError::Encoding(format!("Failed to write WAV: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wav_roundtrip_through_hound() -> Result<()> {
        let pcm = PcmBuffer {
            samples: vec![100, -200, 300, -400, 500, -600],
            sample_rate: 16000,
            channels: 2,
        };

        let bytes = WavEncoder.encode(&pcm)?;
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");

        let reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.spec().sample_rate, 16000);
        let decoded: Vec<i16> = reader.into_samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(decoded, pcm.samples);
        Ok(())
    }

    #[test]
    fn test_empty_wav_is_valid() -> Result<()> {
        let bytes = WavEncoder.encode(&PcmBuffer::new(16000, 1))?;
        let reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.len(), 0);
        Ok(())
    }
}
