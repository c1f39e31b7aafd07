use crate::error::RecordingError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Audio formats a local recording session can be encoded in
///
/// The format is chosen by the moderator and travels with the START command,
/// so every participant encodes the same session the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingFormat {
    /// Native FLAC stream
    Flac,
    /// 16-bit PCM WAV (lossless)
    Wav,
    /// FLAC frames wrapped in an Ogg container
    Ogg,
}

impl RecordingFormat {
    pub const ALL: [RecordingFormat; 3] =
        [RecordingFormat::Flac, RecordingFormat::Wav, RecordingFormat::Ogg];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordingFormat::Flac => "flac",
            RecordingFormat::Wav => "wav",
            RecordingFormat::Ogg => "ogg",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            RecordingFormat::Flac => "audio/flac",
            RecordingFormat::Wav => "audio/wav",
            RecordingFormat::Ogg => "audio/ogg",
        }
    }

    /// File extension used for exported recordings
    pub fn extension(&self) -> &'static str {
        self.as_str()
    }
}

impl Default for RecordingFormat {
    fn default() -> Self {
        RecordingFormat::Flac
    }
}

impl fmt::Display for RecordingFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordingFormat {
    type Err = RecordingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "flac" => Ok(RecordingFormat::Flac),
            "wav" => Ok(RecordingFormat::Wav),
            "ogg" => Ok(RecordingFormat::Ogg),
            _ => Err(RecordingError::UnknownFormat(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_formats() {
        assert_eq!("flac".parse::<RecordingFormat>().unwrap(), RecordingFormat::Flac);
        assert_eq!("WAV".parse::<RecordingFormat>().unwrap(), RecordingFormat::Wav);
        assert_eq!(" ogg ".parse::<RecordingFormat>().unwrap(), RecordingFormat::Ogg);
    }

    #[test]
    fn test_parse_unknown_format() {
        let err = "mp3".parse::<RecordingFormat>().unwrap_err();
        assert_eq!(err, RecordingError::UnknownFormat("mp3".to_string()));
    }

    #[test]
    fn test_default_is_flac() {
        assert_eq!(RecordingFormat::default(), RecordingFormat::Flac);
    }

    #[test]
    fn test_serde_uses_lowercase_names() {
        let json = serde_json::to_string(&RecordingFormat::Ogg).unwrap();
        assert_eq!(json, "\"ogg\"");
    }
}
