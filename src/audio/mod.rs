pub mod backend;
pub mod capture;
pub mod encoder;
pub mod flac;
pub mod ogg;
pub mod synthetic;
pub mod wav;

pub use backend::{AudioBackend, AudioBackendConfig, AudioFrame, DeviceProvider};
pub use capture::CaptureEngine;
pub use encoder::{Encoder, PcmBuffer};
pub use flac::FlacEncoder;
pub use ogg::OggEncoder;
pub use synthetic::{SyntheticBackend, SyntheticDevice, SyntheticDevices};
pub use wav::WavEncoder;
