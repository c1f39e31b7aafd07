pub mod adapter;
pub mod audio;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod format;
pub mod http;
pub mod session;
pub mod signaling;
pub mod upload;

pub use adapter::{
    AdapterContext, AdapterRegistry, EncodingAdapter, RecordedData, RecordingAdapter,
    RecordingProgress,
};
pub use audio::{
    AudioBackend, AudioBackendConfig, AudioFrame, CaptureEngine, DeviceProvider, PcmBuffer,
    SyntheticDevice, SyntheticDevices,
};
pub use config::Config;
pub use coordinator::{
    ControllerState, Coordinator, CoordinatorEvent, CoordinatorHandle, CoordinatorOptions,
    CoordinatorStatus,
};
pub use error::RecordingError;
pub use format::RecordingFormat;
pub use http::{create_router, AppState};
pub use session::{RecordingStats, SessionRegistry, SessionToken, StatsPoller};
pub use signaling::{
    Command, Conference, InboundCommand, MemoryConference, NatsSignaling, Roster, Signaling,
};
pub use upload::{DirectoryUploadSink, UploadSink};
