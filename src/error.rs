//! Error taxonomy for local recording
//!
//! Every failure inside the coordinator is converted into one of these
//! variants and then surfaced as a notify/warning event, never propagated
//! across the command-dispatch boundary.

use crate::session::SessionToken;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordingError {
    #[error("only the moderator can start or stop local recording")]
    NotModerator,

    #[error("input device {device_id} unavailable: {reason}")]
    DeviceUnavailable { device_id: String, reason: String },

    #[error("unknown recording format: {0}")]
    UnknownFormat(String),

    #[error("adapter {operation} failed for session {token}: {reason}")]
    AdapterOperationFailed {
        token: SessionToken,
        operation: &'static str,
        reason: String,
    },

    #[error("adapter {operation} timed out for session {token}")]
    Timeout {
        token: SessionToken,
        operation: &'static str,
    },

    #[error("upload failed: {0}")]
    UploadFailed(String),

    #[error("session {0} already exists")]
    SessionExists(SessionToken),

    #[error("unknown session {0}")]
    UnknownSession(SessionToken),

    #[error("session {0} already has an open segment")]
    SegmentAlreadyOpen(SessionToken),

    #[error("session {0} has no open segment")]
    NoOpenSegment(SessionToken),

    #[error("signaling error: {0}")]
    Transport(String),

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("coordinator is no longer running")]
    CoordinatorStopped,
}

impl RecordingError {
    /// Stable key used for notifications shown to the user
    pub fn message_key(&self) -> &'static str {
        match self {
            RecordingError::NotModerator => "NotModerator",
            RecordingError::DeviceUnavailable { .. } => "DeviceUnavailable",
            RecordingError::UnknownFormat(_) => "UnknownFormat",
            RecordingError::AdapterOperationFailed { .. } | RecordingError::Timeout { .. } => {
                "AdapterOperationFailed"
            }
            RecordingError::UploadFailed(_) => "UploadFailed",
            RecordingError::SessionExists(_)
            | RecordingError::UnknownSession(_)
            | RecordingError::SegmentAlreadyOpen(_)
            | RecordingError::NoOpenSegment(_) => "SessionError",
            RecordingError::Transport(_) => "TransportError",
            RecordingError::Encoding(_) => "EncodingError",
            RecordingError::CoordinatorStopped => "CoordinatorStopped",
        }
    }
}

pub type Result<T> = std::result::Result<T, RecordingError>;
