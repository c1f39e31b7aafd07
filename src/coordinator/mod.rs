//! Distributed recording coordinator
//!
//! One coordinator runs per participant. The moderator drives sessions by
//! broadcasting START/STOP over the conference; every participant (the
//! moderator included) reacts to those commands by driving a local
//! recording adapter through the controller state machine.

mod handle;
mod machine;

pub use handle::{CoordinatorHandle, CoordinatorStatus};
pub use machine::Coordinator;

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::format::RecordingFormat;
use crate::session::{SessionToken, DEFAULT_TOKEN_RANGE_MAX};

/// Controller state of the local participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControllerState {
    Idle,
    Starting,
    Recording,
    Stopping,
    Failed,
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ControllerState::Idle => "IDLE",
            ControllerState::Starting => "STARTING",
            ControllerState::Recording => "RECORDING",
            ControllerState::Stopping => "STOPPING",
            ControllerState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Things the host UI may want to show
#[derive(Debug, Clone, PartialEq)]
pub enum CoordinatorEvent {
    StateChanged {
        from: ControllerState,
        to: ControllerState,
    },
    /// Local recording indicator on/off
    RecordingActive(bool),
    /// Informational notification keyed by a stable message key
    Notify {
        key: String,
        params: BTreeMap<String, String>,
    },
    /// Something went wrong; `key` is [`RecordingError::message_key`](crate::RecordingError::message_key)
    Warning { key: String, message: String },
    Exported {
        session_token: SessionToken,
        format: RecordingFormat,
        bytes: usize,
    },
    Uploaded {
        session_token: SessionToken,
        url: String,
    },
}

#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    /// Format of the next session this participant starts
    pub default_format: RecordingFormat,
    pub default_mic_device: String,
    /// Upper bound for one adapter start/stop
    pub adapter_timeout: Duration,
    /// Tokens are drawn from `1..=token_range_max`
    pub token_range_max: u64,
    /// How often a recording participant republishes its stats
    pub stats_interval: Duration,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            default_format: RecordingFormat::default(),
            default_mic_device: "default".to_string(),
            adapter_timeout: Duration::from_secs(10),
            token_range_max: DEFAULT_TOKEN_RANGE_MAX,
            stats_interval: Duration::from_secs(1),
        }
    }
}

#[cfg(test)]
mod tests;
