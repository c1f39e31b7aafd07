//! Recording session bookkeeping
//!
//! This module provides:
//! - `SessionToken`: the identifier correlating one recording attempt across participants
//! - `SessionRegistry`: begin/end segments of each session for duration accounting
//! - `RecordingStats`: the per-participant status record shared over presence

mod registry;
mod stats;

pub use registry::{SessionEntry, SessionRegistry, Segment};
pub use stats::{
    read_participant_stats, ParticipantStats, RecordingStats, StatsPoller, StatsSnapshot,
    PROPERTY_STATS,
};

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Largest token the moderator draws by default
pub const DEFAULT_TOKEN_RANGE_MAX: u64 = 100_000_000;

/// Opaque positive identifier of one recording session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(pub u64);

impl SessionToken {
    /// Draw a token in `1..=max`; collisions are accepted as negligible
    pub fn random(max: u64) -> Self {
        SessionToken(rand::thread_rng().gen_range(1..=max.max(1)))
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for SessionToken {
    fn from(value: u64) -> Self {
        SessionToken(value)
    }
}
