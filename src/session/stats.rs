use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::SessionToken;
use crate::coordinator::CoordinatorHandle;
use crate::signaling::Roster;

/// Presence property holding a participant's JSON-encoded stats
pub const PROPERTY_STATS: &str = "localRecStats";

/// Local recording status a participant reports about itself
///
/// Display only: the coordinator never drives a transition from it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingStats {
    /// Session the participant is (or was last) recording
    #[serde(default, deserialize_with = "token_or_none")]
    pub current_session_token: Option<SessionToken>,

    /// Whether local recording is engaged on the participant's device
    #[serde(default)]
    pub is_recording: bool,

    /// Captured PCM bytes of the current session
    #[serde(default)]
    pub recorded_bytes: u64,

    /// Captured duration of the current session in seconds
    #[serde(default)]
    pub recorded_length: f64,
}

impl RecordingStats {
    pub fn to_property(&self) -> String {
        // plain struct of numbers and bools, serialization cannot fail
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// Parse a presence property; anything unreadable counts as not reported
    pub fn from_property(value: &str) -> Option<Self> {
        match serde_json::from_str(value) {
            Ok(stats) => Some(stats),
            Err(e) => {
                debug!("Unreadable recording stats {:?}: {}", value, e);
                None
            }
        }
    }
}

/// Tokens <= 0 mean "no session"
fn token_or_none<'de, D>(deserializer: D) -> Result<Option<SessionToken>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<i64>::deserialize(deserializer)?;
    Ok(raw.filter(|&t| t > 0).map(|t| SessionToken(t as u64)))
}

/// One row of the moderator's stats view
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantStats {
    pub id: String,
    pub display_name: String,
    /// None while the participant has not reported (or reported garbage)
    pub recording_stats: Option<RecordingStats>,
    pub is_self: bool,
}

/// Stats of every participant keyed by participant id
pub type StatsSnapshot = BTreeMap<String, ParticipantStats>;

/// Collect the stats view: remote participants from presence, plus ourselves
pub fn read_participant_stats<R: Roster + ?Sized>(roster: &R, local: RecordingStats) -> StatsSnapshot {
    let mut snapshot: StatsSnapshot = roster
        .participants()
        .into_iter()
        .map(|participant| {
            let recording_stats = participant
                .get_property(PROPERTY_STATS)
                .and_then(RecordingStats::from_property);
            let row = ParticipantStats {
                id: participant.id.clone(),
                display_name: participant.display_name,
                recording_stats,
                is_self: false,
            };
            (participant.id, row)
        })
        .collect();

    let local_id = roster.my_user_id();
    snapshot.insert(
        local_id.clone(),
        ParticipantStats {
            id: local_id,
            display_name: roster.my_display_name(),
            recording_stats: Some(local),
            is_self: true,
        },
    );

    snapshot
}

/// Refreshes the stats view on a fixed interval
///
/// Reads never block the coordinator's transitions beyond one queued request.
pub struct StatsPoller {
    task: JoinHandle<()>,
    snapshot: watch::Receiver<StatsSnapshot>,
}

impl StatsPoller {
    pub fn spawn(handle: CoordinatorHandle, interval: Duration) -> Self {
        let (tx, rx) = watch::channel(StatsSnapshot::new());

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                match handle.participants_stats().await {
                    Ok(snapshot) => {
                        tx.send_replace(snapshot);
                    }
                    Err(_) => {
                        info!("Coordinator gone, stats polling stopped");
                        break;
                    }
                }
            }
        });

        Self { task, snapshot: rx }
    }

    /// Most recent view
    pub fn latest(&self) -> StatsSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<StatsSnapshot> {
        self.snapshot.clone()
    }
}

impl Drop for StatsPoller {
    fn drop(&mut self) {
        self.task.abort();
    }
}
