use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, warn};

use super::SessionToken;
use crate::error::{RecordingError, Result};
use crate::format::RecordingFormat;

/// One recorded interval of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub begin: DateTime<Utc>,
    /// None while the segment is still open
    pub end: Option<DateTime<Utc>>,
}

impl Segment {
    fn duration_until(&self, now: DateTime<Utc>) -> Duration {
        self.end.unwrap_or(now) - self.begin
    }
}

/// Audit record of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEntry {
    pub session_token: SessionToken,
    pub format: RecordingFormat,
    pub created_at: DateTime<Utc>,
    pub segments: Vec<Segment>,
}

impl SessionEntry {
    /// When recording first began
    pub fn begin_timestamp(&self) -> Option<DateTime<Utc>> {
        self.segments.first().map(|s| s.begin)
    }

    /// When recording last ended; None while a segment is open
    pub fn end_timestamp(&self) -> Option<DateTime<Utc>> {
        self.segments.last().and_then(|s| s.end)
    }

    pub fn has_open_segment(&self) -> bool {
        self.segments.last().map_or(false, |s| s.end.is_none())
    }

    /// Total recorded time, counting an open segment up to now
    pub fn duration(&self) -> Duration {
        let now = Utc::now();
        self.segments
            .iter()
            .fold(Duration::zero(), |total, s| total + s.duration_until(now))
    }
}

/// Tracks session tokens and their segment boundaries
///
/// Used for duration display and auditing only; recording decisions never
/// depend on it.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<SessionToken, SessionEntry>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new session; an existing token is left untouched
    pub fn create_session(&mut self, token: SessionToken, format: RecordingFormat) -> Result<()> {
        if self.sessions.contains_key(&token) {
            warn!("Session {} already exists, ignoring", token);
            return Err(RecordingError::SessionExists(token));
        }

        self.sessions.insert(
            token,
            SessionEntry {
                session_token: token,
                format,
                created_at: Utc::now(),
                segments: Vec::new(),
            },
        );
        info!("Created session {} ({})", token, format);
        Ok(())
    }

    pub fn begin_segment(&mut self, token: SessionToken) -> Result<()> {
        let entry = self
            .sessions
            .get_mut(&token)
            .ok_or(RecordingError::UnknownSession(token))?;

        if entry.has_open_segment() {
            return Err(RecordingError::SegmentAlreadyOpen(token));
        }

        entry.segments.push(Segment {
            begin: Utc::now(),
            end: None,
        });
        Ok(())
    }

    pub fn end_segment(&mut self, token: SessionToken) -> Result<()> {
        let entry = self
            .sessions
            .get_mut(&token)
            .ok_or(RecordingError::UnknownSession(token))?;

        match entry.segments.last_mut() {
            Some(segment) if segment.end.is_none() => {
                segment.end = Some(Utc::now());
                Ok(())
            }
            _ => Err(RecordingError::NoOpenSegment(token)),
        }
    }

    pub fn get(&self, token: SessionToken) -> Option<&SessionEntry> {
        self.sessions.get(&token)
    }

    /// All sessions, oldest first
    pub fn sessions(&self) -> Vec<SessionEntry> {
        let mut sessions: Vec<SessionEntry> = self.sessions.values().cloned().collect();
        sessions.sort_by_key(|s| (s.created_at, s.session_token));
        sessions
    }
}
