use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Command as carried in presence: a name plus string attributes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandMessage {
    pub name: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

/// One participant's presence
///
/// Persistent commands stay in `commands` until removed and are re-sent
/// with every presence update; `once` commands ride along a single update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceMessage {
    pub user_id: String,
    pub display_name: String,
    #[serde(default)]
    pub moderator: bool,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    #[serde(default)]
    pub commands: BTreeMap<String, CommandMessage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub once: Vec<CommandMessage>,
    /// Set on the last presence a participant sends before leaving
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub left: bool,
}

impl PresenceMessage {
    pub fn new(user_id: &str, display_name: &str, moderator: bool) -> Self {
        Self {
            user_id: user_id.to_string(),
            display_name: display_name.to_string(),
            moderator,
            ..Self::default()
        }
    }

    /// Commands a receiver dispatches for this update, persistent first
    pub fn dispatched_commands(&self) -> impl Iterator<Item = &CommandMessage> {
        self.commands.values().chain(self.once.iter())
    }
}

/// Chat message carrying a recording link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextMessage {
    pub from: String,
    pub text: String,
    pub timestamp: String, // RFC3339 timestamp
}
