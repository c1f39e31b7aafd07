//! Signaling contract between the coordinator and the conference transport
//!
//! Commands travel inside participant presence: `send_command` keeps a
//! command in the local presence until `remove_command`, `send_command_once`
//! attaches it to a single presence update. Receivers get every command of
//! every presence update they see, including their own.

pub mod memory;
pub mod messages;
pub mod nats;

pub use memory::{MemoryConference, MemoryEndpoint};
pub use messages::{CommandMessage, PresenceMessage, TextMessage};
pub use nats::NatsSignaling;

use std::collections::BTreeMap;

use crate::error::{RecordingError, Result};
use crate::format::RecordingFormat;
use crate::session::SessionToken;

/// Signals every participant to start local recording (moderator only)
pub const COMMAND_START: &str = "localRecStart";

/// Signals every participant to stop local recording (moderator only)
pub const COMMAND_STOP: &str = "localRecStop";

/// Sent once by a joining participant to make the moderator resend presence
pub const COMMAND_PING: &str = "localRecPing";

/// Moderator's content-free answer to a ping; it only forces a presence update
pub const COMMAND_PONG: &str = "localRecPong";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Start,
    Stop,
    Ping,
    Pong,
}

impl CommandKind {
    pub fn name(&self) -> &'static str {
        match self {
            CommandKind::Start => COMMAND_START,
            CommandKind::Stop => COMMAND_STOP,
            CommandKind::Ping => COMMAND_PING,
            CommandKind::Pong => COMMAND_PONG,
        }
    }
}

/// Typed recording command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start {
        session_token: SessionToken,
        format: RecordingFormat,
    },
    Stop {
        session_token: SessionToken,
    },
    Ping,
    Pong,
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Start { .. } => CommandKind::Start,
            Command::Stop { .. } => CommandKind::Stop,
            Command::Ping => CommandKind::Ping,
            Command::Pong => CommandKind::Pong,
        }
    }

    pub fn to_message(&self) -> CommandMessage {
        let mut attributes = BTreeMap::new();
        match self {
            Command::Start {
                session_token,
                format,
            } => {
                attributes.insert("sessionToken".to_string(), session_token.to_string());
                attributes.insert("format".to_string(), format.to_string());
            }
            Command::Stop { session_token } => {
                attributes.insert("sessionToken".to_string(), session_token.to_string());
            }
            Command::Ping | Command::Pong => {}
        }

        CommandMessage {
            name: self.kind().name().to_string(),
            attributes,
        }
    }

    pub fn from_message(message: &CommandMessage) -> Result<Self> {
        match message.name.as_str() {
            COMMAND_START => Ok(Command::Start {
                session_token: session_token(message)?,
                format: attribute(message, "format")?.parse()?,
            }),
            COMMAND_STOP => Ok(Command::Stop {
                session_token: session_token(message)?,
            }),
            COMMAND_PING => Ok(Command::Ping),
            COMMAND_PONG => Ok(Command::Pong),
            other => Err(RecordingError::Transport(format!("unknown command {}", other))),
        }
    }
}

fn attribute<'a>(message: &'a CommandMessage, key: &str) -> Result<&'a str> {
    message.attributes.get(key).map(String::as_str).ok_or_else(|| {
        RecordingError::Transport(format!("{} is missing attribute {}", message.name, key))
    })
}

fn session_token(message: &CommandMessage) -> Result<SessionToken> {
    let raw = attribute(message, "sessionToken")?;
    raw.trim()
        .parse::<u64>()
        .ok()
        .filter(|&token| token > 0)
        .map(SessionToken)
        .ok_or_else(|| RecordingError::Transport(format!("invalid session token {:?}", raw)))
}

/// A command as delivered by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundCommand {
    /// Participant whose presence carried the command
    pub from: String,
    pub command: Command,
}

/// A remote participant as seen in the roster
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Participant {
    pub id: String,
    pub display_name: String,
    pub is_moderator: bool,
    pub properties: BTreeMap<String, String>,
}

impl Participant {
    pub fn get_property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

impl From<&PresenceMessage> for Participant {
    fn from(presence: &PresenceMessage) -> Self {
        Self {
            id: presence.user_id.clone(),
            display_name: presence.display_name.clone(),
            is_moderator: presence.moderator,
            properties: presence.properties.clone(),
        }
    }
}

/// Command and presence-property transport
#[async_trait::async_trait]
pub trait Signaling: Send + Sync {
    /// Keep `command` in the local presence and broadcast it
    async fn send_command(&self, command: Command) -> Result<()>;

    /// Broadcast `command` with a single presence update
    async fn send_command_once(&self, command: Command) -> Result<()>;

    /// Drop a persistent command from the local presence (not broadcast by itself)
    async fn remove_command(&self, kind: CommandKind) -> Result<()>;

    /// Set a property of the local participant and broadcast presence
    async fn set_local_property(&self, key: &str, value: &str) -> Result<()>;

    /// Send a chat message to the conference
    async fn send_text_message(&self, text: &str) -> Result<()>;
}

/// Participant roster and authority
pub trait Roster: Send + Sync {
    fn is_moderator(&self) -> bool;

    fn my_user_id(&self) -> String;

    fn my_display_name(&self) -> String;

    /// Remote participants (the local participant excluded)
    fn participants(&self) -> Vec<Participant>;
}

/// Everything the coordinator needs from the hosting conference
pub trait Conference: Signaling + Roster {}

impl<T: Signaling + Roster> Conference for T {}
