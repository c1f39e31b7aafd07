//! In-process conference transport
//!
//! Reproduces the presence semantics of a real conference server: persistent
//! commands are re-delivered with every presence update of their owner, a
//! joining participant is not replayed anything, and deliveries to a given
//! participant can be dropped to simulate a lossy link.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::messages::{CommandMessage, PresenceMessage, TextMessage};
use super::{Command, CommandKind, InboundCommand, Participant, Roster, Signaling};
use crate::error::{RecordingError, Result};

struct Member {
    presence: PresenceMessage,
    inbox: mpsc::UnboundedSender<InboundCommand>,
}

#[derive(Default)]
struct ConferenceState {
    members: BTreeMap<String, Member>,
    /// Presence updates still to be dropped per recipient
    drops: HashMap<String, usize>,
    chat: Vec<TextMessage>,
}

/// A conference living in this process
#[derive(Clone, Default)]
pub struct MemoryConference {
    state: Arc<Mutex<ConferenceState>>,
}

impl MemoryConference {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join as `user_id`; returns the endpoint and the stream of inbound commands
    pub fn join(
        &self,
        user_id: &str,
        display_name: &str,
        moderator: bool,
    ) -> (MemoryEndpoint, mpsc::UnboundedReceiver<InboundCommand>) {
        let (inbox, commands) = mpsc::unbounded_channel();
        {
            let mut state = self.lock();
            state.members.insert(
                user_id.to_string(),
                Member {
                    presence: PresenceMessage::new(user_id, display_name, moderator),
                    inbox,
                },
            );
        }
        info!("{} joined the conference (moderator={})", user_id, moderator);

        let endpoint = MemoryEndpoint {
            conference: self.clone(),
            user_id: user_id.to_string(),
        };
        (endpoint, commands)
    }

    pub fn leave(&self, user_id: &str) {
        if self.lock().members.remove(user_id).is_some() {
            info!("{} left the conference", user_id);
        }
    }

    /// Grant or revoke moderator authority
    pub fn set_moderator(&self, user_id: &str, moderator: bool) {
        if let Some(member) = self.lock().members.get_mut(user_id) {
            member.presence.moderator = moderator;
        }
    }

    /// Drop the next `count` presence updates addressed to `user_id`
    pub fn drop_next_deliveries(&self, user_id: &str, count: usize) {
        self.lock().drops.insert(user_id.to_string(), count);
    }

    /// Chat messages sent so far
    pub fn chat_messages(&self) -> Vec<TextMessage> {
        self.lock().chat.clone()
    }

    /// Current presence of a member
    pub fn presence(&self, user_id: &str) -> Option<PresenceMessage> {
        self.lock().members.get(user_id).map(|m| m.presence.clone())
    }

    fn lock(&self) -> MutexGuard<'_, ConferenceState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn update<F>(&self, user_id: &str, change: F) -> Result<PresenceMessage>
    where
        F: FnOnce(&mut PresenceMessage),
    {
        let mut state = self.lock();
        let member = state
            .members
            .get_mut(user_id)
            .ok_or_else(|| RecordingError::Transport(format!("{} is not in the conference", user_id)))?;
        change(&mut member.presence);
        Ok(member.presence.clone())
    }

    /// Deliver a presence update of `presence.user_id` to every member
    fn broadcast(&self, mut presence: PresenceMessage, once: Vec<CommandMessage>) {
        presence.once = once;
        let commands: Vec<Command> = presence
            .dispatched_commands()
            .filter_map(|message| match Command::from_message(message) {
                Ok(command) => Some(command),
                Err(e) => {
                    warn!("Dropping malformed command from {}: {}", presence.user_id, e);
                    None
                }
            })
            .collect();

        let mut state = self.lock();
        let recipients: Vec<String> = state.members.keys().cloned().collect();
        for recipient in recipients {
            if let Some(remaining) = state.drops.get_mut(&recipient) {
                if *remaining > 0 {
                    *remaining -= 1;
                    debug!("Dropped presence of {} to {}", presence.user_id, recipient);
                    continue;
                }
            }

            if let Some(member) = state.members.get(&recipient) {
                for command in &commands {
                    let _ = member.inbox.send(InboundCommand {
                        from: presence.user_id.clone(),
                        command: *command,
                    });
                }
            }
        }
    }
}

/// One participant's handle on a [`MemoryConference`]
#[derive(Clone)]
pub struct MemoryEndpoint {
    conference: MemoryConference,
    user_id: String,
}

#[async_trait::async_trait]
impl Signaling for MemoryEndpoint {
    async fn send_command(&self, command: Command) -> Result<()> {
        let message = command.to_message();
        let presence = self.conference.update(&self.user_id, |p| {
            p.commands.insert(message.name.clone(), message);
        })?;
        self.conference.broadcast(presence, Vec::new());
        Ok(())
    }

    async fn send_command_once(&self, command: Command) -> Result<()> {
        let presence = self.conference.update(&self.user_id, |_| {})?;
        self.conference.broadcast(presence, vec![command.to_message()]);
        Ok(())
    }

    async fn remove_command(&self, kind: CommandKind) -> Result<()> {
        self.conference.update(&self.user_id, |p| {
            p.commands.remove(kind.name());
        })?;
        Ok(())
    }

    async fn set_local_property(&self, key: &str, value: &str) -> Result<()> {
        let presence = self.conference.update(&self.user_id, |p| {
            p.properties.insert(key.to_string(), value.to_string());
        })?;
        self.conference.broadcast(presence, Vec::new());
        Ok(())
    }

    async fn send_text_message(&self, text: &str) -> Result<()> {
        self.conference.lock().chat.push(TextMessage {
            from: self.user_id.clone(),
            text: text.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        });
        Ok(())
    }
}

impl Roster for MemoryEndpoint {
    fn is_moderator(&self) -> bool {
        self.conference
            .presence(&self.user_id)
            .map_or(false, |p| p.moderator)
    }

    fn my_user_id(&self) -> String {
        self.user_id.clone()
    }

    fn my_display_name(&self) -> String {
        self.conference
            .presence(&self.user_id)
            .map(|p| p.display_name)
            .unwrap_or_default()
    }

    fn participants(&self) -> Vec<Participant> {
        self.conference
            .lock()
            .members
            .values()
            .filter(|m| m.presence.user_id != self.user_id)
            .map(|m| Participant::from(&m.presence))
            .collect()
    }
}
