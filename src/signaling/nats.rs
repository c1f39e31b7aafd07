use anyhow::{Context, Result as AnyResult};
use async_nats::Client;
use futures::stream::StreamExt;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::messages::{CommandMessage, PresenceMessage, TextMessage};
use super::{Command, CommandKind, InboundCommand, Participant, Roster, Signaling};
use crate::error::{RecordingError, Result};

/// Conference transport over NATS
///
/// Each participant publishes its full presence on
/// `localrec.<conference>.presence`; chat goes to `localrec.<conference>.chat`.
pub struct NatsSignaling {
    client: Client,
    conference: String,
    local: Mutex<PresenceMessage>,
    roster: Arc<RwLock<BTreeMap<String, PresenceMessage>>>,
    listener: JoinHandle<()>,
}

impl NatsSignaling {
    /// Connect to NATS and join `conference`
    pub async fn connect(
        url: &str,
        conference: &str,
        user_id: &str,
        display_name: &str,
        moderator: bool,
    ) -> AnyResult<(Self, mpsc::UnboundedReceiver<InboundCommand>)> {
        info!("Connecting to NATS at {}", url);

        let client = async_nats::connect(url)
            .await
            .context("Failed to connect to NATS")?;

        info!("Connected to NATS successfully");

        let subject = presence_subject(conference);
        let mut subscriber = client
            .subscribe(subject.clone())
            .await
            .context("Failed to subscribe to presence")?;

        info!("Subscribed to {}", subject);

        let (tx, rx) = mpsc::unbounded_channel();
        let roster = Arc::new(RwLock::new(BTreeMap::new()));
        let listener_roster = Arc::clone(&roster);
        let local_id = user_id.to_string();

        let listener = tokio::spawn(async move {
            while let Some(msg) = subscriber.next().await {
                match serde_json::from_slice::<PresenceMessage>(&msg.payload) {
                    Ok(presence) => {
                        Self::on_presence(&local_id, &listener_roster, &tx, presence);
                    }
                    Err(e) => {
                        warn!("Failed to parse presence message: {}", e);
                    }
                }
            }
            info!("Presence listener stopped");
        });

        let signaling = Self {
            client,
            conference: conference.to_string(),
            local: Mutex::new(PresenceMessage::new(user_id, display_name, moderator)),
            roster,
            listener,
        };

        // Announce ourselves so the others learn about us
        signaling.publish(Vec::new()).await?;

        Ok((signaling, rx))
    }

    /// Announce departure and stop listening
    pub async fn leave(&self) -> Result<()> {
        let mut presence = self.local().clone();
        presence.left = true;
        presence.commands.clear();
        self.publish_presence(&presence).await?;
        self.listener.abort();
        Ok(())
    }

    fn on_presence(
        local_id: &str,
        roster: &RwLock<BTreeMap<String, PresenceMessage>>,
        tx: &mpsc::UnboundedSender<InboundCommand>,
        presence: PresenceMessage,
    ) {
        if presence.user_id != local_id {
            let mut roster = roster.write().unwrap_or_else(|e| e.into_inner());
            if presence.left {
                info!("{} left the conference", presence.user_id);
                roster.remove(&presence.user_id);
                return;
            }
            roster.insert(presence.user_id.clone(), presence.clone());
        }

        for message in presence.dispatched_commands() {
            match Command::from_message(message) {
                Ok(command) => {
                    let _ = tx.send(InboundCommand {
                        from: presence.user_id.clone(),
                        command,
                    });
                }
                Err(e) => debug!("Ignoring command from {}: {}", presence.user_id, e),
            }
        }
    }

    fn local(&self) -> std::sync::MutexGuard<'_, PresenceMessage> {
        self.local.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn publish(&self, once: Vec<CommandMessage>) -> Result<()> {
        let mut presence = self.local().clone();
        presence.once = once;
        self.publish_presence(&presence).await
    }

    async fn publish_presence(&self, presence: &PresenceMessage) -> Result<()> {
        let payload = serde_json::to_vec(presence)
            .map_err(|e| RecordingError::Transport(e.to_string()))?;

        self.client
            .publish(presence_subject(&self.conference), payload.into())
            .await
            .map_err(|e| RecordingError::Transport(format!("Failed to publish presence: {}", e)))?;

        debug!(
            "Published presence of {} ({} commands, {} once)",
            presence.user_id,
            presence.commands.len(),
            presence.once.len()
        );
        Ok(())
    }
}

#[async_trait::async_trait]
impl Signaling for NatsSignaling {
    async fn send_command(&self, command: Command) -> Result<()> {
        let message = command.to_message();
        self.local().commands.insert(message.name.clone(), message);
        self.publish(Vec::new()).await
    }

    async fn send_command_once(&self, command: Command) -> Result<()> {
        self.publish(vec![command.to_message()]).await
    }

    async fn remove_command(&self, kind: CommandKind) -> Result<()> {
        self.local().commands.remove(kind.name());
        Ok(())
    }

    async fn set_local_property(&self, key: &str, value: &str) -> Result<()> {
        self.local()
            .properties
            .insert(key.to_string(), value.to_string());
        self.publish(Vec::new()).await
    }

    async fn send_text_message(&self, text: &str) -> Result<()> {
        let message = TextMessage {
            from: self.my_user_id(),
            text: text.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        let payload = serde_json::to_vec(&message)
            .map_err(|e| RecordingError::Transport(e.to_string()))?;

        self.client
            .publish(format!("localrec.{}.chat", self.conference), payload.into())
            .await
            .map_err(|e| RecordingError::Transport(format!("Failed to publish chat: {}", e)))
    }
}

impl Roster for NatsSignaling {
    fn is_moderator(&self) -> bool {
        self.local().moderator
    }

    fn my_user_id(&self) -> String {
        self.local().user_id.clone()
    }

    fn my_display_name(&self) -> String {
        self.local().display_name.clone()
    }

    fn participants(&self) -> Vec<Participant> {
        self.roster
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(Participant::from)
            .collect()
    }
}

impl Drop for NatsSignaling {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

pub fn presence_subject(conference: &str) -> String {
    format!("localrec.{}.presence", conference)
}
