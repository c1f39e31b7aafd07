use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::{ControllerState, CoordinatorEvent, CoordinatorOptions};
use crate::adapter::{AdapterRegistry, RecordedData, RecordingAdapter, RecordingProgress};
use crate::error::{RecordingError, Result};
use crate::format::RecordingFormat;
use crate::session::{
    read_participant_stats, RecordingStats, SessionRegistry, SessionToken, StatsSnapshot,
    PROPERTY_STATS,
};
use crate::signaling::{Command, CommandKind, Conference, InboundCommand};
use crate::upload::{recording_filename, UploadSink};

const EVENT_CAPACITY: usize = 256;

/// Per-participant recording state machine
///
/// Every method runs to completion before the next command is looked at;
/// [`Coordinator::spawn`] gives it a single task so commands never interleave.
pub struct Coordinator {
    conference: Arc<dyn Conference>,
    adapters: AdapterRegistry,
    upload: Arc<dyn UploadSink>,
    options: CoordinatorOptions,

    sessions: SessionRegistry,
    /// Adapters by session, kept after stop so data stays exportable
    recordings: HashMap<SessionToken, Box<dyn RecordingAdapter>>,

    state: ControllerState,
    current_token: Option<SessionToken>,
    /// Session our last STOP broadcast was for
    stop_sent_for: Option<SessionToken>,
    format: RecordingFormat,
    muted: bool,
    mic_device_id: String,
    registered: bool,

    events: broadcast::Sender<CoordinatorEvent>,
}

impl Coordinator {
    pub fn new(
        conference: Arc<dyn Conference>,
        adapters: AdapterRegistry,
        upload: Arc<dyn UploadSink>,
        options: CoordinatorOptions,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            conference,
            adapters,
            upload,
            format: options.default_format,
            mic_device_id: options.default_mic_device.clone(),
            options,
            sessions: SessionRegistry::new(),
            recordings: HashMap::new(),
            state: ControllerState::Idle,
            current_token: None,
            stop_sent_for: None,
            muted: false,
            registered: false,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.events.subscribe()
    }

    pub(crate) fn event_sender(&self) -> broadcast::Sender<CoordinatorEvent> {
        self.events.clone()
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn current_session_token(&self) -> Option<SessionToken> {
        self.current_token
    }

    /// Format the next session started by this participant will use
    pub fn format(&self) -> RecordingFormat {
        self.format
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn mic_device_id(&self) -> &str {
        &self.mic_device_id
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Hook into the conference; runs once
    ///
    /// A participant that is not moderator asks for a PONG so the moderator's
    /// persistent commands are re-delivered and a running session is joined.
    pub async fn register(&mut self) {
        if self.registered {
            return;
        }
        self.registered = true;

        if self.conference.is_moderator() {
            info!("Registered as moderator");
            return;
        }

        info!("Registered, asking moderator for current session");
        if let Err(e) = self.conference.send_command_once(Command::Ping).await {
            warn!("Failed to send ping: {}", e);
        }
    }

    /// Dispatch one command received from the conference
    pub async fn handle_command(&mut self, inbound: InboundCommand) {
        debug!("Command {:?} from {}", inbound.command, inbound.from);
        match inbound.command {
            Command::Start {
                session_token,
                format,
            } => self.on_start(session_token, format).await,
            Command::Stop { session_token } => self.on_stop(session_token).await,
            Command::Ping => self.on_ping(&inbound.from).await,
            Command::Pong => debug!("Pong from {}", inbound.from),
        }
    }

    /// Start a new session under a random token (moderator only)
    pub async fn start_recording(&mut self) -> Result<SessionToken> {
        let token = SessionToken::random(self.options.token_range_max);
        self.start_recording_with(token).await?;
        Ok(token)
    }

    /// Start a session under `token` (moderator only)
    pub async fn start_recording_with(&mut self, token: SessionToken) -> Result<()> {
        self.ensure_moderator()?;

        let command = Command::Start {
            session_token: token,
            format: self.format,
        };

        if let Err(e) = self.conference.remove_command(CommandKind::Stop).await {
            warn!("Failed to withdraw STOP: {}", e);
        }
        if let Err(e) = self.conference.send_command(command).await {
            error!("Failed to broadcast START for session {}: {}", token, e);
            self.warning(&e);
            return Err(e);
        }
        info!("Broadcast START for session {} ({})", token, self.format);

        // the transport echoes the command back; acting now keeps the
        // moderator from waiting on its own round trip
        self.handle_command(InboundCommand {
            from: self.conference.my_user_id(),
            command,
        })
        .await;
        Ok(())
    }

    /// Stop the current session (moderator only)
    ///
    /// Broadcasts STOP at most once per session; without a current session
    /// this does nothing.
    pub async fn stop_recording(&mut self) -> Result<()> {
        self.ensure_moderator()?;

        let token = match self.current_token {
            Some(token) if self.stop_sent_for != Some(token) => token,
            _ => {
                debug!("No session to stop");
                return Ok(());
            }
        };

        let command = Command::Stop {
            session_token: token,
        };

        if let Err(e) = self.conference.remove_command(CommandKind::Start).await {
            warn!("Failed to withdraw START: {}", e);
        }
        if let Err(e) = self.conference.send_command(command).await {
            error!("Failed to broadcast STOP for session {}: {}", token, e);
            self.warning(&e);
            return Err(e);
        }
        self.stop_sent_for = Some(token);
        info!("Broadcast STOP for session {}", token);

        self.handle_command(InboundCommand {
            from: self.conference.my_user_id(),
            command,
        })
        .await;
        Ok(())
    }

    /// Change the format of sessions started from now on
    pub fn switch_format(&mut self, name: &str) -> Result<RecordingFormat> {
        let format = match name.parse::<RecordingFormat>() {
            Ok(format) if self.adapters.supports(format) => format,
            _ => {
                info!("Unknown format '{}', keeping {}", name, self.format);
                return Err(RecordingError::UnknownFormat(name.to_string()));
            }
        };

        self.format = format;
        info!("Recording format switched to {}", format);
        Ok(format)
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
        if self.state == ControllerState::Recording {
            if let Some(adapter) = self.current_adapter_mut() {
                adapter.set_muted(muted);
            }
        }
        debug!("Muted: {}", muted);
    }

    /// Select the microphone; switches the live capture while recording
    ///
    /// A failed switch leaves the previous device in use and the session
    /// recording.
    pub async fn set_mic_device(&mut self, device_id: &str) -> Result<()> {
        if device_id == self.mic_device_id {
            return Ok(());
        }
        let previous = std::mem::replace(&mut self.mic_device_id, device_id.to_string());
        info!("Microphone set to {}", device_id);

        if self.state != ControllerState::Recording {
            return Ok(());
        }

        let result = match self.current_adapter_mut() {
            Some(adapter) => adapter.set_mic_device(device_id).await,
            None => Ok(()),
        };

        if let Err(e) = result {
            error!("Failed to switch microphone to {}: {}", device_id, e);
            self.mic_device_id = previous;
            self.warning(&e);
            return Err(e);
        }
        Ok(())
    }

    /// This participant's own stats
    pub fn local_stats(&self) -> RecordingStats {
        let progress = self
            .current_token
            .and_then(|token| self.recordings.get(&token))
            .map(|adapter| adapter.progress())
            .unwrap_or(RecordingProgress {
                bytes: 0,
                length_secs: 0.0,
            });

        RecordingStats {
            current_session_token: self.current_token,
            is_recording: self.state == ControllerState::Recording,
            recorded_bytes: progress.bytes,
            recorded_length: progress.length_secs,
        }
    }

    /// Republish our stats while a session is recording
    ///
    /// Called on every stats tick so remote participants see the captured
    /// bytes and length grow.
    pub async fn publish_progress(&self) {
        if self.state == ControllerState::Recording {
            self.publish_stats().await;
        }
    }

    pub(crate) fn stats_interval(&self) -> Duration {
        self.options.stats_interval.max(Duration::from_millis(1))
    }

    /// Stats of every participant, ourselves included
    pub fn participants_stats(&self) -> StatsSnapshot {
        read_participant_stats(self.conference.as_ref(), self.local_stats())
    }

    /// Encoded recording of a stopped session
    pub async fn recorded_data(&self, token: SessionToken) -> Result<RecordedData> {
        let adapter = self.recordings.get(&token).ok_or_else(|| {
            error!("Invalid session token {} for export", token);
            RecordingError::UnknownSession(token)
        })?;
        adapter.export_recorded_data().await
    }

    /// Export a stopped session and hand it to the upload sink
    ///
    /// The upload runs in the background; its outcome arrives as an
    /// `Uploaded` event or an `UploadFailed` warning.
    pub async fn export_session(&self, token: SessionToken) -> Result<()> {
        let recorded = self.recorded_data(token).await?;
        info!(
            "Exported session {} ({} bytes of {})",
            token,
            recorded.data.len(),
            recorded.format
        );
        self.emit(CoordinatorEvent::Exported {
            session_token: token,
            format: recorded.format,
            bytes: recorded.data.len(),
        });

        let filename = recording_filename(
            &self.conference.my_display_name(),
            token,
            &self.conference.my_user_id(),
            recorded.format,
        );
        let upload = Arc::clone(&self.upload);
        let conference = Arc::clone(&self.conference);
        let events = self.events.clone();

        tokio::spawn(async move {
            match upload
                .upload(&recorded.data, &filename, recorded.format.mime_type())
                .await
            {
                Ok(url) => {
                    info!("Session {} uploaded to {}", token, url);
                    if let Err(e) = conference.send_text_message(&url).await {
                        warn!("Failed to post recording link: {}", e);
                    }
                    let mut params = BTreeMap::new();
                    params.insert("url".to_string(), url.clone());
                    let _ = events.send(CoordinatorEvent::Notify {
                        key: "uploaded".to_string(),
                        params,
                    });
                    let _ = events.send(CoordinatorEvent::Uploaded {
                        session_token: token,
                        url,
                    });
                }
                Err(e) => {
                    let e = match e {
                        RecordingError::UploadFailed(_) => e,
                        other => RecordingError::UploadFailed(other.to_string()),
                    };
                    error!("Upload of session {} failed: {}", token, e);
                    let _ = events.send(CoordinatorEvent::Warning {
                        key: e.message_key().to_string(),
                        message: e.to_string(),
                    });
                }
            }
        });
        Ok(())
    }

    /// Stop a running session locally, without broadcasting
    pub async fn shutdown(&mut self) {
        if self.state == ControllerState::Recording {
            info!("Shutting down, stopping local recording");
            self.change_state(ControllerState::Stopping);
            self.finish_session().await;
        }
    }

    async fn on_start(&mut self, token: SessionToken, format: RecordingFormat) {
        if self.recordings.contains_key(&token) {
            debug!("Ignoring START for known session {}", token);
            return;
        }

        match self.state {
            ControllerState::Idle | ControllerState::Failed => {
                self.begin_session(token, format).await;
            }
            ControllerState::Recording => {
                info!(
                    "START for session {} while recording {:?}, resynchronizing",
                    token, self.current_token
                );
                self.change_state(ControllerState::Stopping);
                self.finish_session().await;
                self.begin_session(token, format).await;
            }
            ControllerState::Starting | ControllerState::Stopping => {
                warn!("Ignoring START for session {} while {}", token, self.state);
            }
        }
    }

    async fn on_stop(&mut self, token: SessionToken) {
        if self.state != ControllerState::Recording || self.current_token != Some(token) {
            debug!(
                "Ignoring STOP for session {} ({}, current {:?})",
                token, self.state, self.current_token
            );
            return;
        }

        self.change_state(ControllerState::Stopping);
        self.finish_session().await;
    }

    async fn on_ping(&mut self, from: &str) {
        if !self.conference.is_moderator() {
            return;
        }
        info!("Ping from {}, answering", from);
        if let Err(e) = self.conference.send_command_once(Command::Pong).await {
            warn!("Failed to send pong: {}", e);
        }
    }

    async fn begin_session(&mut self, token: SessionToken, format: RecordingFormat) {
        self.change_state(ControllerState::Starting);
        self.current_token = Some(token);
        self.format = format;
        info!("New session {}, format {}", token, format);

        let mut adapter = match self.adapters.create(format) {
            Ok(adapter) => adapter,
            Err(e) => {
                self.fail(token, "create", e).await;
                return;
            }
        };

        if let Err(e) = self.sessions.create_session(token, format) {
            warn!("{}", e);
        }

        let outcome = match tokio::time::timeout(
            self.options.adapter_timeout,
            adapter.start(&self.mic_device_id),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(RecordingError::Timeout {
                token,
                operation: "start",
            }),
        };
        if outcome.is_ok() {
            adapter.set_muted(self.muted);
        }
        self.recordings.insert(token, adapter);

        match outcome {
            Ok(()) => {
                self.change_state(ControllerState::Recording);
                if let Err(e) = self.sessions.begin_segment(token) {
                    warn!("{}", e);
                }
                info!("Local recording engaged");
                self.notify("engaged", token);
                self.emit(CoordinatorEvent::RecordingActive(true));
                self.publish_stats().await;
            }
            Err(e) => self.fail(token, "start", e).await,
        }
    }

    /// Stop the current adapter, export, upload and report
    async fn finish_session(&mut self) {
        let Some(token) = self.current_token else {
            return;
        };

        let timeout = self.options.adapter_timeout;
        let outcome = match self.recordings.get_mut(&token) {
            Some(adapter) => match tokio::time::timeout(timeout, adapter.stop()).await {
                Ok(result) => result,
                Err(_) => Err(RecordingError::Timeout {
                    token,
                    operation: "stop",
                }),
            },
            None => Err(RecordingError::UnknownSession(token)),
        };

        self.emit(CoordinatorEvent::RecordingActive(false));
        if let Err(e) = outcome {
            self.fail(token, "stop", e).await;
            return;
        }

        self.change_state(ControllerState::Idle);
        if let Err(e) = self.sessions.end_segment(token) {
            warn!("{}", e);
        }

        if let Err(e) = self.export_session(token).await {
            error!("Failed to export session {}: {}", token, e);
            self.warning(&e);
        }

        let key = if self.conference.is_moderator() {
            "finishedModerator"
        } else {
            "finished"
        };
        self.notify(key, token);
        self.publish_stats().await;
    }

    async fn fail(&mut self, token: SessionToken, operation: &'static str, e: RecordingError) {
        let e = match e {
            RecordingError::DeviceUnavailable { .. }
            | RecordingError::Timeout { .. }
            | RecordingError::AdapterOperationFailed { .. } => e,
            other => RecordingError::AdapterOperationFailed {
                token,
                operation,
                reason: other.to_string(),
            },
        };

        error!("Session {}: {}", token, e);
        self.change_state(ControllerState::Failed);
        self.warning(&e);
        self.publish_stats().await;
    }

    fn ensure_moderator(&self) -> Result<()> {
        if self.conference.is_moderator() {
            return Ok(());
        }
        let e = RecordingError::NotModerator;
        warn!("{}", e);
        self.warning(&e);
        Err(e)
    }

    fn current_adapter_mut(&mut self) -> Option<&mut Box<dyn RecordingAdapter>> {
        let token = self.current_token?;
        self.recordings.get_mut(&token)
    }

    fn change_state(&mut self, to: ControllerState) {
        if self.state == to {
            return;
        }
        let from = self.state;
        self.state = to;
        info!("state change: {} -> {}", from, to);
        self.emit(CoordinatorEvent::StateChanged { from, to });
    }

    async fn publish_stats(&self) {
        let stats = self.local_stats().to_property();
        if let Err(e) = self
            .conference
            .set_local_property(PROPERTY_STATS, &stats)
            .await
        {
            warn!("Failed to publish stats: {}", e);
        }
    }

    fn notify(&self, key: &str, token: SessionToken) {
        let mut params = BTreeMap::new();
        params.insert("token".to_string(), token.to_string());
        self.emit(CoordinatorEvent::Notify {
            key: key.to_string(),
            params,
        });
    }

    fn warning(&self, e: &RecordingError) {
        self.emit(CoordinatorEvent::Warning {
            key: e.message_key().to_string(),
            message: e.to_string(),
        });
    }

    fn emit(&self, event: CoordinatorEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }
}
