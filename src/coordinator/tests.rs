use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

use super::*;
use crate::adapter::{AdapterContext, AdapterRegistry, RecordedData, RecordingAdapter, RecordingProgress};
use crate::audio::{AudioBackendConfig, SyntheticDevices};
use crate::error::{RecordingError, Result};
use crate::format::RecordingFormat;
use crate::session::{RecordingStats, SessionToken, PROPERTY_STATS};
use crate::signaling::{
    Command, CommandKind, InboundCommand, MemoryConference, MemoryEndpoint, Participant, Roster,
    Signaling,
};
use crate::upload::UploadSink;

type Log = Arc<Mutex<Vec<String>>>;

/// Knobs shared by every adapter a test coordinator creates
#[derive(Clone, Default)]
struct Script {
    log: Log,
    fail_start: Arc<AtomicBool>,
    start_delay: Arc<Mutex<Duration>>,
    fail_stop: Arc<AtomicBool>,
    stop_delay: Arc<Mutex<Duration>>,
}

struct ScriptedAdapter {
    script: Script,
    format: RecordingFormat,
    device: Option<String>,
    stopped: bool,
}

#[async_trait::async_trait]
impl RecordingAdapter for ScriptedAdapter {
    fn format(&self) -> RecordingFormat {
        self.format
    }

    async fn start(&mut self, device_id: &str) -> Result<()> {
        self.script.log.lock().unwrap().push("start".to_string());
        let delay = *self.script.start_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.script.fail_start.load(Ordering::SeqCst) {
            return Err(RecordingError::DeviceUnavailable {
                device_id: device_id.to_string(),
                reason: "unplugged".to_string(),
            });
        }
        self.device = Some(device_id.to_string());
        Ok(())
    }

    fn set_muted(&mut self, muted: bool) {
        self.script.log.lock().unwrap().push(format!("muted:{}", muted));
    }

    async fn set_mic_device(&mut self, device_id: &str) -> Result<()> {
        if device_id == "broken" {
            return Err(RecordingError::DeviceUnavailable {
                device_id: device_id.to_string(),
                reason: "no such device".to_string(),
            });
        }
        self.device = Some(device_id.to_string());
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.script.log.lock().unwrap().push("stop".to_string());
        let delay = *self.script.stop_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.script.fail_stop.load(Ordering::SeqCst) {
            return Err(RecordingError::Encoding("disk full".to_string()));
        }
        self.stopped = true;
        Ok(())
    }

    async fn export_recorded_data(&self) -> Result<RecordedData> {
        if !self.stopped {
            return Err(RecordingError::Encoding("still recording".to_string()));
        }
        Ok(RecordedData {
            data: b"payload".to_vec(),
            format: self.format,
        })
    }

    fn progress(&self) -> RecordingProgress {
        RecordingProgress {
            bytes: if self.device.is_some() { 3200 } else { 0 },
            length_secs: 0.1,
        }
    }
}

fn registry(script: &Script) -> AdapterRegistry {
    let context = AdapterContext {
        devices: Arc::new(SyntheticDevices::new()),
        audio: AudioBackendConfig::default(),
    };
    let mut registry = AdapterRegistry::empty(context);
    for format in RecordingFormat::ALL {
        let script = script.clone();
        registry.register(
            format,
            Arc::new(move |_: &AdapterContext| {
                Box::new(ScriptedAdapter {
                    script: script.clone(),
                    format,
                    device: None,
                    stopped: false,
                }) as Box<dyn RecordingAdapter>
            }),
        );
    }
    registry
}

#[derive(Default)]
struct MemoryUpload {
    fail: bool,
    stored: Mutex<Vec<String>>,
}

#[async_trait::async_trait]
impl UploadSink for MemoryUpload {
    async fn upload(&self, _data: &[u8], filename: &str, _mime_type: &str) -> Result<String> {
        if self.fail {
            return Err(RecordingError::UploadFailed("server unreachable".to_string()));
        }
        self.stored.lock().unwrap().push(filename.to_string());
        Ok(format!("https://rec.example/{}", filename))
    }
}

/// Counts persistent command broadcasts by kind
struct CountingEndpoint {
    inner: MemoryEndpoint,
    starts: AtomicUsize,
    stops: AtomicUsize,
}

#[async_trait::async_trait]
impl Signaling for CountingEndpoint {
    async fn send_command(&self, command: Command) -> Result<()> {
        match command.kind() {
            CommandKind::Start => self.starts.fetch_add(1, Ordering::SeqCst),
            CommandKind::Stop => self.stops.fetch_add(1, Ordering::SeqCst),
            _ => 0,
        };
        self.inner.send_command(command).await
    }
    async fn send_command_once(&self, command: Command) -> Result<()> {
        self.inner.send_command_once(command).await
    }
    async fn remove_command(&self, kind: CommandKind) -> Result<()> {
        self.inner.remove_command(kind).await
    }
    async fn set_local_property(&self, key: &str, value: &str) -> Result<()> {
        self.inner.set_local_property(key, value).await
    }
    async fn send_text_message(&self, text: &str) -> Result<()> {
        self.inner.send_text_message(text).await
    }
}

impl Roster for CountingEndpoint {
    fn is_moderator(&self) -> bool {
        self.inner.is_moderator()
    }
    fn my_user_id(&self) -> String {
        self.inner.my_user_id()
    }
    fn my_display_name(&self) -> String {
        self.inner.my_display_name()
    }
    fn participants(&self) -> Vec<Participant> {
        self.inner.participants()
    }
}

struct Peer {
    coordinator: Coordinator,
    commands: mpsc::UnboundedReceiver<InboundCommand>,
    endpoint: Arc<CountingEndpoint>,
    events: broadcast::Receiver<CoordinatorEvent>,
}

impl Peer {
    /// Feed every command delivered so far to the coordinator
    async fn pump(&mut self) {
        while let Ok(inbound) = self.commands.try_recv() {
            self.coordinator.handle_command(inbound).await;
        }
    }

    fn drain_events(&mut self) -> Vec<CoordinatorEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    async fn next_event_matching<F>(&mut self, mut predicate: F) -> Option<CoordinatorEvent>
    where
        F: FnMut(&CoordinatorEvent) -> bool,
    {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while let Ok(Ok(event)) = tokio::time::timeout_at(deadline, self.events.recv()).await {
            if predicate(&event) {
                return Some(event);
            }
        }
        None
    }
}

fn peer_with(
    conference: &MemoryConference,
    user_id: &str,
    moderator: bool,
    script: &Script,
    upload: MemoryUpload,
    options: CoordinatorOptions,
) -> Peer {
    let (inner, commands) = conference.join(user_id, &user_id.to_uppercase(), moderator);
    let endpoint = Arc::new(CountingEndpoint {
        inner,
        starts: AtomicUsize::new(0),
        stops: AtomicUsize::new(0),
    });
    let coordinator = Coordinator::new(
        endpoint.clone(),
        registry(script),
        Arc::new(upload),
        options,
    );
    let events = coordinator.subscribe();
    Peer {
        coordinator,
        commands,
        endpoint,
        events,
    }
}

fn peer(conference: &MemoryConference, user_id: &str, moderator: bool, script: &Script) -> Peer {
    peer_with(
        conference,
        user_id,
        moderator,
        script,
        MemoryUpload::default(),
        CoordinatorOptions::default(),
    )
}

fn warnings(events: &[CoordinatorEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            CoordinatorEvent::Warning { key, .. } => Some(key.clone()),
            _ => None,
        })
        .collect()
}

fn start(token: u64, format: RecordingFormat) -> InboundCommand {
    InboundCommand {
        from: "mod".to_string(),
        command: Command::Start {
            session_token: SessionToken(token),
            format,
        },
    }
}

fn stop(token: u64) -> InboundCommand {
    InboundCommand {
        from: "mod".to_string(),
        command: Command::Stop {
            session_token: SessionToken(token),
        },
    }
}

#[tokio::test]
async fn test_stop_while_idle_changes_nothing() -> Result<()> {
    let conference = MemoryConference::new();
    let script = Script::default();
    let mut moderator = peer(&conference, "mod", true, &script);

    moderator.coordinator.stop_recording().await?;
    moderator.coordinator.handle_command(stop(42)).await;

    assert_eq!(moderator.coordinator.state(), ControllerState::Idle);
    assert_eq!(moderator.endpoint.stops.load(Ordering::SeqCst), 0);
    assert!(moderator.drain_events().is_empty());
    assert!(script.log.lock().unwrap().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_non_moderator_cannot_start() {
    let conference = MemoryConference::new();
    let script = Script::default();
    let mut participant = peer(&conference, "b", false, &script);

    let err = participant.coordinator.start_recording().await.unwrap_err();
    assert_eq!(err, RecordingError::NotModerator);

    let events = participant.drain_events();
    assert_eq!(warnings(&events), vec!["NotModerator".to_string()]);
    assert_eq!(participant.endpoint.starts.load(Ordering::SeqCst), 0);
    assert!(conference.presence("b").unwrap().commands.is_empty());
    assert_eq!(participant.coordinator.state(), ControllerState::Idle);
}

#[tokio::test]
async fn test_moderator_session_lifecycle() -> Result<()> {
    let conference = MemoryConference::new();
    let script = Script::default();
    let mut moderator = peer(&conference, "mod", true, &script);

    moderator
        .coordinator
        .start_recording_with(SessionToken(42))
        .await?;
    assert_eq!(moderator.coordinator.state(), ControllerState::Recording);
    assert_eq!(
        moderator.coordinator.current_session_token(),
        Some(SessionToken(42))
    );

    // our own START comes back through the conference and is ignored
    moderator.pump().await;
    assert_eq!(*script.log.lock().unwrap(), vec!["start", "muted:false"]);

    moderator.coordinator.stop_recording().await?;
    moderator.pump().await;
    assert_eq!(moderator.coordinator.state(), ControllerState::Idle);
    assert_eq!(
        *script.log.lock().unwrap(),
        vec!["start", "muted:false", "stop"]
    );

    let events = moderator.drain_events();
    let notifications: Vec<&str> = events
        .iter()
        .filter_map(|event| match event {
            CoordinatorEvent::Notify { key, .. } if key != "uploaded" => Some(key.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(notifications, vec!["engaged", "finishedModerator"]);
    assert!(events.contains(&CoordinatorEvent::Exported {
        session_token: SessionToken(42),
        format: RecordingFormat::Flac,
        bytes: 7,
    }));

    let presence = conference.presence("mod").unwrap();
    assert!(presence.commands.contains_key(crate::signaling::COMMAND_STOP));
    assert!(!presence.commands.contains_key(crate::signaling::COMMAND_START));
    Ok(())
}

#[tokio::test]
async fn test_stop_is_broadcast_once() -> Result<()> {
    let conference = MemoryConference::new();
    let script = Script::default();
    let mut moderator = peer(&conference, "mod", true, &script);

    moderator.coordinator.start_recording().await?;
    moderator.coordinator.stop_recording().await?;
    moderator.coordinator.stop_recording().await?;

    assert_eq!(moderator.endpoint.stops.load(Ordering::SeqCst), 1);
    assert_eq!(moderator.endpoint.starts.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn test_random_token_within_range() -> Result<()> {
    let conference = MemoryConference::new();
    let script = Script::default();
    let options = CoordinatorOptions {
        token_range_max: 10,
        ..CoordinatorOptions::default()
    };
    let mut moderator = peer_with(
        &conference,
        "mod",
        true,
        &script,
        MemoryUpload::default(),
        options,
    );

    let token = moderator.coordinator.start_recording().await?;
    assert!((1..=10).contains(&token.0));
    Ok(())
}

#[tokio::test]
async fn test_new_start_resynchronizes() -> Result<()> {
    let conference = MemoryConference::new();
    let script = Script::default();
    let mut participant = peer(&conference, "b", false, &script);

    participant
        .coordinator
        .handle_command(start(42, RecordingFormat::Wav))
        .await;
    participant.drain_events();

    participant
        .coordinator
        .handle_command(start(43, RecordingFormat::Flac))
        .await;

    assert_eq!(participant.coordinator.state(), ControllerState::Recording);
    assert_eq!(
        participant.coordinator.current_session_token(),
        Some(SessionToken(43))
    );
    assert_eq!(
        *script.log.lock().unwrap(),
        vec!["start", "muted:false", "stop", "start", "muted:false"]
    );

    let transitions: Vec<(ControllerState, ControllerState)> = participant
        .drain_events()
        .into_iter()
        .filter_map(|event| match event {
            CoordinatorEvent::StateChanged { from, to } => Some((from, to)),
            _ => None,
        })
        .collect();
    assert_eq!(
        transitions,
        vec![
            (ControllerState::Recording, ControllerState::Stopping),
            (ControllerState::Stopping, ControllerState::Idle),
            (ControllerState::Idle, ControllerState::Starting),
            (ControllerState::Starting, ControllerState::Recording),
        ]
    );

    let sessions = participant.coordinator.sessions();
    assert_eq!(sessions.get(SessionToken(42)).unwrap().format, RecordingFormat::Wav);
    assert_eq!(sessions.get(SessionToken(43)).unwrap().format, RecordingFormat::Flac);
    Ok(())
}

#[tokio::test]
async fn test_stale_stop_is_ignored() {
    let conference = MemoryConference::new();
    let script = Script::default();
    let mut participant = peer(&conference, "b", false, &script);

    participant
        .coordinator
        .handle_command(start(43, RecordingFormat::Flac))
        .await;
    participant.coordinator.handle_command(stop(42)).await;

    assert_eq!(participant.coordinator.state(), ControllerState::Recording);
    assert_eq!(
        participant.coordinator.current_session_token(),
        Some(SessionToken(43))
    );
}

#[tokio::test]
async fn test_redelivered_start_is_idempotent() {
    let conference = MemoryConference::new();
    let script = Script::default();
    let mut participant = peer(&conference, "b", false, &script);

    for _ in 0..3 {
        participant
            .coordinator
            .handle_command(start(42, RecordingFormat::Ogg))
            .await;
    }
    participant.coordinator.handle_command(stop(42)).await;
    // re-delivered START after the session ended must not restart it
    participant
        .coordinator
        .handle_command(start(42, RecordingFormat::Ogg))
        .await;

    assert_eq!(participant.coordinator.state(), ControllerState::Idle);
    assert_eq!(
        *script.log.lock().unwrap(),
        vec!["start", "muted:false", "stop"]
    );
}

#[tokio::test]
async fn test_start_timeout_fails() {
    let conference = MemoryConference::new();
    let script = Script::default();
    *script.start_delay.lock().unwrap() = Duration::from_millis(500);
    let options = CoordinatorOptions {
        adapter_timeout: Duration::from_millis(20),
        ..CoordinatorOptions::default()
    };
    let mut participant = peer_with(
        &conference,
        "b",
        false,
        &script,
        MemoryUpload::default(),
        options,
    );

    participant
        .coordinator
        .handle_command(start(42, RecordingFormat::Wav))
        .await;

    assert_eq!(participant.coordinator.state(), ControllerState::Failed);
    assert_eq!(
        warnings(&participant.drain_events()),
        vec!["AdapterOperationFailed".to_string()]
    );
    assert!(!participant.coordinator.local_stats().is_recording);
}

#[tokio::test]
async fn test_failed_start_recovers_on_next_session() {
    let conference = MemoryConference::new();
    let script = Script::default();
    script.fail_start.store(true, Ordering::SeqCst);
    let mut participant = peer(&conference, "b", false, &script);

    participant
        .coordinator
        .handle_command(start(42, RecordingFormat::Wav))
        .await;
    assert_eq!(participant.coordinator.state(), ControllerState::Failed);
    assert_eq!(
        warnings(&participant.drain_events()),
        vec!["DeviceUnavailable".to_string()]
    );

    script.fail_start.store(false, Ordering::SeqCst);
    participant
        .coordinator
        .handle_command(start(43, RecordingFormat::Wav))
        .await;
    assert_eq!(participant.coordinator.state(), ControllerState::Recording);
}

fn exported(events: &[CoordinatorEvent]) -> usize {
    events
        .iter()
        .filter(|event| matches!(event, CoordinatorEvent::Exported { .. }))
        .count()
}

#[tokio::test]
async fn test_failed_stop_fails_session() {
    let conference = MemoryConference::new();
    let script = Script::default();
    let mut participant = peer(&conference, "b", false, &script);

    participant
        .coordinator
        .handle_command(start(42, RecordingFormat::Wav))
        .await;
    assert_eq!(participant.coordinator.state(), ControllerState::Recording);
    participant.drain_events();

    script.fail_stop.store(true, Ordering::SeqCst);
    participant.coordinator.handle_command(stop(42)).await;

    assert_eq!(participant.coordinator.state(), ControllerState::Failed);
    let events = participant.drain_events();
    assert_eq!(warnings(&events), vec!["AdapterOperationFailed".to_string()]);
    assert_eq!(exported(&events), 0);
    assert!(events.contains(&CoordinatorEvent::StateChanged {
        from: ControllerState::Stopping,
        to: ControllerState::Failed,
    }));

    script.fail_stop.store(false, Ordering::SeqCst);
    participant
        .coordinator
        .handle_command(start(43, RecordingFormat::Wav))
        .await;
    assert_eq!(participant.coordinator.state(), ControllerState::Recording);
    assert_eq!(
        participant.coordinator.current_session_token(),
        Some(SessionToken(43))
    );
}

#[tokio::test]
async fn test_stop_timeout_fails_session() {
    let conference = MemoryConference::new();
    let script = Script::default();
    let options = CoordinatorOptions {
        adapter_timeout: Duration::from_millis(20),
        ..CoordinatorOptions::default()
    };
    let mut participant = peer_with(
        &conference,
        "b",
        false,
        &script,
        MemoryUpload::default(),
        options,
    );

    participant
        .coordinator
        .handle_command(start(42, RecordingFormat::Flac))
        .await;
    participant.drain_events();

    *script.stop_delay.lock().unwrap() = Duration::from_millis(500);
    participant.coordinator.handle_command(stop(42)).await;

    assert_eq!(participant.coordinator.state(), ControllerState::Failed);
    let events = participant.drain_events();
    assert_eq!(warnings(&events), vec!["AdapterOperationFailed".to_string()]);
    assert_eq!(exported(&events), 0);
    assert!(!participant.coordinator.local_stats().is_recording);

    *script.stop_delay.lock().unwrap() = Duration::ZERO;
    participant
        .coordinator
        .handle_command(start(43, RecordingFormat::Flac))
        .await;
    assert_eq!(participant.coordinator.state(), ControllerState::Recording);
}

#[tokio::test]
async fn test_device_switch_failure_keeps_recording() {
    let conference = MemoryConference::new();
    let script = Script::default();
    let mut participant = peer(&conference, "b", false, &script);
    participant
        .coordinator
        .handle_command(start(42, RecordingFormat::Flac))
        .await;
    participant.drain_events();

    let err = participant
        .coordinator
        .set_mic_device("broken")
        .await
        .unwrap_err();
    assert_eq!(err.message_key(), "DeviceUnavailable");
    assert_eq!(participant.coordinator.state(), ControllerState::Recording);
    assert_eq!(participant.coordinator.mic_device_id(), "default");
    assert_eq!(
        warnings(&participant.drain_events()),
        vec!["DeviceUnavailable".to_string()]
    );

    assert!(participant.coordinator.set_mic_device("usb").await.is_ok());
    assert_eq!(participant.coordinator.mic_device_id(), "usb");
}

#[tokio::test]
async fn test_mute_applies_to_next_session() {
    let conference = MemoryConference::new();
    let script = Script::default();
    let mut participant = peer(&conference, "b", false, &script);

    participant.coordinator.set_muted(true);
    assert!(script.log.lock().unwrap().is_empty());

    participant
        .coordinator
        .handle_command(start(42, RecordingFormat::Flac))
        .await;
    participant.coordinator.set_muted(false);
    assert_eq!(
        *script.log.lock().unwrap(),
        vec!["start", "muted:true", "muted:false"]
    );
}

#[tokio::test]
async fn test_switch_format() -> Result<()> {
    let conference = MemoryConference::new();
    let script = Script::default();
    let mut moderator = peer(&conference, "mod", true, &script);

    assert_eq!(moderator.coordinator.switch_format("wav")?, RecordingFormat::Wav);
    assert!(moderator.coordinator.switch_format("mp3").is_err());
    assert_eq!(moderator.coordinator.format(), RecordingFormat::Wav);

    moderator
        .coordinator
        .start_recording_with(SessionToken(9))
        .await?;
    moderator.coordinator.switch_format("ogg")?;

    let entry = moderator.coordinator.sessions().get(SessionToken(9)).unwrap();
    assert_eq!(entry.format, RecordingFormat::Wav);
    assert!(entry.has_open_segment());
    Ok(())
}

#[tokio::test]
async fn test_moderator_answers_ping() {
    let conference = MemoryConference::new();
    let script = Script::default();
    let mut moderator = peer(&conference, "mod", true, &script);
    let (_late, mut late_rx) = conference.join("late", "Late", false);

    moderator
        .coordinator
        .handle_command(InboundCommand {
            from: "late".to_string(),
            command: Command::Ping,
        })
        .await;

    assert_eq!(late_rx.try_recv().unwrap().command, Command::Pong);
}

#[tokio::test]
async fn test_participant_registers_with_ping() {
    let conference = MemoryConference::new();
    let (_moderator, mut moderator_rx) = conference.join("mod", "Mod", true);
    let script = Script::default();
    let mut participant = peer(&conference, "b", false, &script);

    participant.coordinator.register().await;
    participant.coordinator.register().await;

    assert_eq!(moderator_rx.try_recv().unwrap().command, Command::Ping);
    assert!(moderator_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_upload_failure_keeps_recording_exportable() -> Result<()> {
    let conference = MemoryConference::new();
    let script = Script::default();
    let upload = MemoryUpload {
        fail: true,
        ..MemoryUpload::default()
    };
    let mut participant = peer_with(
        &conference,
        "b",
        false,
        &script,
        upload,
        CoordinatorOptions::default(),
    );

    participant
        .coordinator
        .handle_command(start(42, RecordingFormat::Wav))
        .await;
    participant.coordinator.handle_command(stop(42)).await;

    let warning = participant
        .next_event_matching(|event| matches!(event, CoordinatorEvent::Warning { .. }))
        .await;
    assert!(matches!(
        warning,
        Some(CoordinatorEvent::Warning { ref key, .. }) if key == "UploadFailed"
    ));

    assert_eq!(participant.coordinator.state(), ControllerState::Idle);
    let data = participant
        .coordinator
        .recorded_data(SessionToken(42))
        .await?;
    assert_eq!(data.data, b"payload");
    Ok(())
}

#[tokio::test]
async fn test_upload_posts_link_to_chat() {
    let conference = MemoryConference::new();
    let script = Script::default();
    let mut participant = peer(&conference, "b", false, &script);

    participant
        .coordinator
        .handle_command(start(42, RecordingFormat::Flac))
        .await;
    participant.coordinator.handle_command(stop(42)).await;

    let uploaded = participant
        .next_event_matching(|event| matches!(event, CoordinatorEvent::Uploaded { .. }))
        .await;
    assert_eq!(
        uploaded,
        Some(CoordinatorEvent::Uploaded {
            session_token: SessionToken(42),
            url: "https://rec.example/B_session_42_b.flac".to_string(),
        })
    );

    let chat = conference.chat_messages();
    assert_eq!(chat.len(), 1);
    assert_eq!(chat[0].text, "https://rec.example/B_session_42_b.flac");
}

#[tokio::test]
async fn test_export_unknown_session() {
    let conference = MemoryConference::new();
    let script = Script::default();
    let participant = peer(&conference, "b", false, &script);

    let err = participant
        .coordinator
        .export_session(SessionToken(5))
        .await
        .unwrap_err();
    assert_eq!(err, RecordingError::UnknownSession(SessionToken(5)));
}

#[tokio::test]
async fn test_stats_published_to_presence() {
    let conference = MemoryConference::new();
    let script = Script::default();
    let mut participant = peer(&conference, "b", false, &script);
    let (moderator, _rx) = conference.join("mod", "Mod", true);

    participant
        .coordinator
        .handle_command(start(42, RecordingFormat::Flac))
        .await;

    let stats = crate::session::read_participant_stats(&moderator, Default::default());
    let reported = stats["b"].recording_stats.clone().unwrap();
    assert_eq!(reported.current_session_token, Some(SessionToken(42)));
    assert!(reported.is_recording);
    assert_eq!(reported.recorded_bytes, 3200);
}

#[tokio::test]
async fn test_progress_republished_only_while_recording() -> Result<()> {
    let conference = MemoryConference::new();
    let script = Script::default();
    let mut participant = peer(&conference, "b", false, &script);
    let published = |conference: &MemoryConference| {
        conference
            .presence("b")
            .and_then(|p| p.properties.get(PROPERTY_STATS).cloned())
    };

    participant.coordinator.publish_progress().await;
    assert_eq!(published(&conference), None, "idle participants stay quiet");

    participant
        .coordinator
        .handle_command(start(42, RecordingFormat::Flac))
        .await;
    participant
        .endpoint
        .set_local_property(PROPERTY_STATS, "{}")
        .await?;

    participant.coordinator.publish_progress().await;
    let stats = published(&conference)
        .and_then(|value| RecordingStats::from_property(&value))
        .unwrap();
    assert_eq!(stats.current_session_token, Some(SessionToken(42)));
    assert_eq!(stats.recorded_bytes, 3200);
    Ok(())
}

#[tokio::test]
async fn test_spawned_coordinator_serves_requests() -> Result<()> {
    let conference = MemoryConference::new();
    let script = Script::default();
    let (endpoint, commands) = conference.join("mod", "Mod", true);
    let coordinator = Coordinator::new(
        Arc::new(endpoint),
        registry(&script),
        Arc::new(MemoryUpload::default()),
        CoordinatorOptions::default(),
    );
    let (handle, task) = coordinator.spawn(commands);

    handle.start_recording_with(SessionToken(7)).await?;
    assert_eq!(handle.state().await?, ControllerState::Recording);
    assert_eq!(
        handle.local_stats().await?.current_session_token,
        Some(SessionToken(7))
    );
    assert!(handle.participants_stats().await?["mod"].is_self);

    handle.shutdown().await?;
    task.await.unwrap();
    assert_eq!(script.log.lock().unwrap().last().unwrap(), "stop");
    assert_eq!(
        handle.status().await.unwrap_err(),
        RecordingError::CoordinatorStopped
    );
    Ok(())
}
