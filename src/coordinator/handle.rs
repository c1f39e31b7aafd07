use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::info;

use super::{ControllerState, Coordinator, CoordinatorEvent};
use crate::adapter::RecordedData;
use crate::error::{RecordingError, Result};
use crate::format::RecordingFormat;
use crate::session::{RecordingStats, SessionEntry, SessionToken, StatsSnapshot};
use crate::signaling::InboundCommand;

const REQUEST_QUEUE: usize = 32;

/// Point-in-time view of a coordinator
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinatorStatus {
    pub state: ControllerState,
    pub session_token: Option<SessionToken>,
    pub format: RecordingFormat,
    pub muted: bool,
    pub mic_device_id: String,
}

enum Request {
    StartRecording(oneshot::Sender<Result<SessionToken>>),
    StartRecordingWith(SessionToken, oneshot::Sender<Result<()>>),
    StopRecording(oneshot::Sender<Result<()>>),
    SwitchFormat(String, oneshot::Sender<Result<RecordingFormat>>),
    SetMuted(bool, oneshot::Sender<()>),
    SetMicDevice(String, oneshot::Sender<Result<()>>),
    ExportSession(SessionToken, oneshot::Sender<Result<()>>),
    RecordedData(SessionToken, oneshot::Sender<Result<RecordedData>>),
    LocalStats(oneshot::Sender<RecordingStats>),
    ParticipantsStats(oneshot::Sender<StatsSnapshot>),
    Status(oneshot::Sender<CoordinatorStatus>),
    Sessions(oneshot::Sender<Vec<SessionEntry>>),
    Shutdown(oneshot::Sender<()>),
}

impl Coordinator {
    /// Run the coordinator on its own task
    ///
    /// Conference commands, API requests and the stats tick are served one at
    /// a time from a single loop. The task ends after
    /// [`CoordinatorHandle::shutdown`], or once both the command stream and
    /// every handle are gone.
    pub fn spawn(
        mut self,
        mut commands: mpsc::UnboundedReceiver<InboundCommand>,
    ) -> (CoordinatorHandle, JoinHandle<()>) {
        let (requests, mut inbox) = mpsc::channel(REQUEST_QUEUE);
        let handle = CoordinatorHandle {
            requests,
            events: self.event_sender(),
        };

        let task = tokio::spawn(async move {
            self.register().await;

            let mut stats_tick = tokio::time::interval(self.stats_interval());
            stats_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

            let mut inbox_open = true;
            let mut commands_open = true;
            while inbox_open || commands_open {
                tokio::select! {
                    request = inbox.recv(), if inbox_open => match request {
                        Some(request) => {
                            if !self.serve(request).await {
                                break;
                            }
                        }
                        None => inbox_open = false,
                    },
                    inbound = commands.recv(), if commands_open => match inbound {
                        Some(inbound) => self.handle_command(inbound).await,
                        None => {
                            info!("Conference command stream closed");
                            commands_open = false;
                        }
                    },
                    _ = stats_tick.tick() => self.publish_progress().await,
                }
            }
            info!("Coordinator stopped");
        });

        (handle, task)
    }

    /// Returns false once the loop should end
    async fn serve(&mut self, request: Request) -> bool {
        match request {
            Request::StartRecording(reply) => {
                let _ = reply.send(self.start_recording().await);
            }
            Request::StartRecordingWith(token, reply) => {
                let _ = reply.send(self.start_recording_with(token).await);
            }
            Request::StopRecording(reply) => {
                let _ = reply.send(self.stop_recording().await);
            }
            Request::SwitchFormat(name, reply) => {
                let _ = reply.send(self.switch_format(&name));
            }
            Request::SetMuted(muted, reply) => {
                self.set_muted(muted);
                let _ = reply.send(());
            }
            Request::SetMicDevice(device_id, reply) => {
                let _ = reply.send(self.set_mic_device(&device_id).await);
            }
            Request::ExportSession(token, reply) => {
                let _ = reply.send(self.export_session(token).await);
            }
            Request::RecordedData(token, reply) => {
                let _ = reply.send(self.recorded_data(token).await);
            }
            Request::LocalStats(reply) => {
                let _ = reply.send(self.local_stats());
            }
            Request::ParticipantsStats(reply) => {
                let _ = reply.send(self.participants_stats());
            }
            Request::Status(reply) => {
                let _ = reply.send(CoordinatorStatus {
                    state: self.state(),
                    session_token: self.current_session_token(),
                    format: self.format(),
                    muted: self.is_muted(),
                    mic_device_id: self.mic_device_id().to_string(),
                });
            }
            Request::Sessions(reply) => {
                let _ = reply.send(self.sessions().sessions());
            }
            Request::Shutdown(reply) => {
                self.shutdown().await;
                let _ = reply.send(());
                return false;
            }
        }
        true
    }
}

/// Cloneable access to a running [`Coordinator`]
#[derive(Clone)]
pub struct CoordinatorHandle {
    requests: mpsc::Sender<Request>,
    events: broadcast::Sender<CoordinatorEvent>,
}

impl CoordinatorHandle {
    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Request) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(make(tx))
            .await
            .map_err(|_| RecordingError::CoordinatorStopped)?;
        rx.await.map_err(|_| RecordingError::CoordinatorStopped)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.events.subscribe()
    }

    pub async fn start_recording(&self) -> Result<SessionToken> {
        self.call(Request::StartRecording).await?
    }

    pub async fn start_recording_with(&self, token: SessionToken) -> Result<()> {
        self.call(|tx| Request::StartRecordingWith(token, tx)).await?
    }

    pub async fn stop_recording(&self) -> Result<()> {
        self.call(Request::StopRecording).await?
    }

    pub async fn switch_format(&self, name: &str) -> Result<RecordingFormat> {
        let name = name.to_string();
        self.call(|tx| Request::SwitchFormat(name, tx)).await?
    }

    pub async fn set_muted(&self, muted: bool) -> Result<()> {
        self.call(|tx| Request::SetMuted(muted, tx)).await
    }

    pub async fn set_mic_device(&self, device_id: &str) -> Result<()> {
        let device_id = device_id.to_string();
        self.call(|tx| Request::SetMicDevice(device_id, tx)).await?
    }

    /// Re-run export and upload of a stopped session
    pub async fn export_session(&self, token: SessionToken) -> Result<()> {
        self.call(|tx| Request::ExportSession(token, tx)).await?
    }

    pub async fn recorded_data(&self, token: SessionToken) -> Result<RecordedData> {
        self.call(|tx| Request::RecordedData(token, tx)).await?
    }

    pub async fn local_stats(&self) -> Result<RecordingStats> {
        self.call(Request::LocalStats).await
    }

    pub async fn participants_stats(&self) -> Result<StatsSnapshot> {
        self.call(Request::ParticipantsStats).await
    }

    pub async fn status(&self) -> Result<CoordinatorStatus> {
        self.call(Request::Status).await
    }

    pub async fn state(&self) -> Result<ControllerState> {
        Ok(self.status().await?.state)
    }

    pub async fn sessions(&self) -> Result<Vec<SessionEntry>> {
        self.call(Request::Sessions).await
    }

    /// Stop a running local recording and end the coordinator task
    pub async fn shutdown(&self) -> Result<()> {
        self.call(Request::Shutdown).await
    }
}
