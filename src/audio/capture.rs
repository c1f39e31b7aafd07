use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::backend::{AudioBackend, AudioBackendConfig, AudioFrame, DeviceProvider};
use super::encoder::PcmBuffer;
use crate::error::{RecordingError, Result};

/// The device currently feeding the engine
struct ActiveInput {
    device_id: String,
    generation: u64,
    backend: Box<dyn AudioBackend>,
    shutdown: oneshot::Sender<()>,
    pump: JoinHandle<()>,
}

/// Collects PCM from one input device at a time
///
/// Frames are appended to a shared buffer by a pump task. While muted the
/// pump still appends, but silence, so the captured duration keeps growing.
/// The input device can be swapped without losing what was captured.
/// Only the pump of the current input generation may append, so frames of
/// two devices never interleave during a swap.
pub struct CaptureEngine {
    devices: Arc<dyn DeviceProvider>,
    config: AudioBackendConfig,
    buffer: Arc<Mutex<PcmBuffer>>,
    muted: Arc<AtomicBool>,
    live_generation: Arc<AtomicU64>,
    next_generation: u64,
    input: Option<ActiveInput>,
}

impl CaptureEngine {
    pub fn new(devices: Arc<dyn DeviceProvider>, config: AudioBackendConfig) -> Self {
        let buffer = PcmBuffer::new(config.sample_rate, config.channels);
        Self {
            devices,
            config,
            buffer: Arc::new(Mutex::new(buffer)),
            muted: Arc::new(AtomicBool::new(false)),
            live_generation: Arc::new(AtomicU64::new(0)),
            next_generation: 0,
            input: None,
        }
    }

    /// Begin capturing from `device_id`
    pub async fn start(&mut self, device_id: &str) -> Result<()> {
        if let Some(input) = &self.input {
            warn!("Capture already running on {}", input.device_id);
            return Ok(());
        }

        let input = self.open_input(device_id).await?;
        self.make_live(&input);
        self.input = Some(input);
        Ok(())
    }

    /// Hot-swap the input device
    ///
    /// The new device is opened before the old one is released, so a failure
    /// leaves the previous device capturing.
    pub async fn switch_device(&mut self, device_id: &str) -> Result<()> {
        let next = self.open_input(device_id).await?;
        self.make_live(&next);

        if let Some(previous) = self.input.replace(next) {
            info!("Switched input {} -> {}", previous.device_id, device_id);
            Self::close_input(previous).await;
        }

        Ok(())
    }

    /// Stop capturing and return everything captured so far
    pub async fn stop(&mut self) -> PcmBuffer {
        if let Some(input) = self.input.take() {
            Self::close_input(input).await;
        }
        self.snapshot()
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    pub fn is_capturing(&self) -> bool {
        self.input.is_some()
    }

    pub fn device_id(&self) -> Option<&str> {
        self.input.as_ref().map(|input| input.device_id.as_str())
    }

    /// Copy of the captured PCM
    pub fn snapshot(&self) -> PcmBuffer {
        lock(&self.buffer).clone()
    }

    /// Captured PCM size in bytes and duration in seconds
    pub fn progress(&self) -> (u64, f64) {
        let buffer = lock(&self.buffer);
        (buffer.byte_len(), buffer.duration_secs())
    }

    /// Hand the buffer to `input`; appends of any older pump are refused from now on
    fn make_live(&self, input: &ActiveInput) {
        let _buffer = lock(&self.buffer);
        self.live_generation.store(input.generation, Ordering::SeqCst);
    }

    async fn open_input(&mut self, device_id: &str) -> Result<ActiveInput> {
        let unavailable = |e: anyhow::Error| RecordingError::DeviceUnavailable {
            device_id: device_id.to_string(),
            reason: e.to_string(),
        };

        let mut backend = self.devices.open(device_id, &self.config).map_err(unavailable)?;
        let frames = backend.start().await.map_err(unavailable)?;

        info!("Capturing from {} ({})", device_id, backend.name());

        self.next_generation += 1;
        let generation = self.next_generation;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let pump = tokio::spawn(Self::pump(
            frames,
            shutdown_rx,
            PumpTarget {
                buffer: Arc::clone(&self.buffer),
                muted: Arc::clone(&self.muted),
                live_generation: Arc::clone(&self.live_generation),
                generation,
            },
        ));

        Ok(ActiveInput {
            device_id: device_id.to_string(),
            generation,
            backend,
            shutdown: shutdown_tx,
            pump,
        })
    }

    async fn close_input(mut input: ActiveInput) {
        if let Err(e) = input.backend.stop().await {
            error!("Failed to stop {}: {}", input.backend.name(), e);
        }

        // The pump drains whatever the backend delivered before stopping
        let _ = input.shutdown.send(());
        if let Err(e) = input.pump.await {
            error!("Capture pump for {} panicked: {}", input.device_id, e);
        }
    }

    async fn pump(
        mut frames: mpsc::Receiver<AudioFrame>,
        mut shutdown: oneshot::Receiver<()>,
        target: PumpTarget,
    ) {
        loop {
            tokio::select! {
                frame = frames.recv() => match frame {
                    Some(frame) => target.append(frame),
                    None => break,
                },
                _ = &mut shutdown => {
                    while let Ok(frame) = frames.try_recv() {
                        target.append(frame);
                    }
                    break;
                }
            }
        }
    }
}

/// Where one pump delivers its frames
struct PumpTarget {
    buffer: Arc<Mutex<PcmBuffer>>,
    muted: Arc<AtomicBool>,
    live_generation: Arc<AtomicU64>,
    generation: u64,
}

impl PumpTarget {
    fn append(&self, mut frame: AudioFrame) {
        let mut buffer = lock(&self.buffer);

        if self.live_generation.load(Ordering::SeqCst) != self.generation {
            return;
        }

        if frame.sample_rate != buffer.sample_rate || frame.channels != buffer.channels {
            warn!(
                "Dropping frame with unexpected layout ({}Hz/{}ch, expected {}Hz/{}ch)",
                frame.sample_rate, frame.channels, buffer.sample_rate, buffer.channels
            );
            return;
        }

        if self.muted.load(Ordering::SeqCst) {
            frame.silence();
        }
        buffer.samples.extend_from_slice(&frame.samples);
    }
}

fn lock(buffer: &Mutex<PcmBuffer>) -> std::sync::MutexGuard<'_, PcmBuffer> {
    buffer.lock().unwrap_or_else(|e| e.into_inner())
}
