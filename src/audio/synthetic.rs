// Synthetic input devices
//
// Generates a sine tone in real time. Used by the demo host and by tests on
// machines without capture hardware.

use anyhow::{bail, Result};
use std::collections::HashMap;
use std::f32::consts::PI;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::backend::{AudioBackend, AudioBackendConfig, AudioFrame, DeviceProvider};

/// Behaviour of one synthetic device
#[derive(Debug, Clone)]
pub struct SyntheticDevice {
    /// Tone frequency in Hz
    pub frequency_hz: f32,
    /// Peak amplitude
    pub amplitude: i16,
    /// Refuse to start (simulates a busy or unplugged device)
    pub fail_on_start: bool,
    /// Delay before the device starts delivering frames
    pub start_delay: Duration,
}

impl Default for SyntheticDevice {
    fn default() -> Self {
        Self {
            frequency_hz: 440.0,
            amplitude: 8000,
            fail_on_start: false,
            start_delay: Duration::ZERO,
        }
    }
}

/// Device provider backed by tone generators
pub struct SyntheticDevices {
    devices: Mutex<HashMap<String, SyntheticDevice>>,
}

impl SyntheticDevices {
    /// Provider with a single `default` device
    pub fn new() -> Self {
        let mut devices = HashMap::new();
        devices.insert("default".to_string(), SyntheticDevice::default());
        Self {
            devices: Mutex::new(devices),
        }
    }

    pub fn with_device(self, device_id: &str, device: SyntheticDevice) -> Self {
        self.insert(device_id, device);
        self
    }

    pub fn insert(&self, device_id: &str, device: SyntheticDevice) {
        self.lock().insert(device_id.to_string(), device);
    }

    pub fn remove(&self, device_id: &str) {
        self.lock().remove(device_id);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, SyntheticDevice>> {
        // a poisoned map is still a valid map
        self.devices.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for SyntheticDevices {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceProvider for SyntheticDevices {
    fn open(&self, device_id: &str, config: &AudioBackendConfig) -> Result<Box<dyn AudioBackend>> {
        let device = match self.lock().get(device_id) {
            Some(device) => device.clone(),
            None => bail!("no such device: {}", device_id),
        };

        Ok(Box::new(SyntheticBackend::new(device_id, device, config.clone())))
    }

    fn device_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }
}

/// Tone generator bound to one synthetic device
pub struct SyntheticBackend {
    name: String,
    device: SyntheticDevice,
    config: AudioBackendConfig,
    running: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl SyntheticBackend {
    pub fn new(device_id: &str, device: SyntheticDevice, config: AudioBackendConfig) -> Self {
        Self {
            name: format!("synthetic:{}", device_id),
            device,
            config,
            running: Arc::new(AtomicBool::new(false)),
            task: None,
        }
    }
}

#[async_trait::async_trait]
impl AudioBackend for SyntheticBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if self.running.load(Ordering::SeqCst) {
            bail!("Already capturing");
        }
        if self.device.fail_on_start {
            bail!("{} refused to start", self.name);
        }
        if !self.device.start_delay.is_zero() {
            tokio::time::sleep(self.device.start_delay).await;
        }

        info!(
            "Starting {} ({}Hz, {} channels)",
            self.name, self.config.sample_rate, self.config.channels
        );

        let (tx, rx) = mpsc::channel(64);
        self.running.store(true, Ordering::SeqCst);

        let running = Arc::clone(&self.running);
        let config = self.config.clone();
        let device = self.device.clone();
        let frame_duration = Duration::from_millis(config.frame_duration_ms.max(1));

        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(frame_duration);
            let samples_per_frame = config.samples_per_frame();
            let step = 2.0 * PI * device.frequency_hz / config.sample_rate as f32;
            let mut phase = 0.0f32;
            let mut timestamp_ms = 0u64;

            loop {
                ticker.tick().await;
                if !running.load(Ordering::SeqCst) {
                    break;
                }

                let mut samples = Vec::with_capacity(samples_per_frame * config.channels as usize);
                for _ in 0..samples_per_frame {
                    let value = (phase.sin() * device.amplitude as f32) as i16;
                    for _ in 0..config.channels {
                        samples.push(value);
                    }
                    phase = (phase + step) % (2.0 * PI);
                }

                let frame = AudioFrame {
                    samples,
                    sample_rate: config.sample_rate,
                    channels: config.channels,
                    timestamp_ms,
                };
                timestamp_ms += config.frame_duration_ms;

                if tx.send(frame).await.is_err() {
                    debug!("Frame receiver dropped, stopping generator");
                    break;
                }
            }
        }));

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);

        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("{} generator task panicked: {}", self.name, e);
            }
        }

        info!("Stopped {}", self.name);
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
