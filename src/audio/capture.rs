//! Microphone audio capture.
//!
//! [`CpalSource`] captures at the device's native format on a dedicated
//! thread (a cpal stream is not `Send`) and delivers mono samples at the
//! configured rate.

use std::thread;

use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender, bounded};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use super::convert::{resample, to_mono};
use crate::config::AudioConfig;
use crate::error::{EngineError, Result};

/// A microphone that can be opened and closed repeatedly.
///
/// Only one open handle exists at a time: `open` on an already open source
/// must release the previous handle first.
pub trait AudioSource: Send {
    /// Acquire the device and stream mono sample blocks into `tx`.
    ///
    /// Returns the sample rate of the delivered blocks.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Device`] if the device is missing, busy, or
    /// permission is denied.
    fn open(&mut self, tx: mpsc::UnboundedSender<Vec<f32>>) -> Result<u32>;

    /// Release the device. Safe to call when not open.
    fn close(&mut self);

    fn is_open(&self) -> bool;
}

/// System microphone via cpal.
pub struct CpalSource {
    device_name: Option<String>,
    target_sample_rate: u32,
    active: Option<CaptureThread>,
}

struct CaptureThread {
    stop_tx: Sender<()>,
    handle: thread::JoinHandle<()>,
}

impl CpalSource {
    pub fn new(config: &AudioConfig) -> Self {
        Self {
            device_name: config.input_device.clone(),
            target_sample_rate: config.input_sample_rate,
            active: None,
        }
    }

    /// List available input devices.
    ///
    /// # Errors
    ///
    /// Returns an error if devices cannot be enumerated.
    pub fn list_input_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|e| EngineError::Device(format!("cannot enumerate devices: {e}")))?;

        let mut names = Vec::new();
        for device in devices {
            if let Ok(desc) = device.description() {
                names.push(desc.name().to_owned());
            }
        }
        Ok(names)
    }
}

impl AudioSource for CpalSource {
    fn open(&mut self, tx: mpsc::UnboundedSender<Vec<f32>>) -> Result<u32> {
        self.close();

        let (ready_tx, ready_rx) = bounded::<Result<()>>(1);
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let device_name = self.device_name.clone();
        let target_rate = self.target_sample_rate;

        let handle = thread::Builder::new()
            .name("audio-capture".to_owned())
            .spawn(move || {
                run_capture_thread(device_name.as_deref(), target_rate, tx, ready_tx, stop_rx);
            })
            .map_err(|e| EngineError::Device(format!("failed to spawn capture thread: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.active = Some(CaptureThread { stop_tx, handle });
                Ok(target_rate)
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(EngineError::Device("capture thread exited early".into()))
            }
        }
    }

    fn close(&mut self) {
        if let Some(active) = self.active.take() {
            let _ = active.stop_tx.send(());
            if active.handle.join().is_err() {
                error!("audio capture thread panicked");
            }
        }
    }

    fn is_open(&self) -> bool {
        self.active.is_some()
    }
}

impl Drop for CpalSource {
    fn drop(&mut self) {
        self.close();
    }
}

fn run_capture_thread(
    device_name: Option<&str>,
    target_rate: u32,
    tx: mpsc::UnboundedSender<Vec<f32>>,
    ready_tx: Sender<Result<()>>,
    stop_rx: Receiver<()>,
) {
    let stream = match build_stream(device_name, target_rate, tx) {
        Ok(s) => s,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };
    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(EngineError::Device(format!(
            "failed to start input stream: {e}"
        ))));
        return;
    }
    let _ = ready_tx.send(Ok(()));

    // Hold the stream alive until told to stop.
    let _ = stop_rx.recv();
    drop(stream);
    info!("audio capture stopped");
}

fn build_stream(
    device_name: Option<&str>,
    target_rate: u32,
    tx: mpsc::UnboundedSender<Vec<f32>>,
) -> Result<cpal::Stream> {
    let host = cpal::default_host();

    let device = if let Some(name) = device_name {
        host.input_devices()
            .map_err(|e| EngineError::Device(format!("cannot enumerate devices: {e}")))?
            .find(|d| {
                d.description()
                    .ok()
                    .map(|desc| desc.name() == name)
                    .unwrap_or(false)
            })
            .ok_or_else(|| EngineError::Device(format!("input device '{name}' not found")))?
    } else {
        host.default_input_device()
            .ok_or_else(|| EngineError::Device("no default input device".into()))?
    };

    let device_label = device
        .description()
        .map(|d| d.name().to_owned())
        .unwrap_or_else(|_| "<unknown>".into());
    info!("using input device: {device_label}");

    let default_config = device
        .default_input_config()
        .map_err(|e| EngineError::Device(format!("no default input config: {e}")))?;
    let native_rate = default_config.sample_rate();
    let native_channels = default_config.channels();

    let stream_config = StreamConfig {
        channels: native_channels,
        sample_rate: native_rate,
        buffer_size: cpal::BufferSize::Default,
    };
    debug!("native input config: {native_rate}Hz, {native_channels} channels -> {target_rate}Hz");

    device
        .build_input_stream(
            &stream_config,
            move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                let mono = to_mono(data, native_channels);
                let samples = resample(&mono, native_rate, target_rate);
                // Unbounded: the audio callback must never block or drop samples.
                let _ = tx.send(samples);
            },
            move |err| {
                error!("audio input stream error: {err}");
            },
            None,
        )
        .map_err(|e| EngineError::Device(format!("failed to build input stream: {e}")))
}
