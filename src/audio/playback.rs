//! Audio playback to system speakers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use tracing::{error, info};

use super::codec::AudioClip;
use super::convert::{resample, to_interleaved};
use crate::config::AudioConfig;
use crate::error::{EngineError, Result};

/// How often the playback thread checks for drained buffers.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Somewhere to play decoded audio.
///
/// `start` begins playback without blocking; completion is observed by
/// polling [`AudioSink::is_finished`].
pub trait AudioSink: Send {
    /// Begin playing `clip`, replacing anything already playing.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Playback`] if no output stream can be opened.
    fn start(&mut self, clip: &AudioClip) -> Result<()>;

    /// `true` once the last started clip has drained, or nothing is playing.
    fn is_finished(&self) -> bool;

    /// Halt immediately. Safe to call repeatedly.
    fn stop(&mut self);
}

/// Speaker output via cpal.
pub struct CpalSink {
    device_name: Option<String>,
    active: Option<PlaybackThread>,
}

struct PlaybackThread {
    stop_tx: Sender<()>,
    finished: Arc<AtomicBool>,
    handle: thread::JoinHandle<()>,
}

/// Internal buffer for tracking playback progress.
struct PlaybackBuffer {
    samples: Vec<f32>,
    position: usize,
}

impl CpalSink {
    pub fn new(config: &AudioConfig) -> Self {
        Self {
            device_name: config.output_device.clone(),
            active: None,
        }
    }

    /// List available output devices.
    ///
    /// # Errors
    ///
    /// Returns an error if devices cannot be enumerated.
    pub fn list_output_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host
            .output_devices()
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

impl AudioSink for CpalSink {
    fn start(&mut self, clip: &AudioClip) -> Result<()> {
        self.stop();

        let (ready_tx, ready_rx) = bounded::<Result<()>>(1);
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let finished = Arc::new(AtomicBool::new(false));
        let thread_finished = Arc::clone(&finished);
        let device_name = self.device_name.clone();
        let clip = clip.clone();

        let handle = thread::Builder::new()
            .name("audio-playback".to_owned())
            .spawn(move || {
                run_playback_thread(device_name.as_deref(), clip, thread_finished, ready_tx, stop_rx);
            })
            .map_err(|e| EngineError::Playback(format!("failed to spawn playback thread: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.active = Some(PlaybackThread {
                    stop_tx,
                    finished,
                    handle,
                });
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(EngineError::Playback("playback thread exited early".into()))
            }
        }
    }

    fn is_finished(&self) -> bool {
        self.active
            .as_ref()
            .is_none_or(|a| a.finished.load(Ordering::Acquire))
    }

    fn stop(&mut self) {
        if let Some(active) = self.active.take() {
            let _ = active.stop_tx.send(());
            if active.handle.join().is_err() {
                error!("audio playback thread panicked");
            }
        }
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_playback_thread(
    device_name: Option<&str>,
    clip: AudioClip,
    finished: Arc<AtomicBool>,
    ready_tx: Sender<Result<()>>,
    stop_rx: Receiver<()>,
) {
    let drained = Arc::new(AtomicBool::new(false));
    let stream = match build_stream(device_name, &clip, Arc::clone(&drained)) {
        Ok(s) => s,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };
    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(EngineError::Playback(format!(
            "failed to start output stream: {e}"
        ))));
        return;
    }
    let _ = ready_tx.send(Ok(()));

    loop {
        match stop_rx.recv_timeout(POLL_INTERVAL) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                if drained.load(Ordering::Acquire) {
                    break;
                }
            }
        }
    }

    drop(stream);
    finished.store(true, Ordering::Release);
}

fn build_stream(
    device_name: Option<&str>,
    clip: &AudioClip,
    drained: Arc<AtomicBool>,
) -> Result<cpal::Stream> {
    let host = cpal::default_host();

    let device = if let Some(name) = device_name {
        host.output_devices()
            .map_err(|e| EngineError::Playback(format!("cannot enumerate devices: {e}")))?
            .find(|d| {
                d.description()
                    .ok()
                    .map(|desc| desc.name() == name)
                    .unwrap_or(false)
            })
            .ok_or_else(|| EngineError::Playback(format!("output device '{name}' not found")))?
    } else {
        host.default_output_device()
            .ok_or_else(|| EngineError::Playback("no default output device".into()))?
    };

    let device_label = device
        .description()
        .map(|d| d.name().to_owned())
        .unwrap_or_else(|_| "<unknown>".into());

    let default_config = device
        .default_output_config()
        .map_err(|e| EngineError::Playback(format!("no default output config: {e}")))?;
    let device_rate = default_config.sample_rate();
    let channels = default_config.channels();

    let stream_config = StreamConfig {
        channels,
        sample_rate: device_rate,
        buffer_size: cpal::BufferSize::Default,
    };

    let samples = to_interleaved(
        &resample(&clip.samples, clip.sample_rate, device_rate),
        channels,
    );
    info!(
        "playing {:.2}s on {device_label} ({device_rate}Hz, {channels} ch)",
        clip.duration()
    );

    let buffer = Arc::new(Mutex::new(PlaybackBuffer {
        samples,
        position: 0,
    }));

    device
        .build_output_stream(
            &stream_config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                let mut buf = match buffer.lock() {
                    Ok(b) => b,
                    Err(_) => return,
                };

                for sample in data.iter_mut() {
                    if buf.position < buf.samples.len() {
                        *sample = buf.samples[buf.position];
                        buf.position += 1;
                    } else {
                        *sample = 0.0;
                        drained.store(true, Ordering::Release);
                    }
                }
            },
            move |err| {
                error!("audio output stream error: {err}");
            },
            None,
        )
        .map_err(|e| EngineError::Playback(format!("failed to build output stream: {e}")))
}
