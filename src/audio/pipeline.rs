//! Microphone to `audio_chunk` messages.
//!
//! While capturing, samples accumulate and are flushed on a fixed interval
//! as one base64 WAV chunk each. Every chunk carries only the samples since
//! the previous flush, with a sequence number that increases for the life
//! of the pipeline.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::capture::AudioSource;
use super::codec::encode_wav_base64;
use crate::config::CaptureConfig;
use crate::error::ErrorInfo;
use crate::events::{EngineEvent, EventBus};
use crate::protocol::manager::MessageSink;
use crate::protocol::messages::OutboundMessage;

/// Owns the microphone while recording.
pub struct CapturePipeline {
    config: CaptureConfig,
    source: Box<dyn AudioSource>,
    outlet: Arc<dyn MessageSink>,
    events: EventBus,
    sequence: Arc<AtomicU64>,
    active: Option<ActiveCapture>,
}

struct ActiveCapture {
    cancel: CancellationToken,
    flusher: Arc<Flusher>,
    task: JoinHandle<()>,
}

/// Everything needed to emit a chunk. Delivered blocks wait in `pending`
/// until the next flush; the timer task and `stop` both drain it under the
/// same lock so no block is sent twice.
struct Flusher {
    outlet: Arc<dyn MessageSink>,
    events: EventBus,
    format: String,
    sample_rate: u32,
    sequence: Arc<AtomicU64>,
    pending: Mutex<mpsc::UnboundedReceiver<Vec<f32>>>,
}

impl CapturePipeline {
    pub fn new(
        config: CaptureConfig,
        source: Box<dyn AudioSource>,
        outlet: Arc<dyn MessageSink>,
        events: EventBus,
    ) -> Self {
        Self {
            config,
            source,
            outlet,
            events,
            sequence: Arc::new(AtomicU64::new(0)),
            active: None,
        }
    }

    /// Start recording. Returns `true` if capturing afterwards.
    ///
    /// Already capturing is a no-op. Device failures are reported as an
    /// error event and yield `false`. Must be called within a tokio runtime.
    pub fn start(&mut self) -> bool {
        if self.active.is_some() {
            return true;
        }

        // Release any stale handle before acquiring a new one.
        self.source.close();
        let (tx, rx) = mpsc::unbounded_channel();
        let sample_rate = match self.source.open(tx) {
            Ok(rate) => rate,
            Err(e) => {
                warn!("cannot start capture: {e}");
                self.events.emit(EngineEvent::Error(ErrorInfo::from(&e)));
                return false;
            }
        };
        info!("capture started at {sample_rate}Hz");

        let flusher = Arc::new(Flusher {
            outlet: Arc::clone(&self.outlet),
            events: self.events.clone(),
            format: self.config.format.clone(),
            sample_rate,
            sequence: Arc::clone(&self.sequence),
            pending: Mutex::new(rx),
        });
        let cancel = CancellationToken::new();
        let task = tokio::spawn(flush_loop(
            Arc::clone(&flusher),
            self.config.flush_interval(),
            cancel.clone(),
        ));
        self.active = Some(ActiveCapture {
            cancel,
            flusher,
            task,
        });
        true
    }

    /// Stop recording and release the device.
    ///
    /// Buffered audio is sent as a final chunk before this returns, so a
    /// caller may close the session right after.
    pub fn stop(&mut self) {
        if let Some(active) = self.active.take() {
            self.source.close();
            active.cancel.cancel();
            // The source is closed by now; take whatever it delivered last.
            active.flusher.flush_pending();
            info!("capture stopped");
        }
    }

    pub fn is_capturing(&self) -> bool {
        self.source.is_open()
            && self.active.as_ref().is_some_and(|a| !a.task.is_finished())
    }

    /// Sequence number the next chunk will carry.
    pub fn next_sequence(&self) -> u64 {
        self.sequence.load(Ordering::Acquire)
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn flush_loop(flusher: Arc<Flusher>, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    // Skip the first immediate tick.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if !flusher.flush_pending() {
                    debug!("capture source hung up");
                    break;
                }
            }
        }
    }
}

impl Flusher {
    /// Send everything delivered since the last flush as one chunk.
    /// Returns `false` once the source has dropped its sender.
    fn flush_pending(&self) -> bool {
        let mut rx = match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut buffer: Vec<f32> = Vec::new();
        let open = loop {
            match rx.try_recv() {
                Ok(block) => buffer.extend_from_slice(&block),
                Err(TryRecvError::Empty) => break true,
                Err(TryRecvError::Disconnected) => break false,
            }
        };
        // Still under the lock, so chunks leave in sequence order.
        self.flush(&mut buffer);
        open
    }

    fn flush(&self, buffer: &mut Vec<f32>) {
        if buffer.is_empty() {
            return;
        }
        let data = match encode_wav_base64(buffer, self.sample_rate) {
            Ok(data) => data,
            Err(e) => {
                warn!("dropping {} samples: {e}", buffer.len());
                self.events.emit(EngineEvent::Error(ErrorInfo::from(&e)));
                buffer.clear();
                return;
            }
        };
        let sequence = self.sequence.fetch_add(1, Ordering::AcqRel);
        debug!("flushing chunk {sequence} ({} samples)", buffer.len());
        buffer.clear();
        self.outlet.send(OutboundMessage::AudioChunk {
            data,
            format: self.format.clone(),
            sequence,
        });
    }
}
