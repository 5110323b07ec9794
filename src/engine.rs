//! The voice engine facade consumed by the UI layer.
//!
//! [`VoiceEngine`] composes the session, the capture pipeline, the playback
//! coordinator and the facial blender. It is constructed explicitly with its
//! collaborators; [`VoiceEngine::with_defaults`] wires the real devices and
//! a WebSocket connector.
//!
//! Inbound `voice_response` messages are queued to a playback task, which
//! decodes them and starts the speaker on the blocking pool one at a time,
//! in arrival order, so the session task keeps reading frames meanwhile. A
//! `visemes` message received before a response supplies that response's
//! timing; otherwise timing is derived from the response text.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::audio::capture::{AudioSource, CpalSource};
use crate::audio::codec::{AudioClip, decode_response_audio};
use crate::audio::pipeline::CapturePipeline;
use crate::audio::playback::{AudioSink, CpalSink};
use crate::avatar::{AvatarRuntimeState, BlendShapeFrame, FacialBlender, Mood};
use crate::clock::{Clock, SystemClock};
use crate::config::{EngineConfig, LipSyncConfig};
use crate::coordinator::{PlaybackCoordinator, PlaybackEnd};
use crate::error::{ErrorInfo, Result};
use crate::events::{
    EngineEvent, EventBus, EventKind, PlaybackPhase, SubscriptionId, WeakEventBus,
};
use crate::lipsync::{LipSyncSchedule, build_schedule};
use crate::protocol::manager::{MessageSink, SessionManager};
use crate::protocol::messages::{LipSyncPayload, OutboundMessage, VoiceResponse};
use crate::protocol::session::{ConnectionState, Session};
use crate::protocol::transport::{Connector, WsConnector};

/// Playback state shared with the inbound message handlers.
struct Playback {
    coordinator: PlaybackCoordinator,
    /// Server timing for the next response.
    pending: Option<LipSyncPayload>,
}

/// A response waiting for the playback task, with the timing it claimed.
struct QueuedResponse {
    response: VoiceResponse,
    timing: Option<LipSyncPayload>,
}

/// Duplex voice session plus avatar animation.
pub struct VoiceEngine {
    events: EventBus,
    session: SessionManager,
    capture: Mutex<CapturePipeline>,
    playback: Arc<Mutex<Playback>>,
    blender: Mutex<FacialBlender>,
    clock: Arc<dyn Clock>,
    worker: CancellationToken,
}

impl VoiceEngine {
    /// Build an engine from its collaborators.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::EngineError::Config`] if `config` is invalid.
    ///
    /// Must be called within a tokio runtime.
    pub fn new(
        config: EngineConfig,
        connector: Arc<dyn Connector>,
        source: Box<dyn AudioSource>,
        sink: Box<dyn AudioSink>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let events = EventBus::new();
        let session = SessionManager::new(config.session.clone(), connector, events.clone());
        let capture = CapturePipeline::new(
            config.capture.clone(),
            source,
            Arc::new(session.clone()),
            events.clone(),
        );
        let playback = Arc::new(Mutex::new(Playback {
            coordinator: PlaybackCoordinator::new(sink, Arc::clone(&clock)),
            pending: None,
        }));

        let shared = Arc::clone(&playback);
        events.on(EventKind::LipSync, move |event| {
            if let EngineEvent::LipSync(payload) = event {
                debug!("received {} server visemes", payload.timing.len());
                lock(&shared).pending = Some(payload.clone());
            }
        });

        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let shared = Arc::clone(&playback);
        events.on(EventKind::VoiceResponse, move |event| {
            if let EngineEvent::VoiceResponse(response) = event {
                // Claim the timing now so it pairs with this response.
                let timing = lock(&shared).pending.take();
                let queued = QueuedResponse {
                    response: response.clone(),
                    timing,
                };
                if queue_tx.send(queued).is_err() {
                    warn!("playback task gone; dropping response");
                }
            }
        });

        let worker = CancellationToken::new();
        tokio::spawn(playback_loop(
            queue_rx,
            Arc::clone(&playback),
            events.downgrade(),
            config.lipsync.clone(),
            worker.clone(),
        ));

        Ok(Self {
            events,
            session,
            capture: Mutex::new(capture),
            playback,
            blender: Mutex::new(FacialBlender::new(&config.avatar)),
            clock,
            worker,
        })
    }

    /// Engine on the system microphone and speakers over WebSocket.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::EngineError::Config`] if `config` is invalid.
    pub fn with_defaults(config: EngineConfig) -> Result<Self> {
        let source = Box::new(CpalSource::new(&config.audio));
        let sink = Box::new(CpalSink::new(&config.audio));
        Self::new(
            config,
            Arc::new(WsConnector),
            source,
            sink,
            Arc::new(SystemClock::new()),
        )
    }

    // ---------------------------------------------------------------------
    // Session
    // ---------------------------------------------------------------------

    /// Open the session for `user_id`. No-op if connecting or connected.
    pub fn connect(&self, user_id: &str) -> bool {
        self.session.connect(user_id)
    }

    /// Stop recording and close the session without reconnecting.
    pub fn disconnect(&self) {
        self.stop_recording();
        self.session.disconnect();
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.session.state()
    }

    pub fn session(&self) -> Session {
        self.session.session()
    }

    /// Send a typed message instead of speech.
    pub fn send_text(
        &self,
        text: &str,
        context: Option<serde_json::Value>,
        locale: Option<&str>,
    ) -> bool {
        let text = text.trim();
        if text.is_empty() {
            warn!("not sending empty text input");
            return false;
        }
        self.session.send(OutboundMessage::TextInput {
            text: text.to_owned(),
            locale: locale.map(str::to_owned),
            context,
        })
    }

    /// Ask the server for the conversation so far.
    pub fn request_history(&self) -> bool {
        self.session.send(OutboundMessage::GetHistory)
    }

    pub fn clear_history(&self) -> bool {
        self.session.send(OutboundMessage::ClearHistory)
    }

    // ---------------------------------------------------------------------
    // Capture
    // ---------------------------------------------------------------------

    /// Start streaming the microphone. `true` if recording afterwards.
    pub fn start_recording(&self) -> bool {
        lock(&self.capture).start()
    }

    pub fn stop_recording(&self) {
        lock(&self.capture).stop();
    }

    pub fn is_recording(&self) -> bool {
        lock(&self.capture).is_capturing()
    }

    // ---------------------------------------------------------------------
    // Events
    // ---------------------------------------------------------------------

    pub fn on<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&EngineEvent) + Send + Sync + 'static,
    {
        self.events.on(kind, handler)
    }

    pub fn on_any<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&EngineEvent) + Send + Sync + 'static,
    {
        self.events.on_any(handler)
    }

    pub fn off(&self, id: SubscriptionId) -> bool {
        self.events.off(id)
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    // ---------------------------------------------------------------------
    // Avatar
    // ---------------------------------------------------------------------

    pub fn set_mood(&self, mood: Mood) {
        lock(&self.playback).coordinator.set_mood(mood);
    }

    /// Record that the renderer has loaded the avatar.
    pub fn mark_avatar_ready(&self) {
        lock(&self.playback).coordinator.set_ready(true);
    }

    /// Snapshot for the renderer.
    pub fn avatar_state(&self) -> AvatarRuntimeState {
        lock(&self.playback).coordinator.state().clone()
    }

    /// Halt response audio and return the avatar to idle.
    pub fn stop_playback(&self) {
        let end = lock(&self.playback).coordinator.stop();
        if let Some(end) = end {
            self.emit_end(end);
        }
    }

    /// Advance the animation by one frame.
    ///
    /// Call once per rendered frame. Detects the end of playback, resolves
    /// the current viseme pair and blends mood and idle motion on top.
    pub fn tick(&self) -> BlendShapeFrame {
        let (resolved, mood, speaking, end) = {
            let mut playback = lock(&self.playback);
            let end = playback.coordinator.poll();
            let state = playback.coordinator.state();
            (
                playback.coordinator.resolve(),
                state.mood,
                state.playing,
                end,
            )
        };
        if let Some(end) = end {
            self.emit_end(end);
        }

        let mut blender = lock(&self.blender);
        blender.set_speaking(speaking);
        blender.apply_frame(
            resolved.current,
            resolved.next,
            resolved.t,
            mood,
            self.clock.now().as_secs_f64(),
        )
    }

    fn emit_end(&self, end: PlaybackEnd) {
        let phase = match end {
            PlaybackEnd::Finished => PlaybackPhase::Finished,
            PlaybackEnd::Stopped => PlaybackPhase::Stopped,
        };
        self.events.emit(EngineEvent::Playback { phase });
    }
}

impl Drop for VoiceEngine {
    fn drop(&mut self) {
        self.worker.cancel();
        self.disconnect();
        lock(&self.playback).coordinator.stop();
    }
}

/// Start queued responses one after another.
///
/// Decoding and opening the output device block, so each response is
/// handled on the blocking pool while this task waits for it.
async fn playback_loop(
    mut queue: mpsc::UnboundedReceiver<QueuedResponse>,
    shared: Arc<Mutex<Playback>>,
    events: WeakEventBus,
    lipsync: LipSyncConfig,
    cancel: CancellationToken,
) {
    loop {
        let queued = tokio::select! {
            _ = cancel.cancelled() => break,
            queued = queue.recv() => match queued {
                Some(queued) => queued,
                None => break,
            },
        };

        let shared = Arc::clone(&shared);
        let events = events.clone();
        let lipsync = lipsync.clone();
        let started = tokio::task::spawn_blocking(move || {
            start_response(&shared, &events, &lipsync, queued);
        })
        .await;
        if let Err(e) = started {
            warn!("response playback task failed: {e}");
        }
    }
    debug!("playback task stopped");
}

/// Decode a response and start it playing. Failures leave the avatar idle
/// and are reported as playback errors.
fn start_response(
    shared: &Mutex<Playback>,
    events: &WeakEventBus,
    lipsync: &LipSyncConfig,
    queued: QueuedResponse,
) {
    let QueuedResponse { response, timing } = queued;
    let prepared = prepare(&response, timing, lipsync);

    let mut emitted = Vec::new();
    {
        let mut playback = lock(shared);
        let interrupted = playback.coordinator.stop().is_some();
        if interrupted {
            emitted.push(EngineEvent::Playback {
                phase: PlaybackPhase::Stopped,
            });
        }

        match prepared {
            Err(e) => {
                warn!("cannot play response: {e}");
                emitted.push(EngineEvent::Error(ErrorInfo::from(&e)));
            }
            Ok(None) => debug!("response has nothing to play"),
            Ok(Some((clip, schedule))) => {
                match playback.coordinator.play(clip.as_ref(), schedule) {
                    Ok(()) => {
                        info!("response playback started");
                        emitted.push(EngineEvent::Playback {
                            phase: PlaybackPhase::Started,
                        });
                    }
                    Err(e) => emitted.push(EngineEvent::Error(ErrorInfo::from(&e))),
                }
            }
        }
    }
    for event in emitted {
        events.emit(event);
    }
}

type Prepared = (Option<AudioClip>, LipSyncSchedule);

/// Decode the audio and pick the schedule for a response.
fn prepare(
    response: &VoiceResponse,
    pending: Option<LipSyncPayload>,
    lipsync: &LipSyncConfig,
) -> Result<Option<Prepared>> {
    let clip = decode_response_audio(&response.audio_response, response.format.as_deref())?;
    let clip = clip.filter(|c| !c.is_empty());
    let audio_duration = clip.as_ref().map(|c| c.duration());

    let schedule = match pending {
        Some(payload) if !payload.timing.is_empty() => {
            let duration = audio_duration.unwrap_or(payload.duration);
            LipSyncSchedule::from_timings(&payload.timing, duration)
        }
        _ => build_schedule(&response.ai_response, audio_duration, lipsync),
    };

    if clip.is_none() && schedule.is_empty() {
        return Ok(None);
    }
    Ok(Some((clip, schedule)))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
