//! Starts response audio and the lip-sync clock together, and returns the
//! avatar to idle when either finishes or is cancelled.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::audio::codec::AudioClip;
use crate::audio::playback::AudioSink;
use crate::avatar::{AvatarRuntimeState, Mood};
use crate::clock::Clock;
use crate::error::{EngineError, Result};
use crate::lipsync::{LipSyncSchedule, Resolved};

/// How a playback ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEnd {
    Finished,
    Stopped,
}

/// Sole writer of [`AvatarRuntimeState`].
pub struct PlaybackCoordinator {
    sink: Box<dyn AudioSink>,
    clock: Arc<dyn Clock>,
    state: AvatarRuntimeState,
    /// The current utterance has audio; completion follows the sink.
    has_audio: bool,
}

impl PlaybackCoordinator {
    pub fn new(sink: Box<dyn AudioSink>, clock: Arc<dyn Clock>) -> Self {
        Self {
            sink,
            clock,
            state: AvatarRuntimeState::default(),
            has_audio: false,
        }
    }

    /// Play `clip` with `schedule`, replacing anything in progress.
    ///
    /// Without a clip the schedule runs on the clock alone.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Playback`] if the sink cannot start. The
    /// avatar is left idle.
    pub fn play(&mut self, clip: Option<&AudioClip>, schedule: LipSyncSchedule) -> Result<()> {
        self.halt();

        if let Some(clip) = clip
            && let Err(e) = self.sink.start(clip)
        {
            warn!("playback failed to start: {e}");
            return Err(match e {
                EngineError::Playback(_) => e,
                other => EngineError::Playback(other.to_string()),
            });
        }

        debug!(
            "playing {} visemes over {:.2}s",
            schedule.len(),
            schedule.total_duration()
        );
        self.has_audio = clip.is_some();
        self.state.current_schedule = Some(schedule);
        self.state.schedule_start = Some(self.clock.now());
        self.state.playing = true;
        Ok(())
    }

    /// Check for natural completion. Returns how playback ended, if it did
    /// on this call.
    pub fn poll(&mut self) -> Option<PlaybackEnd> {
        if !self.state.playing {
            return None;
        }
        let done = if self.has_audio {
            self.sink.is_finished()
        } else {
            let total = self
                .state
                .current_schedule
                .as_ref()
                .map_or(0.0, LipSyncSchedule::total_duration);
            self.elapsed().is_none_or(|e| e >= total)
        };
        if !done {
            return None;
        }
        self.halt();
        Some(PlaybackEnd::Finished)
    }

    /// Halt audio and return to idle. Safe in any state.
    ///
    /// Returns [`PlaybackEnd::Stopped`] if something was playing.
    pub fn stop(&mut self) -> Option<PlaybackEnd> {
        let was_playing = self.state.playing;
        self.halt();
        was_playing.then_some(PlaybackEnd::Stopped)
    }

    /// Viseme pair for the current clock reading; silence when idle.
    pub fn resolve(&self) -> Resolved {
        match (&self.state.current_schedule, self.elapsed()) {
            (Some(schedule), Some(elapsed)) => schedule.resolve(elapsed),
            _ => Resolved::SILENT,
        }
    }

    /// Seconds into the current utterance.
    pub fn elapsed(&self) -> Option<f64> {
        self.state.elapsed(self.clock.now())
    }

    pub fn set_mood(&mut self, mood: Mood) {
        self.state.mood = mood;
    }

    pub fn set_ready(&mut self, ready: bool) {
        self.state.ready = ready;
    }

    pub fn state(&self) -> &AvatarRuntimeState {
        &self.state
    }

    fn halt(&mut self) {
        self.sink.stop();
        self.has_audio = false;
        self.state.clear_playback();
    }
}
