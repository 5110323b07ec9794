//! Avatar runtime state read by the renderer.

use std::time::Duration;

use serde::Serialize;

use super::mood::Mood;
use crate::lipsync::LipSyncSchedule;

/// What the renderer needs to know about the avatar right now.
///
/// Written only by the playback coordinator; callers get snapshots.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AvatarRuntimeState {
    /// The renderer has loaded the model.
    pub ready: bool,
    /// An utterance is playing.
    pub playing: bool,
    /// Schedule of the utterance being played.
    pub current_schedule: Option<LipSyncSchedule>,
    /// Clock reading when the current utterance started.
    pub schedule_start: Option<Duration>,
    pub mood: Mood,
}

impl AvatarRuntimeState {
    /// Seconds into the current schedule at clock reading `now`.
    pub fn elapsed(&self, now: Duration) -> Option<f64> {
        if !self.playing {
            return None;
        }
        self.schedule_start
            .map(|start| now.saturating_sub(start).as_secs_f64())
    }

    /// Return to idle: nothing playing, no schedule.
    pub fn clear_playback(&mut self) {
        self.playing = false;
        self.current_schedule = None;
        self.schedule_start = None;
    }
}
