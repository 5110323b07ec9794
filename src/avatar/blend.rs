//! Per-tick blend-shape synthesis.
//!
//! [`FacialBlender::apply_frame`] layers three independent contributions:
//! the viseme pair (interpolated, then low-pass filtered against the
//! previous tick), the mood baseline, and a procedural idle overlay on head
//! pose and gaze whose amplitude drops while speaking.

use std::collections::BTreeMap;

use serde::Serialize;

use super::mood::Mood;
use super::shapes::{VISEME_TARGETS, viseme_weight};
use crate::config::{AvatarConfig, MotionIntensity};
use crate::lipsync::VisemeId;

pub const EYE_LOOK_UP_LEFT: &str = "eyeLookUpLeft";
pub const EYE_LOOK_UP_RIGHT: &str = "eyeLookUpRight";
pub const EYE_LOOK_DOWN_LEFT: &str = "eyeLookDownLeft";
pub const EYE_LOOK_DOWN_RIGHT: &str = "eyeLookDownRight";

/// Head offset from the rest pose. Position in scene units, rotation in radians.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct HeadPose {
    pub position: [f32; 3],
    pub rotation: [f32; 3],
}

/// Influence vector for one animation tick. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BlendShapeFrame {
    pub influences: BTreeMap<&'static str, f32>,
    pub head: HeadPose,
}

impl BlendShapeFrame {
    /// Influence of `target`, 0 when absent.
    pub fn get(&self, target: &str) -> f32 {
        self.influences.get(target).copied().unwrap_or(0.0)
    }
}

/// Turns resolved visemes, mood and idle phase into blend-shape frames.
#[derive(Debug, Clone)]
pub struct FacialBlender {
    smoothing: f32,
    idle: MotionIntensity,
    speaking_motion: MotionIntensity,
    speaking: bool,
    previous: BTreeMap<&'static str, f32>,
}

impl FacialBlender {
    pub fn new(config: &AvatarConfig) -> Self {
        Self {
            smoothing: config.smoothing.clamp(f32::MIN_POSITIVE, 1.0),
            idle: config.idle,
            speaking_motion: config.speaking,
            speaking: false,
            previous: BTreeMap::new(),
        }
    }

    /// Select which idle intensity applies.
    pub fn set_speaking(&mut self, speaking: bool) {
        self.speaking = speaking;
    }

    /// Forget smoothing history so the next frame starts from rest.
    pub fn reset(&mut self) {
        self.previous.clear();
    }

    /// Compute the frame for one tick.
    ///
    /// `t` is the progress from `viseme` towards `next_viseme`; `idle_phase`
    /// is a monotonically increasing time in seconds.
    pub fn apply_frame(
        &mut self,
        viseme: VisemeId,
        next_viseme: VisemeId,
        t: f32,
        mood: Mood,
        idle_phase: f64,
    ) -> BlendShapeFrame {
        let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.0 };
        let mut influences = BTreeMap::new();

        for target in VISEME_TARGETS {
            let from = viseme_weight(viseme, target);
            let to = viseme_weight(next_viseme, target);
            let goal = from + (to - from) * t;
            let prev = self.previous.get(target).copied().unwrap_or(0.0);
            let value = (prev + (goal - prev) * self.smoothing).clamp(0.0, 1.0);
            self.previous.insert(target, value);
            influences.insert(target, value);
        }

        for (target, offset) in mood.offsets() {
            let v = influences.entry(*target).or_insert(0.0);
            *v = (*v + offset).clamp(0.0, 1.0);
        }

        let motion = if self.speaking {
            self.speaking_motion
        } else {
            self.idle
        };
        let head = idle_head(idle_phase, motion.head);
        for (target, value) in idle_eyes(idle_phase, motion.eyes) {
            influences.insert(target, value);
        }

        BlendShapeFrame { influences, head }
    }
}

fn idle_head(phase: f64, intensity: f32) -> HeadPose {
    let s = |freq: f64, amp: f64| ((phase * freq).sin() * amp) as f32 * intensity;
    HeadPose {
        position: [0.0, s(0.5, 0.002), 0.0],
        rotation: [s(0.3, 0.02), s(0.2, 0.03), s(0.25, 0.01)],
    }
}

fn idle_eyes(phase: f64, intensity: f32) -> [(&'static str, f32); 4] {
    let wave = ((phase * 0.8).sin() * 0.3) as f32 * intensity;
    let up = wave.clamp(0.0, 1.0);
    let down = (-wave).clamp(0.0, 1.0);
    [
        (EYE_LOOK_UP_LEFT, up),
        (EYE_LOOK_UP_RIGHT, up),
        (EYE_LOOK_DOWN_LEFT, down),
        (EYE_LOOK_DOWN_RIGHT, down),
    ]
}
