//! Emotional baseline applied on top of speech.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

pub const MOUTH_SMILE_LEFT: &str = "mouthSmileLeft";
pub const MOUTH_SMILE_RIGHT: &str = "mouthSmileRight";
pub const MOUTH_FROWN_LEFT: &str = "mouthFrownLeft";
pub const MOUTH_FROWN_RIGHT: &str = "mouthFrownRight";
pub const BROW_INNER_UP: &str = "browInnerUp";
pub const BROW_DOWN_LEFT: &str = "browDownLeft";
pub const BROW_DOWN_RIGHT: &str = "browDownRight";

/// Targets owned by mood. Disjoint from the viseme targets.
pub const MOOD_TARGETS: [&str; 7] = [
    MOUTH_SMILE_LEFT,
    MOUTH_SMILE_RIGHT,
    MOUTH_FROWN_LEFT,
    MOUTH_FROWN_RIGHT,
    BROW_INNER_UP,
    BROW_DOWN_LEFT,
    BROW_DOWN_RIGHT,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mood {
    #[default]
    Neutral,
    Happy,
    Sad,
    Angry,
}

impl Mood {
    /// Static additive offsets for this mood.
    pub fn offsets(self) -> &'static [(&'static str, f32)] {
        match self {
            Mood::Neutral => &[],
            Mood::Happy => &[
                (MOUTH_SMILE_LEFT, 0.3),
                (MOUTH_SMILE_RIGHT, 0.3),
                (BROW_INNER_UP, 0.2),
            ],
            Mood::Sad => &[
                (MOUTH_FROWN_LEFT, 0.4),
                (MOUTH_FROWN_RIGHT, 0.4),
                (BROW_DOWN_LEFT, 0.3),
                (BROW_DOWN_RIGHT, 0.3),
            ],
            Mood::Angry => &[(BROW_DOWN_LEFT, 0.6), (BROW_DOWN_RIGHT, 0.6)],
        }
    }
}

impl fmt::Display for Mood {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mood::Neutral => write!(f, "neutral"),
            Mood::Happy => write!(f, "happy"),
            Mood::Sad => write!(f, "sad"),
            Mood::Angry => write!(f, "angry"),
        }
    }
}

impl FromStr for Mood {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "neutral" => Ok(Mood::Neutral),
            "happy" => Ok(Mood::Happy),
            "sad" => Ok(Mood::Sad),
            "angry" => Ok(Mood::Angry),
            other => Err(EngineError::Config(format!("unknown mood '{other}'"))),
        }
    }
}
