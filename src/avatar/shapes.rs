//! Viseme → ARKit blend-shape targets.
//!
//! Each viseme drives a small set of mouth, jaw and tongue targets. Mouth
//! corners and brows are left to [`super::mood`], so the two never write
//! the same control; lateral lip spread uses `mouthStretch*` for that reason.

use crate::lipsync::VisemeId;

pub const JAW_OPEN: &str = "jawOpen";
pub const MOUTH_OPEN: &str = "mouthOpen";
pub const MOUTH_CLOSE: &str = "mouthClose";
pub const MOUTH_PUCKER: &str = "mouthPucker";
pub const MOUTH_FUNNEL: &str = "mouthFunnel";
pub const MOUTH_LOWER_DOWN_LEFT: &str = "mouthLowerDownLeft";
pub const MOUTH_LOWER_DOWN_RIGHT: &str = "mouthLowerDownRight";
pub const MOUTH_STRETCH_LEFT: &str = "mouthStretchLeft";
pub const MOUTH_STRETCH_RIGHT: &str = "mouthStretchRight";
pub const TONGUE_OUT: &str = "tongueOut";

/// Every target a viseme may drive. Targets not listed for a viseme are 0.
pub const VISEME_TARGETS: [&str; 10] = [
    JAW_OPEN,
    MOUTH_OPEN,
    MOUTH_CLOSE,
    MOUTH_PUCKER,
    MOUTH_FUNNEL,
    MOUTH_LOWER_DOWN_LEFT,
    MOUTH_LOWER_DOWN_RIGHT,
    MOUTH_STRETCH_LEFT,
    MOUTH_STRETCH_RIGHT,
    TONGUE_OUT,
];

/// The partial frame a viseme contributes at full weight.
pub fn viseme_shape(viseme: VisemeId) -> &'static [(&'static str, f32)] {
    match viseme {
        VisemeId::Sil => &[(MOUTH_CLOSE, 1.0)],
        VisemeId::PP => &[(MOUTH_PUCKER, 0.8), (MOUTH_CLOSE, 0.4), (MOUTH_OPEN, 0.1)],
        VisemeId::FF => &[
            (MOUTH_LOWER_DOWN_LEFT, 0.7),
            (MOUTH_LOWER_DOWN_RIGHT, 0.7),
            (MOUTH_OPEN, 0.2),
        ],
        VisemeId::TH => &[(TONGUE_OUT, 0.8), (MOUTH_OPEN, 0.3), (JAW_OPEN, 0.2)],
        VisemeId::DD => &[(MOUTH_OPEN, 0.4), (TONGUE_OUT, 0.4), (JAW_OPEN, 0.3)],
        VisemeId::KK => &[(MOUTH_OPEN, 0.5), (JAW_OPEN, 0.6), (MOUTH_CLOSE, 0.2)],
        VisemeId::CH => &[(MOUTH_PUCKER, 0.6), (MOUTH_OPEN, 0.4), (JAW_OPEN, 0.3)],
        VisemeId::SS => &[
            (MOUTH_STRETCH_LEFT, 0.4),
            (MOUTH_STRETCH_RIGHT, 0.4),
            (MOUTH_OPEN, 0.1),
            (MOUTH_CLOSE, 0.3),
        ],
        VisemeId::NN => &[(MOUTH_OPEN, 0.3), (TONGUE_OUT, 0.3), (JAW_OPEN, 0.2)],
        VisemeId::RR => &[(MOUTH_FUNNEL, 0.5), (MOUTH_OPEN, 0.3), (JAW_OPEN, 0.2)],
        VisemeId::AA => &[(JAW_OPEN, 0.9), (MOUTH_OPEN, 0.9)],
        VisemeId::E => &[
            (MOUTH_STRETCH_LEFT, 0.7),
            (MOUTH_STRETCH_RIGHT, 0.7),
            (JAW_OPEN, 0.4),
            (MOUTH_OPEN, 0.5),
        ],
        VisemeId::I => &[
            (MOUTH_STRETCH_LEFT, 0.9),
            (MOUTH_STRETCH_RIGHT, 0.9),
            (JAW_OPEN, 0.2),
            (MOUTH_OPEN, 0.3),
        ],
        VisemeId::O => &[(MOUTH_FUNNEL, 0.9), (JAW_OPEN, 0.6), (MOUTH_OPEN, 0.6)],
        VisemeId::U => &[
            (MOUTH_PUCKER, 0.9),
            (MOUTH_FUNNEL, 0.8),
            (JAW_OPEN, 0.3),
            (MOUTH_OPEN, 0.4),
        ],
    }
}

/// Weight of `target` under `viseme`, 0 when unset.
pub fn viseme_weight(viseme: VisemeId, target: &str) -> f32 {
    viseme_shape(viseme)
        .iter()
        .find(|(name, _)| *name == target)
        .map_or(0.0, |(_, w)| *w)
}
