//! Viseme timing engine.
//!
//! Text → phonemes ([`phoneme`]) → visemes ([`viseme`]) → a time-indexed
//! [`LipSyncSchedule`] that is resolved once per animation tick.

pub mod phoneme;
pub mod schedule;
pub mod viseme;

pub use schedule::{
    LipSyncSchedule, PhonemeTiming, Resolved, VisemeEvent, build_schedule, resolve,
};
pub use viseme::{VisemeId, phoneme_to_viseme};
