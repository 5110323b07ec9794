//! Voxface: duplex voice sessions with a lip-synced 3D avatar.
//!
//! The engine keeps a WebSocket session to a conversational voice service,
//! streams microphone audio up in WAV chunks, plays spoken responses back,
//! and drives the avatar's mouth from a viseme schedule while mood and idle
//! motion are blended on top.
//!
//! # Architecture
//!
//! - **Protocol**: wire messages, a pure session state machine with fixed
//!   backoff reconnects, and the task that runs it over a socket
//! - **Audio**: capture via `cpal`, WAV chunk encoding, response decoding
//!   via `symphonia`, and playback
//! - **Lip-sync**: text → phonemes → visemes → time-indexed schedule
//! - **Avatar**: mood, idle motion, and per-frame blend shape weights
//! - **Coordinator**: starts audio and the viseme clock together and
//!   returns the avatar to idle
//! - **Engine**: the facade the UI layer talks to

pub mod audio;
pub mod avatar;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod events;
pub mod host;
pub mod lipsync;
pub mod protocol;

#[cfg(test)]
pub(crate) mod test_utils;

pub use avatar::{AvatarRuntimeState, BlendShapeFrame, Mood};
pub use config::EngineConfig;
pub use engine::VoiceEngine;
pub use error::{EngineError, ErrorInfo, ErrorKind, Result};
pub use events::{EngineEvent, EventKind, PlaybackPhase, SubscriptionId};
pub use lipsync::{LipSyncSchedule, VisemeId, build_schedule};
pub use protocol::{ConnectionState, OutboundMessage, VoiceResponse};
