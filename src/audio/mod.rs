//! Audio capture, chunk encoding, response decoding, and playback via cpal.

pub mod capture;
pub mod codec;
pub mod convert;
pub mod pipeline;
pub mod playback;

pub use capture::{AudioSource, CpalSource};
pub use codec::AudioClip;
pub use pipeline::CapturePipeline;
pub use playback::{AudioSink, CpalSink};
