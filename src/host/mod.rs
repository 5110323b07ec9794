//! Headless host: drives a [`crate::VoiceEngine`] from stdin and reports its
//! events as JSON lines on stdout.

pub mod command;
pub mod stdio;

pub use command::{HostCommand, parse_command};
pub use stdio::run_stdio_host;
