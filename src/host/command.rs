//! Line commands accepted by the headless host.

use crate::avatar::Mood;
use crate::error::{EngineError, Result};

/// One stdin line, parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCommand {
    /// `/record`: start streaming the microphone.
    Record,
    /// `/stop`: stop recording and any playback.
    Stop,
    /// `/history`: request the conversation so far.
    History,
    /// `/clear`: clear the conversation on the server.
    Clear,
    /// `/mood <neutral|happy|sad|angry>`
    Mood(Mood),
    /// `/quit`
    Quit,
    /// Anything not starting with `/` is sent as typed input.
    Text(String),
}

/// Parse one input line. Blank lines yield `None`.
///
/// # Errors
///
/// Returns [`EngineError::Config`] for an unknown command or a bad argument.
pub fn parse_command(line: &str) -> Result<Option<HostCommand>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Some(HostCommand::Text(line.to_owned())));
    };

    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };
    let command = match name {
        "record" => HostCommand::Record,
        "stop" => HostCommand::Stop,
        "history" => HostCommand::History,
        "clear" => HostCommand::Clear,
        "quit" | "exit" => HostCommand::Quit,
        "mood" => HostCommand::Mood(arg.parse()?),
        other => return Err(EngineError::Config(format!("unknown command '/{other}'"))),
    };
    Ok(Some(command))
}
