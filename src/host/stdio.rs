//! Stdin/stdout loop for the headless host.
//!
//! Reads line commands from stdin and writes every engine event as one JSON
//! line to stdout. Stdout is reserved for events; diagnostics go to stderr
//! through tracing.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use super::command::{HostCommand, parse_command};
use crate::engine::VoiceEngine;
use crate::error::{EngineError, Result};

/// Animation tick rate.
const FRAME_INTERVAL: Duration = Duration::from_millis(33);

/// Run the host until stdin closes or `/quit` is read.
///
/// Three tasks run side by side: the event forwarder, the animation ticker,
/// and the stdin reader on the current task. The session is disconnected
/// when the reader finishes.
///
/// # Errors
///
/// Returns an error if the session cannot be opened for `user_id` or stdin
/// cannot be read.
pub async fn run_stdio_host(engine: Arc<VoiceEngine>, user_id: &str) -> Result<()> {
    let mut events = engine.subscribe();
    let forwarder = tokio::spawn(async move {
        let mut out = BufWriter::new(tokio::io::stdout());
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => {
                        if let Err(e) = write_line(&mut out, &json).await {
                            tracing::warn!("stdout closed; stopping event forwarder: {e}");
                            break;
                        }
                    }
                    Err(e) => tracing::error!("failed to serialize event: {e}"),
                },
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!("event forwarder lagged; {n} events dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let cancel = CancellationToken::new();
    let ticker = {
        let engine = Arc::clone(&engine);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(FRAME_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        engine.tick();
                    }
                }
            }
        })
    };

    let result = if engine.connect(user_id) {
        run_reader(&engine).await
    } else {
        Err(EngineError::Config(format!(
            "cannot open a session for '{user_id}'"
        )))
    };

    cancel.cancel();
    engine.stop_playback();
    engine.disconnect();
    let _ = ticker.await;
    // Let the final connection events reach stdout.
    tokio::time::sleep(Duration::from_millis(50)).await;
    forwarder.abort();
    let _ = forwarder.await;

    result
}

async fn run_reader(engine: &VoiceEngine) -> Result<()> {
    let mut reader = BufReader::new(tokio::io::stdin());
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = reader
            .read_line(&mut line)
            .await
            .map_err(|e| EngineError::Channel(format!("failed to read from stdin: {e}")))?;
        if bytes_read == 0 {
            tracing::info!("stdin closed; shutting down");
            break;
        }

        let command = match parse_command(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!("{e}");
                continue;
            }
        };
        if !dispatch(engine, command) {
            tracing::info!("quit requested; shutting down");
            break;
        }
    }
    Ok(())
}

/// Apply one command. Returns `false` when the host should exit.
fn dispatch(engine: &VoiceEngine, command: HostCommand) -> bool {
    match command {
        HostCommand::Record => {
            if !engine.start_recording() {
                tracing::warn!("recording did not start");
            }
        }
        HostCommand::Stop => {
            engine.stop_recording();
            engine.stop_playback();
        }
        HostCommand::History => {
            engine.request_history();
        }
        HostCommand::Clear => {
            engine.clear_history();
        }
        HostCommand::Mood(mood) => engine.set_mood(mood),
        HostCommand::Text(text) => {
            engine.send_text(&text, None, None);
        }
        HostCommand::Quit => return false,
    }
    true
}

async fn write_line(out: &mut BufWriter<tokio::io::Stdout>, json: &str) -> std::io::Result<()> {
    out.write_all(json.as_bytes()).await?;
    out.write_all(b"\n").await?;
    out.flush().await
}
