//! Wire messages exchanged with the voice service.
//!
//! Every frame is a JSON object with a `type` discriminator. Inbound types
//! this client does not know decode to [`InboundMessage::Unknown`] and are
//! skipped, so new server messages never break older clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::lipsync::PhonemeTiming;

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    AudioChunk {
        /// Base64 audio.
        data: String,
        format: String,
        sequence: u64,
    },
    TextInput {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        locale: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        context: Option<serde_json::Value>,
    },
    Ping,
    GetHistory,
    ClearHistory,
}

impl OutboundMessage {
    /// The `type` tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AudioChunk { .. } => "audio_chunk",
            Self::TextInput { .. } => "text_input",
            Self::Ping => "ping",
            Self::GetHistory => "get_history",
            Self::ClearHistory => "clear_history",
        }
    }

    /// Serialize to a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Protocol`] if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| EngineError::Protocol(e.to_string()))
    }
}

/// A synthesized reply to one user turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceResponse {
    /// What the service heard.
    pub transcript: String,
    /// What the assistant said.
    pub ai_response: String,
    /// Base64 audio of `ai_response`; may be empty.
    pub audio_response: String,
    pub timestamp: String,
    /// Container hint for `audio_response` (`mp3`, `wav`, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

/// How a past turn was submitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnKind {
    #[default]
    Voice,
    Text,
}

/// One prior exchange in the conversation history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationTurn {
    pub timestamp: String,
    pub user_input: String,
    pub ai_response: String,
    #[serde(rename = "type")]
    pub kind: TurnKind,
}

impl ConversationTurn {
    /// Parse `timestamp` as RFC 3339, assuming UTC when the zone is missing.
    pub fn timestamp_utc(&self) -> Option<DateTime<Utc>> {
        if let Ok(t) = DateTime::parse_from_rfc3339(&self.timestamp) {
            return Some(t.with_timezone(&Utc));
        }
        chrono::NaiveDateTime::parse_from_str(&self.timestamp, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }
}

/// A server-computed viseme timeline for the next response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LipSyncPayload {
    pub visemes: Vec<String>,
    pub timing: Vec<PhonemeTiming>,
    pub duration: f64,
    pub language: String,
    pub text: String,
    pub word_count: usize,
}

/// Messages received from the server.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    VoiceResponse(VoiceResponse),
    ProcessingStatus {
        #[serde(default)]
        status: String,
    },
    Error {
        #[serde(default)]
        message: String,
    },
    Pong {},
    ConversationHistory {
        #[serde(default)]
        history: Vec<ConversationTurn>,
    },
    HistoryCleared {},
    Visemes(LipSyncPayload),
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type", default)]
    kind: Option<String>,
}

/// Decode one inbound text frame.
///
/// Returns `Ok(None)` for well-formed frames of an unrecognised type.
///
/// # Errors
///
/// Returns [`EngineError::Protocol`] for invalid JSON, a missing `type`, or
/// a known type whose payload does not match.
pub fn decode_inbound(text: &str) -> Result<Option<InboundMessage>> {
    match serde_json::from_str::<InboundMessage>(text) {
        Ok(InboundMessage::Unknown) => {
            let kind = serde_json::from_str::<Envelope>(text)
                .ok()
                .and_then(|e| e.kind)
                .unwrap_or_default();
            tracing::warn!("ignoring unknown message type '{kind}'");
            Ok(None)
        }
        Ok(msg) => Ok(Some(msg)),
        Err(e) => Err(EngineError::Protocol(format!("malformed message: {e}"))),
    }
}
