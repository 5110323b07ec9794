//! Configuration types for the voice engine.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{EngineError, Result};

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Duplex session channel settings.
    pub session: SessionConfig,
    /// Audio device selection.
    pub audio: AudioConfig,
    /// Microphone chunking settings.
    pub capture: CaptureConfig,
    /// Text-to-viseme timing settings.
    pub lipsync: LipSyncConfig,
    /// Facial animation settings.
    pub avatar: AvatarConfig,
}

/// Session channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// WebSocket endpoint. The user id is appended as the final path segment.
    pub endpoint: String,
    /// How long a connecting attempt may take before it is abandoned.
    pub connect_timeout_ms: u64,
    /// Interval between keep-alive pings while connected.
    pub keepalive_interval_ms: u64,
    /// Reconnect attempts allowed before giving up.
    pub max_reconnect_attempts: u32,
    /// Backoff delays, clamped at the last entry.
    pub reconnect_delays_ms: Vec<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://localhost:8000/api/v1/voice/ws/v2v".to_owned(),
            connect_timeout_ms: 10_000,
            keepalive_interval_ms: 30_000,
            max_reconnect_attempts: 5,
            reconnect_delays_ms: vec![2_000, 5_000, 10_000, 20_000, 30_000],
        }
    }
}

impl SessionConfig {
    /// Build the channel URL for a user.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] if the endpoint is not a valid
    /// hierarchical URL.
    pub fn url_for(&self, user_id: &str) -> Result<Url> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|e| EngineError::Config(format!("invalid endpoint: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| EngineError::Config("endpoint cannot carry a path".into()))?
            .pop_if_empty()
            .push(user_id);
        Ok(url)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }
}

/// Audio device selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Sample rate delivered to the capture pipeline, in Hz.
    pub input_sample_rate: u32,
    /// Input device name (None = system default).
    pub input_device: Option<String>,
    /// Output device name (None = system default).
    pub output_device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_sample_rate: 16_000,
            input_device: None,
            output_device: None,
        }
    }
}

/// Microphone chunking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Fixed interval at which buffered audio is flushed as one chunk.
    pub flush_interval_ms: u64,
    /// Encoding label sent with each chunk.
    pub format: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: 1_000,
            format: "wav".to_owned(),
        }
    }
}

impl CaptureConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

/// Text-to-viseme timing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LipSyncConfig {
    /// Silence inserted between words, in seconds.
    pub word_gap: f64,
    /// Minimum nominal duration of a single phoneme, in seconds.
    pub min_phoneme: f64,
    /// Speaking rate used when the audio length is unknown, in seconds per character.
    pub seconds_per_char: f64,
}

impl Default for LipSyncConfig {
    fn default() -> Self {
        Self {
            word_gap: 0.08,
            min_phoneme: 0.05,
            seconds_per_char: 0.08,
        }
    }
}

/// Amplitude of the procedural idle overlay.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionIntensity {
    /// Scales head sway.
    pub head: f32,
    /// Scales eye drift.
    pub eyes: f32,
}

impl Default for MotionIntensity {
    fn default() -> Self {
        Self {
            head: 0.5,
            eyes: 0.3,
        }
    }
}

/// Facial animation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AvatarConfig {
    /// Exponential smoothing factor per tick. 1.0 disables smoothing.
    pub smoothing: f32,
    /// Idle overlay while silent.
    pub idle: MotionIntensity,
    /// Idle overlay while speaking.
    pub speaking: MotionIntensity,
}

impl Default for AvatarConfig {
    fn default() -> Self {
        Self {
            smoothing: 0.4,
            idle: MotionIntensity::default(),
            speaking: MotionIntensity {
                head: 0.3,
                eyes: 0.15,
            },
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] on malformed TOML.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| EngineError::Config(e.to_string()))
    }

    /// Load from [`Self::default_config_path`] if it exists, else defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be parsed.
    pub fn load_or_default() -> Result<Self> {
        let path = Self::default_config_path();
        if path.exists() {
            Self::from_file(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| EngineError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `<config dir>/voxface/config.toml`.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| std::env::temp_dir().join("voxface-config"))
            .join("voxface")
            .join("config.toml")
    }

    /// Check value ranges that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.session.endpoint)
            .map_err(|e| invalid("session.endpoint", &e.to_string()))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(invalid("session.endpoint", "scheme must be ws or wss"));
        }
        if self.session.connect_timeout_ms == 0 {
            return Err(invalid("session.connect_timeout_ms", "must be positive"));
        }
        if self.session.keepalive_interval_ms == 0 {
            return Err(invalid("session.keepalive_interval_ms", "must be positive"));
        }
        if self.session.reconnect_delays_ms.is_empty() {
            return Err(invalid("session.reconnect_delays_ms", "must not be empty"));
        }
        if self.capture.flush_interval_ms == 0 {
            return Err(invalid("capture.flush_interval_ms", "must be positive"));
        }
        if self.audio.input_sample_rate == 0 {
            return Err(invalid("audio.input_sample_rate", "must be positive"));
        }
        if !(self.lipsync.word_gap >= 0.0
            && self.lipsync.min_phoneme > 0.0
            && self.lipsync.seconds_per_char > 0.0)
        {
            return Err(invalid("lipsync", "durations must be positive"));
        }
        if !(self.avatar.smoothing > 0.0 && self.avatar.smoothing <= 1.0) {
            return Err(invalid("avatar.smoothing", "must be in (0, 1]"));
        }
        for (field, m) in [
            ("avatar.idle", self.avatar.idle),
            ("avatar.speaking", self.avatar.speaking),
        ] {
            if m.head < 0.0 || m.eyes < 0.0 {
                return Err(invalid(field, "intensities must not be negative"));
            }
        }
        Ok(())
    }
}

fn invalid(field: &str, message: &str) -> EngineError {
    EngineError::Config(format!("{field}: {message}"))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.session.max_reconnect_attempts, 5);
        assert_eq!(
            config.session.reconnect_delays_ms,
            vec![2_000, 5_000, 10_000, 20_000, 30_000]
        );
        assert_eq!(config.session.connect_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            [session]
            endpoint = "wss://voice.example.com/ws"

            [avatar]
            smoothing = 1.0
            "#,
        )
        .unwrap();
        assert_eq!(config.session.endpoint, "wss://voice.example.com/ws");
        assert_eq!(config.session.keepalive_interval_ms, 30_000);
        assert!((config.avatar.smoothing - 1.0).abs() < f32::EPSILON);
        assert_eq!(config.capture.format, "wav");
    }

    #[test]
    fn malformed_toml_is_config_error() {
        let err = EngineConfig::from_toml_str("[session\nendpoint=").unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn url_appends_user_segment() {
        let session = SessionConfig::default();
        let url = session.url_for("user-42").unwrap();
        assert_eq!(
            url.as_str(),
            "ws://localhost:8000/api/v1/voice/ws/v2v/user-42"
        );

        let trailing = SessionConfig {
            endpoint: "ws://host/ws/".into(),
            ..SessionConfig::default()
        };
        assert_eq!(trailing.url_for("a").unwrap().as_str(), "ws://host/ws/a");
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut config = EngineConfig::default();
        config.session.endpoint = "http://localhost".into();
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.session.reconnect_delays_ms.clear();
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.avatar.smoothing = 0.0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.avatar.speaking.eyes = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = EngineConfig::default();
        config.session.endpoint = "wss://example.org/voice".into();
        config.capture.flush_interval_ms = 250;
        config.avatar.idle.head = 0.9;

        config.save_to_file(&path).unwrap();
        let loaded = EngineConfig::from_file(&path).unwrap();
        assert_eq!(loaded.session.endpoint, "wss://example.org/voice");
        assert_eq!(loaded.capture.flush_interval_ms, 250);
        assert!((loaded.avatar.idle.head - 0.9).abs() < f32::EPSILON);
    }
}
