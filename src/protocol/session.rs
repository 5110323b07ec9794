//! Session state and its transition function.
//!
//! The session is a plain value advanced by [`transition`]. Timers, sockets
//! and callbacks live in [`super::manager`]; here every input maps to a new
//! session plus a list of [`Effect`]s for the driver to carry out, so the
//! reconnect policy is testable without a runtime.
//!
//! Each connection attempt carries an `attempt_id`. Inputs tagged with an
//! id other than the session's current one come from a superseded attempt
//! and are ignored.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::config::SessionConfig;
use crate::error::ErrorInfo;

/// Close code sent and recognised for an intentional, clean shutdown.
pub const NORMAL_CLOSE: u16 = 1000;

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Not connected; a manual `connect` is needed.
    #[default]
    Disconnected,
    /// An attempt is in flight.
    Connecting,
    /// The channel is open.
    Connected,
    /// Waiting out a backoff delay before the next attempt.
    Reconnecting,
    /// Explicitly disconnected by the client.
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting => write!(f, "reconnecting"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Fixed backoff schedule with an attempt cap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub delays: Vec<Duration>,
}

impl ReconnectPolicy {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            max_attempts: config.max_reconnect_attempts,
            delays: config
                .reconnect_delays_ms
                .iter()
                .map(|&ms| Duration::from_millis(ms))
                .collect(),
        }
    }

    /// Delay before retry number `attempt` (0-based), clamped at the last entry.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let idx = (attempt as usize).min(self.delays.len().saturating_sub(1));
        self.delays.get(idx).copied().unwrap_or_default()
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_config(&SessionConfig::default())
    }
}

/// The session value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub user_id: Option<String>,
    pub state: ConnectionState,
    /// Id of the newest connection attempt.
    pub attempt_id: u64,
    /// Retries scheduled since the last successful open.
    pub reconnect_attempt: u32,
    pub last_error: Option<ErrorInfo>,
}

/// Inputs to [`transition`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionInput {
    /// Manual connect request.
    Connect { user_id: String },
    /// The channel for `attempt_id` opened.
    Opened { attempt_id: u64 },
    /// The attempt failed before opening (refused, timed out).
    OpenFailed { attempt_id: u64, reason: String },
    /// An open channel closed.
    Closed {
        attempt_id: u64,
        code: Option<u16>,
        reason: String,
    },
    /// A backoff delay elapsed.
    RetryDue { attempt_id: u64 },
    /// Manual disconnect.
    Disconnect,
}

/// Work the driver performs after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Start connection attempt `attempt_id`, abandoning any previous one.
    Open { attempt_id: u64, user_id: String },
    /// Wake with [`SessionInput::RetryDue`] after `delay`.
    ScheduleRetry {
        attempt_id: u64,
        attempt: u32,
        delay: Duration,
    },
    /// Close any open channel with [`NORMAL_CLOSE`] and cancel pending timers.
    Shutdown,
    /// Surface an error to subscribers.
    Report(ErrorInfo),
}

/// Advance `session` by one input.
pub fn transition(
    session: &Session,
    input: SessionInput,
    policy: &ReconnectPolicy,
) -> (Session, Vec<Effect>) {
    let mut next = session.clone();
    let mut effects = Vec::new();

    match input {
        SessionInput::Connect { user_id } => match session.state {
            // A pending retry is an attempt in flight; it keeps its backoff.
            ConnectionState::Connecting
            | ConnectionState::Connected
            | ConnectionState::Reconnecting => {}
            ConnectionState::Disconnected | ConnectionState::Closed => {
                next.reconnect_attempt = 0;
                next.last_error = None;
                next.user_id = Some(user_id.clone());
                next.attempt_id += 1;
                next.state = ConnectionState::Connecting;
                effects.push(Effect::Open {
                    attempt_id: next.attempt_id,
                    user_id,
                });
            }
        },

        SessionInput::Opened { attempt_id } => {
            if attempt_id == session.attempt_id && session.state == ConnectionState::Connecting {
                next.state = ConnectionState::Connected;
                next.reconnect_attempt = 0;
                next.last_error = None;
            }
        }

        SessionInput::OpenFailed { attempt_id, reason } => {
            if attempt_id == session.attempt_id && session.state == ConnectionState::Connecting {
                schedule_reconnect(&mut next, &mut effects, reason, policy);
            }
        }

        SessionInput::Closed {
            attempt_id,
            code,
            reason,
        } => {
            let live = matches!(
                session.state,
                ConnectionState::Connecting | ConnectionState::Connected
            );
            if attempt_id == session.attempt_id && live {
                if code == Some(NORMAL_CLOSE) {
                    next.state = ConnectionState::Disconnected;
                } else {
                    let reason = match code {
                        Some(code) => format!("connection closed abnormally ({code}): {reason}"),
                        None => format!("connection lost: {reason}"),
                    };
                    schedule_reconnect(&mut next, &mut effects, reason, policy);
                }
            }
        }

        SessionInput::RetryDue { attempt_id } => {
            if attempt_id == session.attempt_id
                && session.state == ConnectionState::Reconnecting
                && let Some(user_id) = session.user_id.clone()
            {
                next.attempt_id += 1;
                next.state = ConnectionState::Connecting;
                effects.push(Effect::Open {
                    attempt_id: next.attempt_id,
                    user_id,
                });
            }
        }

        SessionInput::Disconnect => {
            next.attempt_id += 1;
            next.state = ConnectionState::Closed;
            next.reconnect_attempt = 0;
            effects.push(Effect::Shutdown);
        }
    }

    (next, effects)
}

fn schedule_reconnect(
    next: &mut Session,
    effects: &mut Vec<Effect>,
    reason: String,
    policy: &ReconnectPolicy,
) {
    let error = ErrorInfo::transport(reason);
    effects.push(Effect::Report(error.clone()));
    next.last_error = Some(error);

    if next.reconnect_attempt >= policy.max_attempts {
        next.state = ConnectionState::Disconnected;
        effects.push(Effect::Report(ErrorInfo::transport(format!(
            "could not connect after {} attempts",
            policy.max_attempts
        ))));
        return;
    }

    let delay = policy.delay_for(next.reconnect_attempt);
    next.reconnect_attempt += 1;
    next.state = ConnectionState::Reconnecting;
    effects.push(Effect::ScheduleRetry {
        attempt_id: next.attempt_id,
        attempt: next.reconnect_attempt,
        delay,
    });
}
