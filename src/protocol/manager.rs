//! Session driver: owns the channel, timers and keep-alive, and feeds
//! their outcomes through [`transition`].
//!
//! Every attempt and every backoff timer runs as a tokio task under its own
//! [`CancellationToken`]. Only the newest token is kept; starting a new
//! attempt or disconnecting cancels the previous one, and the session's
//! `attempt_id` check discards anything a cancelled task still reports.

use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::messages::{InboundMessage, OutboundMessage, decode_inbound};
use super::session::{
    ConnectionState, Effect, NORMAL_CLOSE, ReconnectPolicy, Session, SessionInput, transition,
};
use super::transport::{Connector, Frame, FrameSink, Link};
use crate::config::SessionConfig;
use crate::error::{ErrorInfo, ErrorKind};
use crate::events::{EngineEvent, EventBus};

/// Anything outbound messages can be handed to.
pub trait MessageSink: Send + Sync {
    /// Queue `message` for delivery. Returns `false` if it was not accepted.
    fn send(&self, message: OutboundMessage) -> bool;
}

/// Handle to the duplex session. Cheap to clone.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

struct Inner {
    config: SessionConfig,
    policy: ReconnectPolicy,
    connector: Arc<dyn Connector>,
    events: EventBus,
    shared: Mutex<Shared>,
}

#[derive(Default)]
struct Shared {
    session: Session,
    outbound: Option<mpsc::UnboundedSender<OutboundMessage>>,
    cancel: Option<CancellationToken>,
}

/// How an open channel ended, when it was not cancelled locally.
struct ChannelEnd {
    code: Option<u16>,
    reason: String,
}

impl SessionManager {
    pub fn new(config: SessionConfig, connector: Arc<dyn Connector>, events: EventBus) -> Self {
        let policy = ReconnectPolicy::from_config(&config);
        Self {
            inner: Arc::new(Inner {
                config,
                policy,
                connector,
                events,
                shared: Mutex::new(Shared::default()),
            }),
        }
    }

    /// Open the session for `user_id`.
    ///
    /// A no-op while connecting or connected. Returns `false` only when no
    /// channel URL can be built for the user. Must be called within a tokio
    /// runtime.
    pub fn connect(&self, user_id: &str) -> bool {
        if let Err(e) = self.inner.config.url_for(user_id) {
            warn!("cannot connect: {e}");
            self.inner.events.emit(EngineEvent::Error(ErrorInfo::from(&e)));
            return false;
        }
        self.apply(SessionInput::Connect {
            user_id: user_id.to_owned(),
        });
        true
    }

    /// Close the channel with a normal close code and stop reconnecting.
    pub fn disconnect(&self) {
        self.apply(SessionInput::Disconnect);
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().session.state
    }

    /// Snapshot of the session value.
    pub fn session(&self) -> Session {
        self.lock().session.clone()
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        match self.inner.shared.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Run one input through the reducer and carry out its effects.
    ///
    /// Token bookkeeping and task spawns happen under the lock so effects
    /// from concurrent inputs cannot interleave.
    fn apply(&self, input: SessionInput) {
        let (changed, reports) = {
            let mut shared = self.lock();
            let (next, effects) = transition(&shared.session, input, &self.inner.policy);
            let changed = (next.state != shared.session.state
                || next.reconnect_attempt != shared.session.reconnect_attempt)
                .then_some((next.state, next.reconnect_attempt));
            shared.session = next;

            let mut reports = Vec::new();
            for effect in effects {
                match effect {
                    Effect::Open {
                        attempt_id,
                        user_id,
                    } => {
                        shared.outbound = None;
                        let token = replace_token(&mut shared);
                        let this = self.clone();
                        tokio::spawn(async move {
                            this.run_attempt(attempt_id, user_id, token).await;
                        });
                    }
                    Effect::ScheduleRetry {
                        attempt_id,
                        attempt,
                        delay,
                    } => {
                        info!(
                            "reconnecting in {}s (attempt {attempt}/{})",
                            delay.as_secs_f32(),
                            self.inner.policy.max_attempts
                        );
                        let token = replace_token(&mut shared);
                        let this = self.clone();
                        tokio::spawn(async move {
                            tokio::select! {
                                _ = token.cancelled() => {}
                                _ = tokio::time::sleep(delay) => {
                                    this.apply(SessionInput::RetryDue { attempt_id });
                                }
                            }
                        });
                    }
                    Effect::Shutdown => {
                        shared.outbound = None;
                        if let Some(token) = shared.cancel.take() {
                            token.cancel();
                        }
                    }
                    Effect::Report(info) => reports.push(info),
                }
            }
            (changed, reports)
        };

        for info in reports {
            warn!("{}", info.message);
            self.inner.events.emit(EngineEvent::Error(info));
        }
        if let Some((state, reconnect_attempt)) = changed {
            debug!("session state -> {state}");
            self.inner.events.emit(EngineEvent::Connection {
                state,
                reconnect_attempt,
            });
        }
    }

    async fn run_attempt(self, attempt_id: u64, user_id: String, cancel: CancellationToken) {
        let url = match self.inner.config.url_for(&user_id) {
            Ok(url) => url,
            Err(e) => {
                self.apply(SessionInput::OpenFailed {
                    attempt_id,
                    reason: e.to_string(),
                });
                return;
            }
        };
        debug!("opening {url} (attempt id {attempt_id})");

        let timeout = self.inner.config.connect_timeout();
        let opened = tokio::select! {
            _ = cancel.cancelled() => return,
            res = tokio::time::timeout(timeout, self.inner.connector.open(&url)) => res,
        };
        let link = match opened {
            Ok(Ok(link)) => link,
            Ok(Err(e)) => {
                self.apply(SessionInput::OpenFailed {
                    attempt_id,
                    reason: e.to_string(),
                });
                return;
            }
            Err(_) => {
                self.apply(SessionInput::OpenFailed {
                    attempt_id,
                    reason: format!("connect timed out after {}ms", timeout.as_millis()),
                });
                return;
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut shared = self.lock();
            if shared.session.attempt_id != attempt_id {
                return;
            }
            shared.outbound = Some(tx);
        }
        self.apply(SessionInput::Opened { attempt_id });
        info!("voice session connected");

        if let Some(end) = self.pump(link, rx, &cancel).await {
            self.apply(SessionInput::Closed {
                attempt_id,
                code: end.code,
                reason: end.reason,
            });
        }
    }

    /// Move frames until the channel ends or the attempt is cancelled.
    async fn pump(
        &self,
        link: Link,
        mut outbound: mpsc::UnboundedReceiver<OutboundMessage>,
        cancel: &CancellationToken,
    ) -> Option<ChannelEnd> {
        let Link {
            mut sink,
            mut stream,
        } = link;

        let mut keepalive = tokio::time::interval(self.inner.config.keepalive_interval());
        // Skip the first immediate tick.
        keepalive.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    // Messages queued before the close still go out first.
                    while let Ok(message) = outbound.try_recv() {
                        if write(&mut sink, &message).await.is_err() {
                            break;
                        }
                    }
                    let _ = sink
                        .send(Frame::Close {
                            code: Some(NORMAL_CLOSE),
                            reason: String::new(),
                        })
                        .await;
                    let _ = sink.close().await;
                    return None;
                }
                frame = stream.next() => match frame {
                    Some(Ok(Frame::Text(text))) => self.dispatch(&text),
                    Some(Ok(Frame::Close { code, reason })) => {
                        return Some(ChannelEnd { code, reason });
                    }
                    Some(Err(e)) => {
                        return Some(ChannelEnd { code: None, reason: e.to_string() });
                    }
                    None => {
                        return Some(ChannelEnd { code: None, reason: "stream ended".into() });
                    }
                },
                Some(message) = outbound.recv() => {
                    if let Err(end) = write(&mut sink, &message).await {
                        return Some(end);
                    }
                }
                _ = keepalive.tick() => {
                    if let Err(end) = write(&mut sink, &OutboundMessage::Ping).await {
                        return Some(end);
                    }
                }
            }
        }
    }

    /// Route one inbound frame to subscribers.
    fn dispatch(&self, text: &str) {
        let message = match decode_inbound(text) {
            Ok(Some(message)) => message,
            Ok(None) => return,
            Err(e) => {
                warn!("dropping inbound frame: {e}");
                return;
            }
        };

        let event = match message {
            InboundMessage::VoiceResponse(response) => EngineEvent::VoiceResponse(response),
            InboundMessage::ProcessingStatus { status } => {
                EngineEvent::ProcessingStatus { status }
            }
            InboundMessage::Error { message } => {
                EngineEvent::Error(ErrorInfo::new(ErrorKind::Server, message))
            }
            InboundMessage::ConversationHistory { history } => EngineEvent::History { history },
            InboundMessage::HistoryCleared {} => EngineEvent::HistoryCleared,
            InboundMessage::Visemes(payload) => EngineEvent::LipSync(payload),
            InboundMessage::Pong {} => {
                trace!("pong");
                return;
            }
            InboundMessage::Unknown => return,
        };
        self.inner.events.emit(event);
    }
}

impl MessageSink for SessionManager {
    /// Queue `message` on the open channel.
    ///
    /// Returns `false` and reports a transport error when not connected.
    fn send(&self, message: OutboundMessage) -> bool {
        let kind = message.kind();
        let sent = {
            let shared = self.lock();
            match (&shared.outbound, shared.session.state) {
                (Some(tx), ConnectionState::Connected) => tx.send(message).is_ok(),
                _ => false,
            }
        };

        if sent {
            trace!("queued {kind}");
        } else {
            warn!("cannot send {kind}: channel not open");
            self.inner.events.emit(EngineEvent::Error(ErrorInfo::transport(format!(
                "cannot send {kind}: channel not open"
            ))));
        }
        sent
    }
}

fn replace_token(shared: &mut Shared) -> CancellationToken {
    if let Some(old) = shared.cancel.take() {
        old.cancel();
    }
    let token = CancellationToken::new();
    shared.cancel = Some(token.clone());
    token
}

async fn write(
    sink: &mut FrameSink,
    message: &OutboundMessage,
) -> std::result::Result<(), ChannelEnd> {
    let json = match message.to_json() {
        Ok(json) => json,
        Err(e) => {
            warn!("skipping {}: {e}", message.kind());
            return Ok(());
        }
    };
    sink.send(Frame::Text(json)).await.map_err(|e| ChannelEnd {
        code: None,
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::events::EventKind;
    use crate::test_utils::{MockConnector, Script};

    /// Long enough for spawned tasks to settle on the paused clock.
    const SETTLE: Duration = Duration::from_millis(5);

    fn manager(connector: Arc<MockConnector>) -> (SessionManager, Arc<Mutex<Vec<EngineEvent>>>) {
        let events = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        events.on_any(move |e| sink.lock().unwrap().push(e.clone()));
        (
            SessionManager::new(SessionConfig::default(), connector, events),
            seen,
        )
    }

    async fn settle() {
        tokio::time::sleep(SETTLE).await;
    }

    fn states(seen: &Mutex<Vec<EngineEvent>>) -> Vec<ConnectionState> {
        seen.lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                EngineEvent::Connection { state, .. } => Some(*state),
                _ => None,
            })
            .collect()
    }

    fn errors(seen: &Mutex<Vec<EngineEvent>>) -> Vec<ErrorInfo> {
        seen.lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                EngineEvent::Error(info) => Some(info.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn connect_reaches_connected() {
        let connector = MockConnector::accepting();
        let (mgr, seen) = manager(Arc::clone(&connector));

        assert!(mgr.connect("user-42"));
        settle().await;

        assert_eq!(mgr.state(), ConnectionState::Connected);
        assert_eq!(
            states(&seen),
            vec![ConnectionState::Connecting, ConnectionState::Connected]
        );
        let url = connector.last_url().unwrap();
        assert!(url.as_str().ends_with("/ws/v2v/user-42"));
    }

    #[tokio::test(start_paused = true)]
    async fn connect_is_idempotent() {
        let connector = MockConnector::new([], Script::Hang);
        let (mgr, _) = manager(Arc::clone(&connector));

        mgr.connect("u");
        settle().await;
        mgr.connect("u");
        settle().await;
        assert_eq!(connector.open_count(), 1);
        assert_eq!(mgr.state(), ConnectionState::Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_connect_yields_one_session() {
        let connector = MockConnector::accepting();
        let (mgr, seen) = manager(Arc::clone(&connector));

        assert!(mgr.connect("u"));
        mgr.connect("u");
        settle().await;
        mgr.connect("u");
        settle().await;

        assert_eq!(connector.open_count(), 1);
        assert_eq!(mgr.state(), ConnectionState::Connected);
        let connected = states(&seen)
            .into_iter()
            .filter(|s| *s == ConnectionState::Connected)
            .count();
        assert_eq!(connected, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn send_while_closed_reports_transport_error() {
        let (mgr, seen) = manager(MockConnector::accepting());
        assert!(!mgr.send(OutboundMessage::GetHistory));
        let errors = errors(&seen);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, ErrorKind::Transport);
    }

    #[tokio::test(start_paused = true)]
    async fn sends_arrive_in_order() {
        let connector = MockConnector::accepting();
        let (mgr, _) = manager(Arc::clone(&connector));
        mgr.connect("u");
        settle().await;

        assert!(mgr.send(OutboundMessage::GetHistory));
        assert!(mgr.send(OutboundMessage::TextInput {
            text: "hello".into(),
            locale: None,
            context: None,
        }));
        settle().await;

        let mut server = connector.take_server();
        let types: Vec<String> = server
            .received_json()
            .iter()
            .map(|v| v["type"].as_str().unwrap_or_default().to_owned())
            .collect();
        assert_eq!(types, vec!["get_history", "text_input"]);
    }

    #[tokio::test(start_paused = true)]
    async fn inbound_messages_dispatch_in_order() {
        let connector = MockConnector::accepting();
        let (mgr, seen) = manager(Arc::clone(&connector));
        mgr.connect("u");
        settle().await;

        let server = connector.take_server();
        server.send_json(r#"{"type":"processing_status","status":"processing"}"#);
        server.send_json(r#"{"type":"brand_new_thing"}"#);
        server.send_json(r#"{"type":"pong"}"#);
        server.send_json("{broken");
        server.send_json(r#"{"type":"voice_response","ai_response":"hi"}"#);
        server.send_json(r#"{"type":"error","message":"rate limited"}"#);
        settle().await;

        let kinds: Vec<EventKind> = seen
            .lock()
            .unwrap()
            .iter()
            .map(EngineEvent::kind)
            .filter(|k| *k != EventKind::Connection)
            .collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::ProcessingStatus,
                EventKind::VoiceResponse,
                EventKind::Error
            ]
        );
        assert_eq!(errors(&seen)[0].kind, ErrorKind::Server);
        assert_eq!(mgr.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn keepalive_pings_on_interval() {
        let connector = MockConnector::accepting();
        let (mgr, _) = manager(Arc::clone(&connector));
        mgr.connect("u");
        settle().await;
        let mut server = connector.take_server();

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(server.received_json().is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        let frames = server.received_json();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["type"], "ping");
    }

    #[tokio::test(start_paused = true)]
    async fn refused_connects_follow_backoff_then_give_up() {
        let connector = MockConnector::new([], Script::Refuse);
        let (mgr, seen) = manager(Arc::clone(&connector));
        let start = tokio::time::Instant::now();

        mgr.connect("u");
        tokio::time::sleep(Duration::from_secs(120)).await;

        let offsets: Vec<u64> = connector
            .open_times()
            .iter()
            .map(|t| (*t - start).as_secs())
            .collect();
        assert_eq!(offsets, vec![0, 2, 7, 17, 37, 67]);

        let session = mgr.session();
        assert_eq!(session.state, ConnectionState::Disconnected);
        assert!(session.last_error.is_some());
        assert!(
            errors(&seen)
                .iter()
                .any(|e| e.message.contains("could not connect"))
        );

        // Terminal: nothing more happens on its own.
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(connector.open_count(), 6);

        // A manual connect starts over.
        mgr.connect("u");
        settle().await;
        assert_eq!(connector.open_count(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn abnormal_close_reconnects() {
        let connector = MockConnector::accepting();
        let (mgr, _) = manager(Arc::clone(&connector));
        mgr.connect("u");
        settle().await;

        connector.take_server().close(1011);
        settle().await;
        assert_eq!(mgr.state(), ConnectionState::Reconnecting);
        assert_eq!(mgr.session().reconnect_attempt, 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        settle().await;
        assert_eq!(connector.open_count(), 2);
        assert_eq!(mgr.state(), ConnectionState::Connected);
        assert_eq!(mgr.session().reconnect_attempt, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn clean_close_stays_down() {
        let connector = MockConnector::accepting();
        let (mgr, _) = manager(Arc::clone(&connector));
        mgr.connect("u");
        settle().await;

        connector.take_server().close(NORMAL_CLOSE);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(mgr.state(), ConnectionState::Disconnected);
        assert_eq!(connector.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_closes_cleanly_and_suppresses_retry() {
        let connector = MockConnector::accepting();
        let (mgr, _) = manager(Arc::clone(&connector));
        mgr.connect("u");
        settle().await;
        let mut server = connector.take_server();

        mgr.disconnect();
        settle().await;
        assert_eq!(mgr.state(), ConnectionState::Closed);
        assert!(server.received().contains(&Frame::Close {
            code: Some(NORMAL_CLOSE),
            reason: String::new(),
        }));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.open_count(), 1);
        assert!(!mgr.send(OutboundMessage::Ping));
    }

    #[tokio::test(start_paused = true)]
    async fn sends_queued_before_disconnect_precede_close() {
        let connector = MockConnector::accepting();
        let (mgr, _) = manager(Arc::clone(&connector));
        mgr.connect("u");
        settle().await;
        let mut server = connector.take_server();

        assert!(mgr.send(OutboundMessage::GetHistory));
        mgr.disconnect();
        settle().await;

        let frames = server.received();
        assert_eq!(frames.len(), 2);
        assert!(matches!(&frames[0], Frame::Text(text) if text.contains("get_history")));
        assert!(matches!(frames[1], Frame::Close { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_cancels_pending_retry() {
        let connector = MockConnector::new([], Script::Refuse);
        let (mgr, _) = manager(Arc::clone(&connector));
        mgr.connect("u");
        settle().await;
        assert_eq!(mgr.state(), ConnectionState::Reconnecting);

        mgr.disconnect();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.open_count(), 1);
        assert_eq!(mgr.state(), ConnectionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_connect_times_out() {
        let connector = MockConnector::new([Script::Hang], Script::Accept);
        let (mgr, seen) = manager(Arc::clone(&connector));
        mgr.connect("u");

        tokio::time::sleep(Duration::from_millis(9_900)).await;
        assert_eq!(mgr.state(), ConnectionState::Connecting);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(mgr.state(), ConnectionState::Reconnecting);
        assert!(errors(&seen).iter().any(|e| e.message.contains("timed out")));

        tokio::time::sleep(Duration::from_secs(2)).await;
        settle().await;
        assert_eq!(mgr.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_after_disconnect_ignores_old_attempt() {
        let connector = MockConnector::new([Script::Hang], Script::Accept);
        let (mgr, _) = manager(Arc::clone(&connector));
        mgr.connect("u");
        settle().await;
        mgr.disconnect();
        mgr.connect("u");
        settle().await;

        assert_eq!(mgr.state(), ConnectionState::Connected);
        // The hung attempt's timeout must not knock the new session down.
        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(mgr.state(), ConnectionState::Connected);
        assert_eq!(connector.open_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_endpoint_refuses_connect() {
        let events = EventBus::new();
        let config = SessionConfig {
            endpoint: "not a url".into(),
            ..SessionConfig::default()
        };
        let mgr = SessionManager::new(config, MockConnector::accepting(), events);
        assert!(!mgr.connect("u"));
        assert_eq!(mgr.state(), ConnectionState::Disconnected);
    }
}
