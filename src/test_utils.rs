//! Scripted stand-ins for the network and audio devices, shared by the
//! session, pipeline, coordinator and engine tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;
use url::Url;

use crate::audio::capture::AudioSource;
use crate::audio::codec::AudioClip;
use crate::audio::playback::AudioSink;
use crate::error::{EngineError, Result};
use crate::protocol::manager::MessageSink;
use crate::protocol::messages::OutboundMessage;
use crate::protocol::transport::{Connector, Frame, Link};

/// What the next `open` call does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    Accept,
    Refuse,
    /// Never resolves.
    Hang,
}

/// Server side of an accepted mock channel.
pub struct ServerHandle {
    to_client: mpsc::UnboundedSender<Frame>,
    from_client: mpsc::UnboundedReceiver<Frame>,
}

impl ServerHandle {
    pub fn send_json(&self, json: &str) {
        self.to_client
            .send(Frame::Text(json.to_owned()))
            .expect("client stream dropped");
    }

    pub fn close(&self, code: u16) {
        let _ = self.to_client.send(Frame::Close {
            code: Some(code),
            reason: String::new(),
        });
    }

    /// Frames the client has written so far.
    pub fn received(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.from_client.try_recv() {
            frames.push(frame);
        }
        frames
    }

    /// Text frames decoded as JSON.
    pub fn received_json(&mut self) -> Vec<serde_json::Value> {
        self.received()
            .into_iter()
            .filter_map(|f| match f {
                Frame::Text(text) => serde_json::from_str(&text).ok(),
                Frame::Close { .. } => None,
            })
            .collect()
    }
}

/// Connector that follows a script and records when it was asked to open.
pub struct MockConnector {
    script: Mutex<VecDeque<Script>>,
    fallback: Script,
    opens: Mutex<Vec<(Instant, Url)>>,
    servers: Mutex<VecDeque<ServerHandle>>,
}

impl MockConnector {
    pub fn new(script: impl IntoIterator<Item = Script>, fallback: Script) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback,
            opens: Mutex::new(Vec::new()),
            servers: Mutex::new(VecDeque::new()),
        })
    }

    pub fn accepting() -> Arc<Self> {
        Self::new([], Script::Accept)
    }

    pub fn open_count(&self) -> usize {
        self.opens.lock().unwrap().len()
    }

    pub fn open_times(&self) -> Vec<Instant> {
        self.opens.lock().unwrap().iter().map(|(t, _)| *t).collect()
    }

    pub fn last_url(&self) -> Option<Url> {
        self.opens.lock().unwrap().last().map(|(_, u)| u.clone())
    }

    /// Server end of the oldest accepted channel not yet taken.
    pub fn take_server(&self) -> ServerHandle {
        self.servers
            .lock()
            .unwrap()
            .pop_front()
            .expect("no accepted channel")
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(&self, url: &Url) -> Result<Link> {
        self.opens
            .lock()
            .unwrap()
            .push((Instant::now(), url.clone()));
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.fallback);

        match step {
            Script::Refuse => Err(EngineError::Transport("connection refused".into())),
            Script::Hang => std::future::pending().await,
            Script::Accept => {
                let (to_client, client_rx) = mpsc::unbounded_channel::<Frame>();
                let (client_tx, from_client) = mpsc::unbounded_channel::<Frame>();

                let sink = futures_util::sink::unfold(
                    client_tx,
                    |tx: mpsc::UnboundedSender<Frame>, frame: Frame| async move {
                        tx.send(frame)
                            .map_err(|_| EngineError::Transport("server gone".into()))?;
                        Ok::<_, EngineError>(tx)
                    },
                );
                let stream = futures_util::stream::unfold(client_rx, |mut rx| async move {
                    rx.recv()
                        .await
                        .map(|frame| (Ok::<_, EngineError>(frame), rx))
                });

                self.servers.lock().unwrap().push_back(ServerHandle {
                    to_client,
                    from_client,
                });
                Ok(Link {
                    sink: Box::pin(sink),
                    stream: Box::pin(stream),
                })
            }
        }
    }
}

#[derive(Default)]
struct SourceState {
    tx: Option<mpsc::UnboundedSender<Vec<f32>>>,
    opens: usize,
    closes: usize,
    failure: Option<String>,
}

/// Microphone fed by the test.
#[derive(Clone)]
pub struct MockSource {
    state: Arc<Mutex<SourceState>>,
    sample_rate: u32,
}

impl MockSource {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(SourceState::default())),
            sample_rate,
        }
    }

    /// A source whose `open` always fails with a device error.
    pub fn failing(message: &str) -> Self {
        let source = Self::new(16_000);
        source.state.lock().unwrap().failure = Some(message.to_owned());
        source
    }

    /// Deliver samples as if from the device. Returns `false` when closed.
    pub fn push(&self, samples: &[f32]) -> bool {
        match &self.state.lock().unwrap().tx {
            Some(tx) => tx.send(samples.to_vec()).is_ok(),
            None => false,
        }
    }

    /// Drop the sender as a lost device would, without a `close` call.
    pub fn hang_up(&self) {
        self.state.lock().unwrap().tx = None;
    }

    pub fn opens(&self) -> usize {
        self.state.lock().unwrap().opens
    }

    pub fn closes(&self) -> usize {
        self.state.lock().unwrap().closes
    }
}

impl AudioSource for MockSource {
    fn open(&mut self, tx: mpsc::UnboundedSender<Vec<f32>>) -> Result<u32> {
        let mut state = self.state.lock().unwrap();
        if let Some(message) = &state.failure {
            return Err(EngineError::Device(message.clone()));
        }
        state.tx = Some(tx);
        state.opens += 1;
        Ok(self.sample_rate)
    }

    fn close(&mut self) {
        let mut state = self.state.lock().unwrap();
        if state.tx.take().is_some() {
            state.closes += 1;
        }
    }

    fn is_open(&self) -> bool {
        self.state.lock().unwrap().tx.is_some()
    }
}

#[derive(Default)]
struct SinkState {
    clips: Vec<AudioClip>,
    playing: bool,
    stops: usize,
    fail: bool,
}

/// Speaker that records what it was asked to play.
#[derive(Clone, Default)]
pub struct RecordingSink {
    state: Arc<Mutex<SinkState>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose `start` always fails.
    pub fn failing() -> Self {
        let sink = Self::default();
        sink.state.lock().unwrap().fail = true;
        sink
    }

    /// Simulate the device draining the current clip.
    pub fn finish(&self) {
        self.state.lock().unwrap().playing = false;
    }

    pub fn clips(&self) -> Vec<AudioClip> {
        self.state.lock().unwrap().clips.clone()
    }

    pub fn is_playing(&self) -> bool {
        self.state.lock().unwrap().playing
    }

    pub fn stops(&self) -> usize {
        self.state.lock().unwrap().stops
    }
}

impl AudioSink for RecordingSink {
    fn start(&mut self, clip: &AudioClip) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail {
            return Err(EngineError::Playback("no output device".into()));
        }
        state.clips.push(clip.clone());
        state.playing = true;
        Ok(())
    }

    fn is_finished(&self) -> bool {
        !self.state.lock().unwrap().playing
    }

    fn stop(&mut self) {
        let mut state = self.state.lock().unwrap();
        if state.playing {
            state.stops += 1;
        }
        state.playing = false;
    }
}

/// Outlet that records messages instead of sending them.
#[derive(Clone, Default)]
pub struct MessageLog {
    messages: Arc<Mutex<Vec<OutboundMessage>>>,
}

impl MessageLog {
    pub fn messages(&self) -> Vec<OutboundMessage> {
        self.messages.lock().unwrap().clone()
    }
}

impl MessageSink for MessageLog {
    fn send(&self, message: OutboundMessage) -> bool {
        self.messages.lock().unwrap().push(message);
        true
    }
}
