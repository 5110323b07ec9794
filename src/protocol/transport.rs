//! Duplex text channel underneath the session.
//!
//! [`Connector`] is the seam between the session manager and the network:
//! production uses [`WsConnector`], tests script their own.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use url::Url;

use crate::error::{EngineError, Result};

/// One unit on the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Close { code: Option<u16>, reason: String },
}

pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = EngineError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame>> + Send>>;

/// An open channel, split into its write and read halves.
pub struct Link {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

/// Opens channels to the voice service.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a channel to `url`. Resolves once the channel is usable.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Transport`] if the remote cannot be reached or
    /// refuses the handshake.
    async fn open(&self, url: &Url) -> Result<Link>;
}

/// WebSocket connector backed by tokio-tungstenite.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self, url: &Url) -> Result<Link> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| EngineError::Transport(format!("connect: {e}")))?;

        let (write, read) = ws_stream.split();

        let sink = write
            .sink_map_err(|e| EngineError::Transport(format!("send error: {e}")))
            .with(|frame: Frame| std::future::ready(Ok::<_, EngineError>(to_message(frame))));

        let stream = read.filter_map(|msg| {
            std::future::ready(match msg {
                Ok(Message::Text(text)) => Some(Ok(Frame::Text(text))),
                Ok(Message::Close(frame)) => Some(Ok(match frame {
                    Some(f) => Frame::Close {
                        code: Some(u16::from(f.code)),
                        reason: f.reason.into_owned(),
                    },
                    None => Frame::Close {
                        code: None,
                        reason: String::new(),
                    },
                })),
                // Binary and control frames are handled by tungstenite.
                Ok(_) => None,
                Err(e) => Some(Err(EngineError::Transport(format!("read error: {e}")))),
            })
        });

        Ok(Link {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}

fn to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text),
        Frame::Close { code, reason } => Message::Close(code.map(|code| CloseFrame {
            code: CloseCode::from(code),
            reason: reason.into(),
        })),
    }
}
