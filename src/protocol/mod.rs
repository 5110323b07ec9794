//! Duplex session with the voice service: wire messages, the session state
//! machine, and the driver that runs it over a WebSocket.

pub mod manager;
pub mod messages;
pub mod session;
pub mod transport;

pub use manager::{MessageSink, SessionManager};
pub use messages::{
    ConversationTurn, InboundMessage, LipSyncPayload, OutboundMessage, TurnKind, VoiceResponse,
};
pub use session::{ConnectionState, ReconnectPolicy, Session};
pub use transport::{Connector, Frame, Link, WsConnector};
