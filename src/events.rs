//! Events delivered to the UI layer.
//!
//! Two delivery paths share one [`EventBus`]: synchronous handlers
//! registered with [`EventBus::on`], called in emission order on the
//! emitting task, and a broadcast channel for async consumers via
//! [`EventBus::subscribe`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde::Serialize;
use tokio::sync::broadcast;

use crate::error::ErrorInfo;
use crate::protocol::messages::{ConversationTurn, LipSyncPayload, VoiceResponse};
use crate::protocol::session::ConnectionState;

/// Broadcast capacity; slow async subscribers lag past this.
const BROADCAST_CAPACITY: usize = 256;

/// Playback lifecycle transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackPhase {
    Started,
    Finished,
    Stopped,
}

/// Everything the engine reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    Connection {
        state: ConnectionState,
        reconnect_attempt: u32,
    },
    VoiceResponse(VoiceResponse),
    ProcessingStatus {
        status: String,
    },
    History {
        history: Vec<ConversationTurn>,
    },
    HistoryCleared,
    LipSync(LipSyncPayload),
    Playback {
        phase: PlaybackPhase,
    },
    Error(ErrorInfo),
}

impl EngineEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Connection { .. } => EventKind::Connection,
            Self::VoiceResponse(_) => EventKind::VoiceResponse,
            Self::ProcessingStatus { .. } => EventKind::ProcessingStatus,
            Self::History { .. } => EventKind::History,
            Self::HistoryCleared => EventKind::HistoryCleared,
            Self::LipSync(_) => EventKind::LipSync,
            Self::Playback { .. } => EventKind::Playback,
            Self::Error(_) => EventKind::Error,
        }
    }
}

/// Event categories for handler registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connection,
    VoiceResponse,
    ProcessingStatus,
    History,
    HistoryCleared,
    LipSync,
    Playback,
    Error,
}

/// Handle returned by [`EventBus::on`], used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&EngineEvent) + Send + Sync>;

struct Registration {
    id: SubscriptionId,
    kind: Option<EventKind>,
    handler: Handler,
}

/// Fan-out point for [`EngineEvent`]s. Cheap to clone.
#[derive(Clone)]
pub struct EventBus {
    handlers: Arc<Mutex<Vec<Registration>>>,
    next_id: Arc<AtomicU64>,
    tx: broadcast::Sender<EngineEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            handlers: Arc::new(Mutex::new(Vec::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            tx,
        }
    }

    /// Register `handler` for events of `kind`.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&EngineEvent) + Send + Sync + 'static,
    {
        self.register(Some(kind), Arc::new(handler))
    }

    /// Register `handler` for every event.
    pub fn on_any<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&EngineEvent) + Send + Sync + 'static,
    {
        self.register(None, Arc::new(handler))
    }

    /// Unregister a handler. Returns `false` if it was not registered.
    pub fn off(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.lock();
        let before = handlers.len();
        handlers.retain(|r| r.id != id);
        handlers.len() != before
    }

    /// A handle that does not keep the handler registry alive, for
    /// handlers that emit on the bus they are registered with.
    pub fn downgrade(&self) -> WeakEventBus {
        WeakEventBus {
            handlers: Arc::downgrade(&self.handlers),
            next_id: Arc::clone(&self.next_id),
            tx: self.tx.clone(),
        }
    }

    /// Receive all events asynchronously.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Deliver `event` to matching handlers, then to async subscribers.
    ///
    /// Handlers run outside the registry lock, so they may register,
    /// unregister, or emit.
    pub fn emit(&self, event: EngineEvent) {
        let kind = event.kind();
        let matching: Vec<Handler> = self
            .lock()
            .iter()
            .filter(|r| r.kind.is_none_or(|k| k == kind))
            .map(|r| Arc::clone(&r.handler))
            .collect();

        for handler in matching {
            handler(&event);
        }
        // No receivers is not an error.
        let _ = self.tx.send(event);
    }

    fn register(&self, kind: Option<EventKind>, handler: Handler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push(Registration { id, kind, handler });
        id
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Registration>> {
        match self.handlers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Non-owning counterpart of [`EventBus`].
#[derive(Clone)]
pub struct WeakEventBus {
    handlers: Weak<Mutex<Vec<Registration>>>,
    next_id: Arc<AtomicU64>,
    tx: broadcast::Sender<EngineEvent>,
}

impl WeakEventBus {
    pub fn upgrade(&self) -> Option<EventBus> {
        self.handlers.upgrade().map(|handlers| EventBus {
            handlers,
            next_id: Arc::clone(&self.next_id),
            tx: self.tx.clone(),
        })
    }

    /// Emit if the bus still exists.
    pub fn emit(&self, event: EngineEvent) {
        if let Some(bus) = self.upgrade() {
            bus.emit(event);
        }
    }
}
