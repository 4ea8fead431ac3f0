//! Session events and the handler registry behind `on`/`off`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::cli::StreamMessage;

/// Kinds of events a session emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionEventKind {
    Stdout,
    Stderr,
    Exit,
    Error,
    Message,
    BufferOverflow,
}

/// Event emitted by a running session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Text fragment extracted from one stdout line.
    Stdout(String),
    /// Raw stderr output.
    Stderr(String),
    /// The process exited.
    Exit {
        /// Exit code, if the process exited normally.
        code: Option<i32>,
        /// Name of the terminating signal, if any.
        signal: Option<String>,
    },
    /// A spawn or runtime error.
    Error(Arc<std::io::Error>),
    /// A decoded stream-json message, emitted before its `Stdout` fragment.
    Message(StreamMessage),
    /// A partial stdout line exceeded the buffer cap and was dropped.
    BufferOverflow {
        /// Number of bytes discarded.
        discarded_bytes: usize,
    },
}

impl SessionEvent {
    /// The kind used to route this event to handlers.
    #[must_use]
    pub fn kind(&self) -> SessionEventKind {
        match self {
            Self::Stdout(_) => SessionEventKind::Stdout,
            Self::Stderr(_) => SessionEventKind::Stderr,
            Self::Exit { .. } => SessionEventKind::Exit,
            Self::Error(_) => SessionEventKind::Error,
            Self::Message(_) => SessionEventKind::Message,
            Self::BufferOverflow { .. } => SessionEventKind::BufferOverflow,
        }
    }
}

/// Identifier returned by [`EventHandlers::on`], used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Shared event handler.
pub type EventHandler = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

/// Per-kind lists of registered handlers.
#[derive(Default)]
pub struct EventHandlers {
    next_id: AtomicU64,
    slots: Mutex<HashMap<SessionEventKind, Vec<(HandlerId, EventHandler)>>>,
}

impl std::fmt::Debug for EventHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let counts: HashMap<_, _> = slots.iter().map(|(k, v)| (*k, v.len())).collect();
        f.debug_struct("EventHandlers")
            .field("handlers", &counts)
            .finish()
    }
}

impl EventHandlers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one event kind.
    pub fn on<F>(&self, kind: SessionEventKind, handler: F) -> HandlerId
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Unregister a handler. Returns false if it was not registered.
    pub fn off(&self, kind: SessionEventKind, id: HandlerId) -> bool {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(handlers) = slots.get_mut(&kind) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(handler_id, _)| *handler_id != id);
        handlers.len() != before
    }

    /// Number of handlers registered for a kind.
    #[must_use]
    pub fn count(&self, kind: SessionEventKind) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .map_or(0, Vec::len)
    }

    /// Dispatch an event to a snapshot of the handlers for its kind.
    ///
    /// The registry lock is released before any handler runs.
    pub fn emit(&self, event: &SessionEvent) {
        let snapshot: Vec<EventHandler> = self
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event.kind())
            .map(|handlers| handlers.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();

        for handler in snapshot {
            handler(event);
        }
    }
}
