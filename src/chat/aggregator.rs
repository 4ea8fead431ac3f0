//! Time-based message aggregation.
//!
//! Stream output arrives as many small fragments. [`MessageAggregator`]
//! buffers them and emits one [`ChatMessage`] per turn, using a period of
//! inactivity as the turn boundary when no explicit boundary arrives.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::chat::{generate_message_id, ChatMessage, Metadata, MessageType, Role};
use crate::cli::MessageContent;

/// Inactivity period after which buffered content is finalized.
pub const DEFAULT_FINALIZE_TIMEOUT: Duration = Duration::from_secs(2);

/// Callback fired with each finalized message.
pub type MessageCallback = Arc<dyn Fn(ChatMessage) + Send + Sync>;

#[derive(Default)]
struct State {
    buffer: String,
    message_id: Option<String>,
    metadata: Metadata,
    message_type: MessageType,
    timer: Option<JoinHandle<()>>,
    /// Bumped whenever the pending timer is superseded.
    generation: u64,
    callback: Option<MessageCallback>,
}

impl State {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.generation = self.generation.wrapping_add(1);
    }

    fn take_message(&mut self, session_id: &str) -> Option<ChatMessage> {
        if self.buffer.is_empty() {
            return None;
        }

        let metadata = std::mem::take(&mut self.metadata);
        let message = ChatMessage {
            id: self.message_id.take().unwrap_or_else(generate_message_id),
            session_id: session_id.to_string(),
            role: Role::Assistant,
            content: std::mem::take(&mut self.buffer),
            message_type: std::mem::take(&mut self.message_type),
            metadata: (!metadata.is_empty()).then_some(metadata),
            timestamp: chrono::Utc::now(),
        };
        Some(message)
    }
}

impl Drop for State {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

struct Inner {
    session_id: String,
    timeout: Duration,
    state: Mutex<State>,
}

/// Coalesces text fragments into finalized chat messages.
///
/// Cloning yields another handle to the same aggregator.
#[derive(Clone)]
pub struct MessageAggregator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for MessageAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageAggregator")
            .field("session_id", &self.inner.session_id)
            .field("timeout", &self.inner.timeout)
            .field("buffer_len", &self.buffer_len())
            .finish_non_exhaustive()
    }
}

impl MessageAggregator {
    /// Create an aggregator with the default 2-second timeout.
    #[must_use]
    pub fn new(session_id: impl Into<String>) -> Self {
        Self::with_timeout(session_id, DEFAULT_FINALIZE_TIMEOUT)
    }

    /// Create an aggregator with a custom inactivity timeout.
    #[must_use]
    pub fn with_timeout(session_id: impl Into<String>, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                session_id: session_id.into(),
                timeout,
                state: Mutex::new(State::default()),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Session this aggregator produces messages for.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    /// Register the callback for finalized messages, replacing any previous one.
    pub fn set_message_callback<F>(&self, callback: F)
    where
        F: Fn(ChatMessage) + Send + Sync + 'static,
    {
        self.state().callback = Some(Arc::new(callback));
    }

    /// Append a fragment to the current message and restart the timeout.
    ///
    /// Content that resolves to no text (empty strings, block lists without
    /// text blocks) is ignored.
    pub fn append_chunk(&self, content: impl Into<MessageContent>) {
        let text = content.into().into_text();
        if text.is_empty() {
            return;
        }

        let mut state = self.state();
        if state.message_id.is_none() {
            state.message_id = Some(generate_message_id());
        }
        state.buffer.push_str(&text);
        self.restart_timer(&mut state);
    }

    /// Set a metadata key on the message being buffered.
    pub fn set_metadata(&self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.state().metadata.insert(key.into(), value.into());
    }

    /// Set the type of the message being buffered.
    pub fn set_message_type(&self, message_type: MessageType) {
        self.state().message_type = message_type;
    }

    /// Returns true if content is buffered.
    #[must_use]
    pub fn has_buffered_content(&self) -> bool {
        !self.state().buffer.is_empty()
    }

    /// Length of the buffered content in bytes.
    #[must_use]
    pub fn buffer_len(&self) -> usize {
        self.state().buffer.len()
    }

    /// Finalize the buffered content into a message.
    ///
    /// Returns `None` when nothing is buffered. The callback only receives
    /// messages with non-whitespace content, but the message is returned
    /// either way.
    pub fn finalize_message(&self) -> Option<ChatMessage> {
        let (message, callback) = {
            let mut state = self.state();
            state.cancel_timer();
            let message = state.take_message(&self.inner.session_id)?;
            (message, state.callback.clone())
        };
        Self::deliver(callback, &message);
        Some(message)
    }

    /// Emit a user message immediately, bypassing the buffer.
    pub fn create_user_message(&self, content: impl Into<String>) -> ChatMessage {
        self.emit_direct(Role::User, content.into())
    }

    /// Emit a system message immediately, bypassing the buffer.
    pub fn create_system_message(&self, content: impl Into<String>) -> ChatMessage {
        self.emit_direct(Role::System, content.into())
    }

    /// Flush buffered content, cancel the timer, and detach the callback.
    ///
    /// No message is emitted after this returns.
    pub fn dispose(&self) {
        if self.has_buffered_content() {
            self.finalize_message();
        }

        let mut state = self.state();
        state.cancel_timer();
        state.buffer.clear();
        state.message_id = None;
        state.metadata.clear();
        state.message_type = MessageType::default();
        state.callback = None;
        tracing::debug!(session_id = %self.inner.session_id, "Message aggregator disposed");
    }

    fn emit_direct(&self, role: Role, content: String) -> ChatMessage {
        let message = ChatMessage::new(self.inner.session_id.clone(), role, content);
        let callback = self.state().callback.clone();
        if let Some(callback) = callback {
            callback(message.clone());
        }
        message
    }

    fn deliver(callback: Option<MessageCallback>, message: &ChatMessage) {
        if message.is_blank() {
            return;
        }
        if let Some(callback) = callback {
            callback(message.clone());
        }
    }

    fn restart_timer(&self, state: &mut State) {
        state.cancel_timer();
        let generation = state.generation;

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(
                session_id = %self.inner.session_id,
                "No tokio runtime, inactivity finalize disabled"
            );
            return;
        };

        let weak = Arc::downgrade(&self.inner);
        let deadline = tokio::time::Instant::now() + self.inner.timeout;
        state.timer = Some(runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            Self::finalize_on_timeout(&weak, generation);
        }));
    }

    fn finalize_on_timeout(weak: &Weak<Inner>, generation: u64) {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        let aggregator = Self { inner };

        let (message, callback) = {
            let mut state = aggregator.state();
            if state.generation != generation || state.buffer.is_empty() {
                return;
            }
            tracing::info!(
                session_id = %aggregator.inner.session_id,
                chars = state.buffer.len(),
                "Timeout finalize"
            );
            // This task is the timer; release the handle without aborting it.
            drop(state.timer.take());
            state.generation = state.generation.wrapping_add(1);
            let Some(message) = state.take_message(&aggregator.inner.session_id) else {
                return;
            };
            (message, state.callback.clone())
        };
        Self::deliver(callback, &message);
    }
}
