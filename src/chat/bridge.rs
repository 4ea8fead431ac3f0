//! Routes decoded stream-json messages into a message aggregator.
//!
//! The inactivity timeout is only a fallback: the CLI also signals turn
//! boundaries explicitly (`result`, `message_stop`, tool use starts), and
//! errors become their own messages.

use std::sync::{Arc, Mutex, PoisonError};

use crate::chat::{MessageAggregator, MessageType};
use crate::cli::{
    ContentDelta, HandlerId, PartialEvent, SessionEvent, SessionEventKind, SessionProcess,
    StreamMessage,
};

/// Name of the tool whose `prompt` input is recorded as a spawn prompt.
const TASK_TOOL: &str = "Task";

/// Apply one decoded stream message to an aggregator.
pub fn apply_stream_message(aggregator: &MessageAggregator, message: &StreamMessage) {
    match message {
        StreamMessage::Assistant { message } => {
            if let Some(content) = &message.content {
                aggregator.append_chunk(content.clone());
            }
            if let Some(model) = &message.model {
                aggregator.set_metadata("model", model.as_str());
            }
            if let Some(stop_reason) = &message.stop_reason {
                aggregator.set_metadata("stopReason", stop_reason.as_str());
            }
        }
        StreamMessage::Result(result) => {
            if let Some(text) = result.result.as_deref().filter(|text| !text.is_empty()) {
                aggregator.append_chunk(text);
            }
            if let Some(cost) = result.cost_usd {
                aggregator.set_metadata("costUsd", cost);
            }
            if let Some(duration) = result.duration_ms {
                aggregator.set_metadata("durationMs", duration);
            }
            if let Some(stop_reason) = &result.stop_reason {
                aggregator.set_metadata("stopReason", stop_reason.as_str());
            }
            aggregator.finalize_message();
        }
        StreamMessage::Error { error } if !error.is_empty() => {
            if aggregator.has_buffered_content() {
                aggregator.finalize_message();
            }
            aggregator.set_message_type(MessageType::Error);
            aggregator.append_chunk(error.as_str());
            aggregator.finalize_message();
        }
        StreamMessage::StreamEvent { event } => apply_partial_event(aggregator, event),
        StreamMessage::Error { .. } | StreamMessage::Unknown => {}
    }
}

fn apply_partial_event(aggregator: &MessageAggregator, event: &PartialEvent) {
    match event {
        PartialEvent::ContentBlockDelta {
            delta: ContentDelta::TextDelta { text },
            ..
        } if !text.is_empty() => aggregator.append_chunk(text.as_str()),
        PartialEvent::ContentBlockStart { content_block, .. } if content_block.kind == "tool_use" => {
            if aggregator.has_buffered_content() {
                aggregator.finalize_message();
            }
            aggregator.set_message_type(MessageType::ToolUse);
            if let Some(name) = &content_block.name {
                aggregator.set_metadata("toolName", name.as_str());
            }
            if let Some(id) = &content_block.id {
                aggregator.set_metadata("toolUseId", id.as_str());
            }
            if let Some(input) = content_block.input.as_ref().filter(|input| !input.is_null()) {
                aggregator.set_metadata("toolInput", input.clone());
                if content_block.name.as_deref() == Some(TASK_TOOL) {
                    if let Some(prompt) = input.get("prompt").and_then(serde_json::Value::as_str) {
                        aggregator.set_metadata("spawnPrompt", prompt);
                    }
                }
            }
        }
        PartialEvent::MessageStop => {
            aggregator.finalize_message();
        }
        _ => {}
    }
}

/// Subscriptions connecting one session to one aggregator.
#[derive(Debug)]
pub struct StreamBridge {
    message: HandlerId,
    exit: HandlerId,
    error: HandlerId,
}

impl StreamBridge {
    /// Feed `session`'s decoded messages into `aggregator`.
    ///
    /// The aggregator is disposed when the session exits or reports an
    /// error, so buffered content is flushed before the session goes away.
    pub fn attach(session: &SessionProcess, aggregator: &MessageAggregator) -> Self {
        let target = aggregator.clone();
        let message = session.on(SessionEventKind::Message, move |event| {
            if let SessionEvent::Message(message) = event {
                apply_stream_message(&target, message);
            }
        });

        // Dispose once, whichever of exit/error arrives first.
        let disposer = Arc::new(Mutex::new(Some(aggregator.clone())));
        let on_exit = Arc::clone(&disposer);
        let exit = session.on(SessionEventKind::Exit, move |_| {
            dispose_once(&on_exit);
        });
        let on_error = disposer;
        let error = session.on(SessionEventKind::Error, move |_| {
            dispose_once(&on_error);
        });

        Self {
            message,
            exit,
            error,
        }
    }

    /// Remove the bridge's subscriptions from `session`.
    pub fn detach(self, session: &SessionProcess) {
        session.off(SessionEventKind::Message, self.message);
        session.off(SessionEventKind::Exit, self.exit);
        session.off(SessionEventKind::Error, self.error);
    }
}

fn dispose_once(slot: &Mutex<Option<MessageAggregator>>) {
    let aggregator = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
    if let Some(aggregator) = aggregator {
        aggregator.dispose();
    }
}
