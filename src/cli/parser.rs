//! Incremental stream-json parser for Claude Code stdout.
//!
//! Output arrives in arbitrary chunks. [`StreamParser`] buffers bytes until a
//! newline completes a line, then turns each line into exactly one text
//! fragment. The partial-line buffer is bounded by [`MAX_LINE_BUFFER_BYTES`].

use crate::cli::{MessageContent, StreamMessage};

/// Hard cap on the partial-line buffer.
pub const MAX_LINE_BUFFER_BYTES: usize = 1_048_576;

/// Prefix applied to fragments produced from `error` lines.
pub const ERROR_PREFIX: &str = "[ERROR] ";

/// Maximum number of characters of a rejected line included in logs.
const LOG_PREVIEW_CHARS: usize = 100;

/// One decoded protocol line.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedLine {
    /// Text extracted from the line, if it carries any.
    pub fragment: Option<String>,
    /// The decoded message, if the line was valid stream-json.
    pub message: Option<StreamMessage>,
}

/// Result of feeding one chunk into the parser.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FeedOutcome {
    /// Lines completed by this chunk, in stream order.
    pub lines: Vec<ParsedLine>,
    /// Number of bytes dropped because a line exceeded the cap.
    pub discarded: Option<usize>,
}

impl FeedOutcome {
    /// Concatenation of all fragments in this outcome.
    #[must_use]
    pub fn text(&self) -> String {
        self.lines
            .iter()
            .filter_map(|line| line.fragment.as_deref())
            .collect()
    }
}

/// Parse one complete protocol line.
///
/// Returns `None` for blank lines. Recognized types without their text field
/// (a `result` without `result`, an `assistant` without content) decode but
/// carry no fragment. Unknown types and invalid JSON fall back to the trimmed
/// raw text, so no content is dropped silently.
#[must_use]
pub fn parse_line(line: &str) -> Option<ParsedLine> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    let message = match serde_json::from_str::<StreamMessage>(trimmed) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(
                line = %preview(trimmed),
                error = %e,
                "Failed to parse stream-json line, passing raw text through"
            );
            return Some(ParsedLine {
                fragment: Some(trimmed.to_string()),
                message: None,
            });
        }
    };

    let fragment = match &message {
        StreamMessage::Assistant { message } => message.content.as_ref().map(MessageContent::text),
        StreamMessage::Result(result) => result.result.clone(),
        StreamMessage::Error { error } => {
            tracing::error!(error = %error, "Stream-json error");
            Some(format!("{ERROR_PREFIX}{error}"))
        }
        StreamMessage::StreamEvent { .. } | StreamMessage::Unknown => {
            tracing::trace!(line = %preview(trimmed), "Unextracted stream-json message");
            Some(trimmed.to_string())
        }
    };

    Some(ParsedLine {
        fragment,
        message: Some(message),
    })
}

fn preview(line: &str) -> String {
    line.chars().take(LOG_PREVIEW_CHARS).collect()
}

/// Line-framing parser for one output stream.
#[derive(Debug)]
pub struct StreamParser {
    buffer: Vec<u8>,
    limit: usize,
    /// Set after the cap trips; bytes are skipped through the next newline.
    discarding: bool,
}

impl Default for StreamParser {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamParser {
    /// Create a parser with the default buffer cap.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limit(MAX_LINE_BUFFER_BYTES)
    }

    /// Create a parser with a custom buffer cap.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            buffer: Vec::new(),
            limit,
            discarding: false,
        }
    }

    /// Number of bytes currently held for an incomplete line.
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns true while the tail of an oversized line is being skipped.
    #[must_use]
    pub fn is_discarding(&self) -> bool {
        self.discarding
    }

    /// Discard any incomplete line.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.discarding = false;
    }

    /// Feed a raw chunk and return the lines it completed.
    ///
    /// Bytes are framed before decoding, so multi-byte characters split
    /// across chunks decode correctly. A line longer than the cap never
    /// produces a fragment: once the cap trips, everything up to and
    /// including the line's newline is dropped and the bytes dropped at
    /// that point are reported in [`FeedOutcome::discarded`].
    pub fn feed(&mut self, chunk: &[u8]) -> FeedOutcome {
        let mut outcome = FeedOutcome::default();

        let chunk = if self.discarding {
            let Some(newline) = chunk.iter().position(|b| *b == b'\n') else {
                return outcome;
            };
            tracing::debug!(bytes = newline, "Skipped tail of oversized line");
            self.discarding = false;
            &chunk[newline + 1..]
        } else {
            chunk
        };

        // The buffered remainder never contains a newline.
        let mut search_from = self.buffer.len();
        self.buffer.extend_from_slice(chunk);

        let mut discarded = 0;
        let mut line_start = 0;
        while let Some(offset) = self.buffer[search_from..].iter().position(|b| *b == b'\n') {
            let line_end = search_from + offset;
            let line = &self.buffer[line_start..line_end];
            if line.len() > self.limit {
                discarded += line.len();
            } else if let Some(parsed) = parse_line(&String::from_utf8_lossy(line)) {
                outcome.lines.push(parsed);
            }
            line_start = line_end + 1;
            search_from = line_start;
        }
        self.buffer.drain(..line_start);

        if self.buffer.len() > self.limit {
            discarded += self.buffer.len();
            self.buffer.clear();
            self.discarding = true;
        }

        if discarded > 0 {
            tracing::warn!(
                bytes = discarded,
                limit = self.limit,
                "Line exceeded buffer limit, discarding it"
            );
            outcome.discarded = Some(discarded);
        }

        outcome
    }
}
