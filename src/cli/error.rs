//! Session error types.

use crate::cli::StopSignal;

/// Errors returned by [`SessionProcess`](crate::cli::SessionProcess) operations.
#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    /// `start` was called more than once.
    #[error("Claude CLI session already started")]
    AlreadyStarted,

    /// The process could not be spawned. Carries the OS error verbatim.
    #[error(transparent)]
    Spawn(std::io::Error),

    /// The operation requires a running process.
    #[error("Claude CLI session not running")]
    NotRunning,

    /// The process has no stdin pipe.
    #[error("Claude CLI stdin not available")]
    StdinUnavailable,

    /// The stdin pipe was closed.
    #[error("Claude CLI stdin is not writable")]
    StdinNotWritable,

    /// Input exceeds the size limit.
    #[error("Input too large: {len} bytes (max {max})")]
    InputTooLarge { len: usize, max: usize },

    /// Input contains a NUL byte.
    #[error("Input contains null bytes")]
    NullByte,

    /// Input could not be encoded as stream-json.
    #[error("Failed to encode input: {0}")]
    Encode(#[from] serde_json::Error),

    /// Writing to stdin failed.
    #[error(transparent)]
    Write(std::io::Error),

    /// Delivering a stop signal failed.
    #[error("Failed to send {signal} to process: {source}")]
    Signal {
        signal: StopSignal,
        source: std::io::Error,
    },
}
