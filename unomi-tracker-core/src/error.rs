//! Error types for unomi-tracker-core

use thiserror::Error;

/// Main error type for the unomi-tracker-core library
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Network-level failure (connection refused, DNS, reset)
    #[error("transport error: {0}")]
    Transport(String),

    /// Server answered with a status outside 200/204/304
    #[error("request failed with status {status}: {body}")]
    Status { status: u16, body: String },

    /// No response within the configured timeout
    #[error("request to {url} timed out after {timeout_ms}ms")]
    Timeout { url: String, timeout_ms: u64 },

    /// Response body could not be parsed
    #[error("failed to parse response: {0}")]
    Parse(String),

    /// Context bootstrap was already started for this tracker
    #[error("context bootstrap already started")]
    AlreadyBootstrapped,

    /// Method name not known to the command queue
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// Command queue already drained
    #[error("command queue is no longer accepting commands")]
    QueueClosed,

    /// Arguments of a replayed command did not match the method
    #[error("invalid arguments for {method}: {message}")]
    InvalidArguments { method: String, message: String },
}

impl Error {
    /// Whether this failure came from talking to the remote server.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Transport(_) | Error::Status { .. } | Error::Timeout { .. }
        )
    }
}

/// Result type alias for unomi-tracker-core
pub type Result<T> = std::result::Result<T, Error>;
