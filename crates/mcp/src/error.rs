//! Worker channel error types.

use std::time::Duration;

use crate::protocol::JsonRpcError;
use crate::supervisor::ExitInfo;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The launch config is missing, unreadable, or names nothing runnable.
    #[error("worker unavailable: {0}")]
    ProcessUnavailable(String),

    #[error("failed to spawn worker: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("request {method} timed out after {timeout:?}")]
    RequestTimeout { method: String, timeout: Duration },

    #[error("worker exited unexpectedly ({0})")]
    ProcessExited(ExitInfo),

    #[error("worker stopped")]
    Stopped,

    #[error("{}", .0.message)]
    Remote(#[from] JsonRpcError),

    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("tool call failed: {0}")]
    ToolCallFailed(String),

    #[error("failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("worker I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error affects the whole worker rather than one request.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ProcessUnavailable(_)
                | Error::Spawn(_)
                | Error::ProcessExited(_)
                | Error::Stopped
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
