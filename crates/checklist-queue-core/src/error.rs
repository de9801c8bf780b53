use thiserror::Error;

/// Errors that can occur in the durable store layer.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors returned by a remote submission attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("Request timed out after {0} ms")]
    Timeout(u64),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl NetworkError {
    /// Build the error for a non-2xx response, classifying duplicates as conflicts.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        let lowered = body.to_lowercase();
        if status == 409 || lowered.contains("conflito") || lowered.contains("já existe") {
            return Self::Conflict(body);
        }
        Self::Http { status, body }
    }

    /// Whether the server never saw (or never answered) the request.
    ///
    /// Unreachable failures are worth queueing for a later drain; a server
    /// rejection will fail the same way next time.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Transport(_))
    }
}
