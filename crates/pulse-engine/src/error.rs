//! Error types for the state engine.

use thiserror::Error;

/// Result alias used by every engine operation.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors returned by engine operations.
///
/// Removing something that does not exist is never an error. An empty read
/// is `Ok`, so a caller can always tell "nothing there" apart from
/// "backend unreachable".
#[derive(Debug, Error)]
pub enum EngineError {
    /// An identifier failed validation before any I/O was attempted.
    #[error("Invalid {component}: {reason}")]
    InvalidInput {
        /// Which identifier was rejected (project, namespace, channel, uid).
        component: &'static str,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// The shared backend could not serve the request.
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// A stored value could not be encoded or decoded.
    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl EngineError {
    /// Whether this error means the state is temporarily unknown.
    #[must_use]
    pub fn is_backend(&self) -> bool {
        matches!(self, Self::Backend(_))
    }

    /// Short label for metrics and logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput { .. } => "invalid_input",
            Self::Backend(BackendError::Unavailable(_)) => "backend_unavailable",
            Self::Backend(BackendError::Timeout(_)) => "backend_timeout",
            Self::Backend(BackendError::Protocol(_)) => "backend_protocol",
            Self::Codec(_) => "codec",
        }
    }
}

/// Failures of the shared backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The store could not be reached or refused the connection.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store did not answer within the operation timeout.
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The store answered with something unexpected.
    #[error("unexpected reply: {0}")]
    Protocol(String),
}
