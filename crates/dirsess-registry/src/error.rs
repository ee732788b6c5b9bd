use dirsess_core::{ContextError, SessionId};

/// Errors surfaced by the session registry.
///
/// Misses on lookup, complete and abandon are not errors; they come back as
/// `None` or [`AbandonOutcome::NotFound`](crate::request_table::AbandonOutcome).
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error(transparent)]
    ContextCreationFailed(#[from] ContextError),

    #[error("session {0} is closing")]
    SessionClosing(SessionId),
}

impl RegistryError {
    /// Nothing at this layer is worth retrying; retry policy lives above it.
    pub fn is_retryable(&self) -> bool {
        false
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::AccessDenied(_) => "access_denied",
            Self::ContextCreationFailed(_) => "context_creation_failed",
            Self::SessionClosing(_) => "session_closing",
        }
    }
}

/// Failure reported by a request's cancellation callback.
#[derive(Debug, thiserror::Error)]
pub enum CancelError {
    #[error("cancellation failed: {0}")]
    Failed(String),

    #[error("cancellation callback panicked: {0}")]
    Panicked(String),
}
