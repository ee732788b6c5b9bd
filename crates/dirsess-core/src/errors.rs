/// Failures raised by a [`ContextFactory`](crate::factory::ContextFactory).
#[derive(Clone, Debug, thiserror::Error)]
pub enum ContextError {
    #[error("context creation failed: {0}")]
    CreationFailed(String),

    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),
}

impl ContextError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::CreationFailed(_) => "creation_failed",
            Self::InvalidCredentials(_) => "invalid_credentials",
        }
    }
}
