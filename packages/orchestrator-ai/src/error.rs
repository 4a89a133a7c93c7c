use thiserror::Error;

pub type Result<T> = std::result::Result<T, AiError>;

/// Error taxonomy for the AI call wrapper.
#[derive(Error, Debug)]
pub enum AiError {
    /// Network/HTTP 5xx from the vendor; retried with backoff by the wrapper.
    #[error("transient AI call failure: {0}")]
    Transient(String),

    /// The provider rejected the structured-output schema itself, or the
    /// response couldn't be parsed against it. Not retry-worthy by the
    /// wrapper — the stage decides whether to retry with validator feedback.
    #[error("schema rejected: {0}")]
    SchemaRejected(String),

    #[error("request timed out")]
    Timeout,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AiError {
    pub fn is_transient(&self) -> bool {
        matches!(self, AiError::Transient(_) | AiError::Timeout)
    }
}

impl From<AiError> for orchestrator_core::OrchestratorError {
    fn from(e: AiError) -> Self {
        orchestrator_core::OrchestratorError::Other(anyhow::anyhow!(e))
    }
}
