use thiserror::Error;

pub type Result<T> = std::result::Result<T, StageError>;

/// Error taxonomy for stage bodies, composed into `OrchestratorError` at the
/// `Pipeline::run` boundary via `?`. Every variant maps to a stable stage
/// tag so `Fail(stage, err)` always reports a consistent error category.
#[derive(Error, Debug)]
pub enum StageError {
    #[error(transparent)]
    Db(#[from] orchestrator_db::error::DbError),

    #[error(transparent)]
    Ai(#[from] orchestrator_ai::AiError),

    #[error(transparent)]
    Saga(#[from] orchestrator_saga::SagaError),

    #[error(transparent)]
    Evidence(#[from] orchestrator_evidence::EvidenceError),

    #[error(transparent)]
    Core(#[from] orchestrator_core::OrchestratorError),

    #[error("web fetch rejected: {0}")]
    WebFetchRejected(String),

    #[error("validation failed after exhausting retries: {0}")]
    ValidationExhausted(String),

    #[error("interactive stage awaiting a user reply")]
    AwaitingUser,
}

impl From<StageError> for orchestrator_core::OrchestratorError {
    fn from(e: StageError) -> Self {
        match e {
            StageError::Core(inner) => inner,
            other => orchestrator_core::OrchestratorError::Other(anyhow::anyhow!(other)),
        }
    }
}
