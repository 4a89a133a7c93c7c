use thiserror::Error;

pub type Result<T> = std::result::Result<T, EvidenceError>;

#[derive(Error, Debug)]
pub enum EvidenceError {
    #[error(transparent)]
    Db(#[from] orchestrator_db::DbError),

    #[error(transparent)]
    Ai(#[from] orchestrator_ai::AiError),

    #[error(transparent)]
    Core(#[from] orchestrator_core::OrchestratorError),
}

impl From<EvidenceError> for orchestrator_core::OrchestratorError {
    fn from(e: EvidenceError) -> Self {
        match e {
            EvidenceError::Core(inner) => inner,
            other => orchestrator_core::OrchestratorError::Other(anyhow::anyhow!(other)),
        }
    }
}
