use thiserror::Error;

pub type Result<T> = std::result::Result<T, SagaError>;

#[derive(Error, Debug)]
pub enum SagaError {
    #[error("saga not found: {0}")]
    NotFound(uuid::Uuid),

    #[error("unknown saga action kind: {0}")]
    UnknownActionKind(String),

    #[error(transparent)]
    Db(#[from] orchestrator_db::DbError),

    #[error(transparent)]
    Core(#[from] orchestrator_core::OrchestratorError),
}
