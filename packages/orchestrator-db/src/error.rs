use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, DbError>;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("row not found: {0}")]
    NotFound(String),

    #[error("job not found: {0}")]
    JobNotFound(Uuid),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error(transparent)]
    Orchestrator(#[from] orchestrator_core::OrchestratorError),
}

impl From<DbError> for orchestrator_core::OrchestratorError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::Orchestrator(inner) => inner,
            other => orchestrator_core::OrchestratorError::Other(anyhow::anyhow!(other)),
        }
    }
}
