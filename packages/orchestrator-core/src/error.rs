use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("job not found: {0}")]
    JobNotFound(Uuid),

    #[error("stage not found: {0}")]
    StageNotFound(String),

    #[error("dag cycle detected")]
    DagCycleDetected,

    #[error("missing dependency: {0}")]
    MissingDependency(String),

    #[error("stage execution failed: {0}")]
    StageExecutionFailed(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl OrchestratorError {
    pub fn config<E: std::fmt::Display>(e: E) -> Self {
        Self::Config(e.to_string())
    }
}

/// Classifies an error for the job runtime's retry/compensation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Schema/citation-coverage failure inside the generate-validate-retry
    /// loop; recoverable by retrying with validator feedback.
    Validation,
    /// Network/HTTP 5xx from a vendor or infra dependency; retried with backoff.
    Transient,
    /// The AI provider rejected the structured-output schema outright; not
    /// retry-worthy.
    NonTransientAi,
    /// Another worker already committed the canonical write this stage was
    /// about to perform; treated as success once verified.
    UniqueConcurrent,
    /// A dependency stage failed; this job cascade-fails with no retry.
    Upstream,
    /// The job's context was cancelled or its deadline elapsed.
    Cancelled,
    /// Missing configuration/dependencies; fails with no retry.
    Fatal,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Validation => "validation",
            ErrorCategory::Transient => "transient",
            ErrorCategory::NonTransientAi => "non_transient_ai",
            ErrorCategory::UniqueConcurrent => "unique_concurrent",
            ErrorCategory::Upstream => "upstream",
            ErrorCategory::Cancelled => "cancelled",
            ErrorCategory::Fatal => "fatal",
        }
    }

    /// Whether the job runtime should requeue for another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCategory::Validation | ErrorCategory::Transient)
    }

    /// Best-effort classification from an error's display text, for errors
    /// that cross an FFI-ish boundary (vendor HTTP clients, DB drivers)
    /// without already carrying a category. Stage code that knows its own
    /// failure mode should prefer constructing the category directly.
    pub fn classify(message: &str) -> Self {
        let m = message.to_ascii_lowercase();
        if m.contains("cancelled") || m.contains("canceled") || m.contains("deadline") {
            ErrorCategory::Cancelled
        } else if m.contains("unique") || m.contains("duplicate key") || m.contains("conflict") {
            ErrorCategory::UniqueConcurrent
        } else if m.contains("timeout") || m.contains("connection") || m.contains("reset by peer") {
            ErrorCategory::Transient
        } else if m.contains("schema") || m.contains("citation") || m.contains("validation") {
            ErrorCategory::Validation
        } else if m.contains("missing dependency") || m.contains("configuration") {
            ErrorCategory::Fatal
        } else {
            ErrorCategory::Transient
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_transient_on_timeout() {
        assert_eq!(ErrorCategory::classify("connection timeout"), ErrorCategory::Transient);
    }

    #[test]
    fn classify_unique_as_concurrent() {
        assert_eq!(
            ErrorCategory::classify("duplicate key value violates unique constraint"),
            ErrorCategory::UniqueConcurrent
        );
    }

    #[test]
    fn classify_validation_on_citation() {
        assert_eq!(
            ErrorCategory::classify("missing citation for must-cite chunk"),
            ErrorCategory::Validation
        );
    }

    #[test]
    fn is_retryable_matches_spec_categories() {
        assert!(ErrorCategory::Transient.is_retryable());
        assert!(ErrorCategory::Validation.is_retryable());
        assert!(!ErrorCategory::Fatal.is_retryable());
        assert!(!ErrorCategory::Upstream.is_retryable());
    }
}
