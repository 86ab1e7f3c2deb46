use thiserror::Error;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The caller asked for a transition the current state does not allow.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// An identity or billing provider call failed or timed out.
    #[error("External call failed during {operation}: {cause}")]
    ExternalCallFailed {
        operation: String,
        #[source]
        cause: anyhow::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Plan catalog error: {0}")]
    PlanCatalog(#[from] serde_yaml_ng::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl OrchestratorError {
    pub fn external(operation: impl Into<String>, cause: impl Into<anyhow::Error>) -> Self {
        Self::ExternalCallFailed {
            operation: operation.into(),
            cause: cause.into(),
        }
    }
}
