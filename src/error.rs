use thiserror::Error;

#[derive(Error, Debug)]
pub enum MomoError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Non-parsable interval: '{0}'")]
    NonParsableInterval(String),

    #[error("Invalid concurrency for job '{name}': {value}")]
    InvalidConcurrency { name: String, value: u32 },

    #[error("Job is already being defined: {0}")]
    JobAlreadyScheduled(String),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

/// Failure reported by a job store or executions ledger implementation.
#[derive(Error, Debug)]
#[error("{0}")]
pub struct RepositoryError(pub String);

impl RepositoryError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

pub type Result<T> = std::result::Result<T, MomoError>;
