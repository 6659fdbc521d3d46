use thiserror::Error;

/// A convenience `Result` alias using [`AgentflowError`].
pub type AgentflowResult<T> = Result<T, AgentflowError>;

/// Top-level error type for the Agentflow backend.
///
/// Each variant corresponds to one class of failure a caller may need to
/// tell apart (bad input, missing job, stage or pipeline failure, ...).
#[derive(Error, Debug)]
pub enum AgentflowError {
    /// Malformed submission (blank task, iteration count out of range).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Unknown or evicted job ID.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A single agent stage failed. Recoverable under some strategies.
    #[error("Stage '{role}' failed: {reason}")]
    StageFailure {
        /// Role name of the failing stage.
        role: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// The pipeline cannot continue; the job ends in `error`.
    #[error("Pipeline failure: {0}")]
    PipelineFailure(String),

    /// A status change that would break the monotone lifecycle.
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// An error from the HTTP layer.
    #[error("HTTP error: {0}")]
    Http(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AgentflowError {
    /// Shorthand for a [`AgentflowError::StageFailure`].
    pub fn stage(role: impl std::fmt::Display, reason: impl Into<String>) -> Self {
        Self::StageFailure {
            role: role.to_string(),
            reason: reason.into(),
        }
    }
}
