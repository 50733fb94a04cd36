use thiserror::Error;

use crate::types::{JobId, JobStatus};

/// Result type for engine operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Infrastructure and lifecycle errors for engine operations.
///
/// Job-level failures never surface here while the engine runs: they are
/// recorded on the [`JobRecord`](crate::JobRecord) instead.
#[derive(Error, Debug, Clone)]
pub enum QueueError {
    #[error("Engine has been disposed")]
    Disposed,

    #[error("Engine faulted: {0}")]
    Faulted(String),

    #[error("Engine pulse has not been started")]
    NotStarted,

    #[error("No tokio runtime available to drive the engine")]
    NoRuntime,

    #[error("Waiting queue is full ({max} jobs)")]
    QueueFull { max: usize },

    #[error("Callable not supported by {executor} workers: {callable}")]
    UnsupportedCallable {
        executor: &'static str,
        callable: String,
    },

    #[error("Failed to spawn worker: {0}")]
    Spawn(String),

    #[error("Invalid transition for job {id}: {from} -> {to}")]
    InvalidTransition {
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Job {id} failed with exit code {exitcode}: {error}")]
    JobFailed {
        id: JobId,
        exitcode: i32,
        error: String,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error returned by a job's callable
#[derive(Error, Debug, Clone)]
pub enum JobError {
    /// The callable reported a failure
    #[error("{0}")]
    Failed(String),

    /// The callable panicked
    #[error("panicked: {0}")]
    Panicked(String),

    /// The callable observed cancellation and stopped early
    #[error("cancelled")]
    Cancelled,
}

impl JobError {
    /// Create a failure error
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }

    /// Get the error message
    pub fn message(&self) -> String {
        self.to_string()
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

impl From<serde_json::Error> for JobError {
    fn from(err: serde_json::Error) -> Self {
        Self::Failed(format!("serialization error: {}", err))
    }
}

impl From<std::io::Error> for JobError {
    fn from(err: std::io::Error) -> Self {
        Self::Failed(err.to_string())
    }
}
