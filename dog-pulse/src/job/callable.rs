use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::{JobError, JobId};

/// In-process job function
pub type JobFn = Arc<dyn Fn(&JobContext) -> Result<Value, JobError> + Send + Sync>;

/// The work a job performs.
///
/// `Func` runs inside the engine's process on a worker thread; `Program`
/// runs as a child process. Which one an engine accepts depends on its
/// worker isolation mode.
#[derive(Clone)]
pub enum Callable {
    /// Function executed on a dedicated worker thread
    Func { name: String, f: JobFn },

    /// Executable launched as an isolated child process
    Program { program: String },
}

impl Callable {
    /// Wrap a function
    pub fn func<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&JobContext) -> Result<Value, JobError> + Send + Sync + 'static,
    {
        Self::Func {
            name: name.into(),
            f: Arc::new(f),
        }
    }

    /// Reference an executable by path or name on `PATH`
    pub fn program(program: impl Into<String>) -> Self {
        Self::Program {
            program: program.into(),
        }
    }

    /// Function name or program path
    pub fn label(&self) -> &str {
        match self {
            Self::Func { name, .. } => name,
            Self::Program { program } => program,
        }
    }

    /// Kind name used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Func { .. } => "func",
            Self::Program { .. } => "program",
        }
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Func { name, .. } => f.debug_struct("Func").field("name", name).finish(),
            Self::Program { program } => f.debug_struct("Program").field("program", program).finish(),
        }
    }
}

impl fmt::Display for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.label())
    }
}

/// Execution context handed to an in-process job function
#[derive(Debug, Clone)]
pub struct JobContext {
    /// Job identifier
    pub job_id: JobId,

    /// Positional arguments
    pub args: Vec<Value>,

    /// Keyword arguments
    pub kwargs: Map<String, Value>,

    /// Cancelled when the job times out or the engine is disposed.
    /// Threads cannot be killed, so long-running functions should check it.
    pub cancellation: CancellationToken,
}

impl JobContext {
    /// Positional argument at `index`
    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.args.get(index)
    }

    /// Keyword argument by name
    pub fn kwarg(&self, key: &str) -> Option<&Value> {
        self.kwargs.get(key)
    }

    /// Whether the job has been asked to stop
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}
