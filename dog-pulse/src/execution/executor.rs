use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::oneshot::{self, error::TryRecvError};
use tokio_util::sync::CancellationToken;

use crate::{
    config::EngineConfig,
    execution::{thread::ThreadLiveness, ProcessExecutor, ThreadExecutor},
    exitcode,
    job::Callable,
    JobError, JobRecord, QueueResult,
};

/// Worker isolation mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutorKind {
    /// Dedicated OS thread per job
    Thread,

    /// Child process per job
    Process,
}

impl ExecutorKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Thread => "thread",
            Self::Process => "process",
        }
    }
}

impl fmt::Display for ExecutorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// What a worker reports when it finishes
#[derive(Debug, Clone)]
pub struct WorkerOutcome {
    pub output: Option<Value>,
    pub exitcode: i32,
    pub error: Option<String>,
    pub ended_at: DateTime<Utc>,
}

impl WorkerOutcome {
    /// Successful return value
    pub fn success(output: Value) -> Self {
        Self {
            output: Some(output),
            exitcode: exitcode::SUCCESS,
            error: None,
            ended_at: Utc::now(),
        }
    }

    /// Failure with the generic failure exit code
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            output: None,
            exitcode: exitcode::FAILED,
            error: Some(error.into()),
            ended_at: Utc::now(),
        }
    }

    /// Outcome of an in-process callable
    pub fn from_result(result: Result<Value, JobError>) -> Self {
        match result {
            Ok(output) => Self::success(output),
            Err(e) => Self::failed(e.message()),
        }
    }
}

/// Result of a non-blocking check on a worker
#[derive(Debug)]
pub enum WorkerPoll {
    /// Still executing within its time budget
    Running,

    /// Reported an outcome
    Finished(WorkerOutcome),

    /// Exceeded its timeout and must be terminated
    TimedOut,
}

/// Scheduler-side handle to one running worker.
///
/// The worker reports through a oneshot channel; the handle never blocks.
/// Dropping the handle terminates the worker.
#[derive(Debug)]
pub struct WorkerHandle {
    outcome_rx: oneshot::Receiver<WorkerOutcome>,
    cancellation: CancellationToken,
    launched: Instant,
    timeout: Option<Duration>,
    liveness: Option<Arc<ThreadLiveness>>,
}

impl WorkerHandle {
    /// Create a handle and the sender its worker reports through
    pub(crate) fn channel(timeout: Option<Duration>) -> (Self, oneshot::Sender<WorkerOutcome>) {
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let handle = Self {
            outcome_rx,
            cancellation: CancellationToken::new(),
            launched: Instant::now(),
            timeout,
            liveness: None,
        };
        (handle, outcome_tx)
    }

    /// Track a worker thread that may outlive its handle
    pub(crate) fn with_liveness(mut self, liveness: Arc<ThreadLiveness>) -> Self {
        self.liveness = Some(liveness);
        self
    }

    /// Check for completion without blocking
    pub fn poll(&mut self) -> WorkerPoll {
        match self.outcome_rx.try_recv() {
            Ok(outcome) => WorkerPoll::Finished(outcome),
            Err(TryRecvError::Closed) => {
                WorkerPoll::Finished(WorkerOutcome::failed("worker exited without reporting an outcome"))
            }
            Err(TryRecvError::Empty) => match self.timeout {
                Some(timeout) if self.launched.elapsed() >= timeout => WorkerPoll::TimedOut,
                _ => WorkerPoll::Running,
            },
        }
    }

    /// Stop the worker. Processes are killed; threads are signalled and abandoned.
    pub fn terminate(&self) {
        self.cancellation.cancel();
        if let Some(liveness) = &self.liveness {
            liveness.abandon();
        }
    }

    /// Token observed by the worker
    pub fn cancellation(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Time since launch
    pub fn elapsed(&self) -> Duration {
        self.launched.elapsed()
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Runs one job in an isolated execution context.
///
/// Implementations must not block: `start` launches the worker and returns.
pub trait WorkerExecutor: Send + Sync + fmt::Debug {
    /// Isolation mode of this executor
    fn kind(&self) -> ExecutorKind;

    /// Whether this executor can run the callable
    fn supports(&self, callable: &Callable) -> bool;

    /// Launch a worker for the job
    fn start(&self, job: &JobRecord) -> QueueResult<WorkerHandle>;

    /// Terminated workers that are still executing.
    ///
    /// Each one holds a worker's share of capacity until it exits.
    fn lingering(&self) -> usize {
        0
    }
}

/// Build the executor selected by the configuration
pub fn executor_for(config: &EngineConfig) -> Arc<dyn WorkerExecutor> {
    if config.use_threads {
        Arc::new(ThreadExecutor::new())
    } else {
        Arc::new(ProcessExecutor::new())
    }
}
