use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use tracing::debug;

use crate::{
    execution::{ExecutorKind, WorkerExecutor, WorkerHandle, WorkerOutcome},
    job::{Callable, JobContext},
    JobError, JobRecord, QueueError, QueueResult,
};

/// Runs in-process functions, one dedicated OS thread per job.
///
/// Panics are caught at the thread boundary and reported as failures. A
/// thread cannot be killed: terminating the job cancels its
/// [`JobContext::cancellation`] token and abandons the thread, whose late
/// outcome is discarded. An abandoned thread still counts against the
/// engine's worker capacity until its function returns.
#[derive(Debug, Clone, Default)]
pub struct ThreadExecutor {
    stack_size: Option<usize>,
    abandoned: Arc<AtomicUsize>,
}

impl ThreadExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stack size for worker threads
    pub fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }
}

impl WorkerExecutor for ThreadExecutor {
    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Thread
    }

    fn supports(&self, callable: &Callable) -> bool {
        matches!(callable, Callable::Func { .. })
    }

    fn start(&self, job: &JobRecord) -> QueueResult<WorkerHandle> {
        let Callable::Func { f, .. } = &job.callable else {
            return Err(QueueError::UnsupportedCallable {
                executor: self.kind().name(),
                callable: job.callable.to_string(),
            });
        };

        let liveness = Arc::new(ThreadLiveness::new(self.abandoned.clone()));
        let (handle, outcome_tx) = WorkerHandle::channel(job.timeout);
        let handle = handle.with_liveness(liveness.clone());
        let ctx = JobContext {
            job_id: job.id,
            args: job.args.clone(),
            kwargs: job.kwargs.clone(),
            cancellation: handle.cancellation(),
        };
        let f = f.clone();

        let mut builder = thread::Builder::new().name(format!("dog-pulse-job-{}", job.id));
        if let Some(bytes) = self.stack_size {
            builder = builder.stack_size(bytes);
        }

        builder
            .spawn(move || {
                let outcome = match panic::catch_unwind(AssertUnwindSafe(|| f(&ctx))) {
                    Ok(result) => WorkerOutcome::from_result(result),
                    Err(payload) => {
                        WorkerOutcome::from_result(Err(JobError::Panicked(panic_message(payload.as_ref()))))
                    }
                };
                liveness.exit();
                // Receiver is gone if the job was terminated
                if outcome_tx.send(outcome).is_err() {
                    debug!(job_id = %ctx.job_id, "Discarding outcome of terminated job");
                }
            })
            .map_err(|e| QueueError::Spawn(e.to_string()))?;

        Ok(handle)
    }

    fn lingering(&self) -> usize {
        self.abandoned.load(Ordering::SeqCst)
    }
}

const RUNNING: u8 = 0;
const EXITED: u8 = 1;
const ABANDONED: u8 = 2;

/// Whether one worker thread is still executing after its job was terminated
#[derive(Debug)]
pub(crate) struct ThreadLiveness {
    state: AtomicU8,
    abandoned: Arc<AtomicUsize>,
}

impl ThreadLiveness {
    fn new(abandoned: Arc<AtomicUsize>) -> Self {
        Self {
            state: AtomicU8::new(RUNNING),
            abandoned,
        }
    }

    /// Count the thread as abandoned if it has not exited yet
    pub(crate) fn abandon(&self) {
        // Incremented first so a concurrent exit can never underflow the count
        self.abandoned.fetch_add(1, Ordering::SeqCst);
        if self
            .state
            .compare_exchange(RUNNING, ABANDONED, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            self.abandoned.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Called by the thread once its function has returned
    fn exit(&self) {
        if self.state.swap(EXITED, Ordering::SeqCst) == ABANDONED {
            self.abandoned.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
