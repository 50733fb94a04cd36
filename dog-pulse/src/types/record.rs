use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{json, Map, Value};

use super::{JobId, JobPriority};
use crate::{execution::WorkerOutcome, job::Callable, Job, QueueError, QueueResult};

/// Reserved exit codes recorded on finished jobs.
///
/// Child processes report their own exit code, so the engine's sentinels are
/// negative and never collide with a program's status.
pub mod exitcode {
    /// The job ran and returned normally
    pub const SUCCESS: i32 = 0;

    /// The callable returned an error, panicked, or its worker could not run
    pub const FAILED: i32 = 1;

    /// The job exceeded its timeout and was terminated
    pub const TIMEOUT: i32 = -1;

    /// The job was never run because its lane predecessor failed
    pub const SKIPPED: i32 = -2;
}

/// Job status lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Job is queued and waiting for a working slot
    Waiting,

    /// Job occupies a working slot
    Working,

    /// Job was skipped because its lane predecessor failed
    Skipped,

    /// Job finished: success, failure, or timeout
    Completed,
}

impl JobStatus {
    /// Check if the job is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Skipped | Self::Completed)
    }

    /// Check whether moving to `next` is a legal forward transition
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Waiting, Self::Working)
                | (Self::Waiting, Self::Skipped)
                | (Self::Working, Self::Completed)
        )
    }

    /// Get the status name as a string
    pub fn name(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Working => "working",
            Self::Skipped => "skipped",
            Self::Completed => "completed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Job record - one unit of work and its accumulated outcome
#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    /// Unique job identifier, also the arrival sequence
    pub id: JobId,

    /// Optional human-readable label
    pub name: Option<String>,

    /// The work to perform
    #[serde(skip)]
    pub callable: Callable,

    /// Positional arguments
    pub args: Vec<Value>,

    /// Keyword arguments
    pub kwargs: Map<String, Value>,

    /// Dispatch priority
    pub priority: JobPriority,

    /// Sequential lane, if any
    pub lane: Option<String>,

    /// Maximum time the job may spend working
    #[serde(serialize_with = "serialize_secs")]
    pub timeout: Option<Duration>,

    /// Whether a failure is considered handled by the caller
    pub suppress_errors: bool,

    /// Skip this job if the previous member of its lane failed
    pub skip_on_lane_error: bool,

    /// Current lifecycle status
    pub status: JobStatus,

    /// Engine-wide admission order, set when the job leaves the waiting stage
    pub dispatch_seq: Option<u64>,

    /// When the job was submitted
    pub submitted_at: Option<DateTime<Utc>>,

    /// When the job's worker was launched
    pub started_at: Option<DateTime<Utc>>,

    /// When the job reached a terminal state
    pub ended_at: Option<DateTime<Utc>>,

    /// Return value of the callable
    pub output: Option<Value>,

    /// Exit code, see [`exitcode`]
    pub exitcode: Option<i32>,

    /// Captured failure message
    pub error: Option<String>,

    /// `ended_at - started_at`
    #[serde(serialize_with = "serialize_secs")]
    pub runtime: Option<Duration>,
}

impl JobRecord {
    /// Create a waiting record for a submitted job
    pub fn new(id: JobId, job: Job) -> Self {
        Self {
            id,
            name: job.name,
            callable: job.callable,
            args: job.args,
            kwargs: job.kwargs,
            priority: job.priority,
            lane: job.lane,
            timeout: job.timeout,
            suppress_errors: job.suppress_errors,
            skip_on_lane_error: job.skip_on_lane_error,
            status: JobStatus::Waiting,
            dispatch_seq: None,
            submitted_at: Some(Utc::now()),
            started_at: None,
            ended_at: None,
            output: None,
            exitcode: None,
            error: None,
            runtime: None,
        }
    }

    /// Label used in logs and metrics
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or_else(|| self.callable.label())
    }

    /// Move to `next`, rejecting backward or skipping transitions
    pub fn advance(&mut self, next: JobStatus) -> QueueResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(QueueError::InvalidTransition {
                id: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Waiting -> Working; sets `started_at`
    pub fn start(&mut self, dispatch_seq: u64) -> QueueResult<()> {
        self.advance(JobStatus::Working)?;
        self.dispatch_seq = Some(dispatch_seq);
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Working -> Completed with the worker's outcome
    pub fn finish(&mut self, outcome: WorkerOutcome) -> QueueResult<()> {
        self.advance(JobStatus::Completed)?;
        self.output = outcome.output;
        self.exitcode = Some(outcome.exitcode);
        self.error = outcome.error;
        self.set_ended(outcome.ended_at);
        Ok(())
    }

    /// Working -> Completed after the worker was terminated for overrunning
    pub fn time_out(&mut self) -> QueueResult<()> {
        let timeout = self.timeout.unwrap_or_default();
        self.finish(WorkerOutcome {
            output: None,
            exitcode: exitcode::TIMEOUT,
            error: Some(format!("timed out after {:?}", timeout)),
            ended_at: Utc::now(),
        })
    }

    /// Waiting -> Skipped; the job never reaches a worker
    pub fn skip(&mut self, dispatch_seq: u64) -> QueueResult<()> {
        self.advance(JobStatus::Skipped)?;
        let now = Utc::now();
        self.dispatch_seq = Some(dispatch_seq);
        self.output = None;
        self.exitcode = Some(exitcode::SKIPPED);
        self.error = Some("skipped: previous job in lane failed".to_string());
        self.ended_at = Some(now);
        Ok(())
    }

    fn set_ended(&mut self, ended_at: DateTime<Utc>) {
        // Clamp so that started_at <= ended_at always holds.
        let ended_at = match self.started_at {
            Some(started) if ended_at < started => started,
            _ => ended_at,
        };
        self.ended_at = Some(ended_at);
        self.runtime = self
            .started_at
            .and_then(|started| (ended_at - started).to_std().ok());
    }

    /// Check if the job is in a terminal state
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Check if the job ended with a non-zero exit code
    pub fn is_failed(&self) -> bool {
        matches!(self.exitcode, Some(code) if code != exitcode::SUCCESS)
    }

    /// Check if the job was terminated for exceeding its timeout
    pub fn is_timed_out(&self) -> bool {
        self.exitcode == Some(exitcode::TIMEOUT)
    }

    /// Check if the job was skipped
    pub fn is_skipped(&self) -> bool {
        self.status == JobStatus::Skipped
    }

    /// Surface an unsuppressed failure as an error.
    ///
    /// The engine itself never throws job failures; callers that submitted
    /// with `suppress_errors = false` use this to opt into propagation.
    pub fn check(&self) -> QueueResult<&Self> {
        if self.is_failed() && !self.suppress_errors {
            return Err(QueueError::JobFailed {
                id: self.id,
                exitcode: self.exitcode.unwrap_or(exitcode::FAILED),
                error: self.error.clone().unwrap_or_default(),
            });
        }
        Ok(self)
    }

    /// Flat mapping consumed by export and visualization tooling
    pub fn to_row(&self) -> Map<String, Value> {
        let mut row = Map::new();
        row.insert("id".to_string(), json!(self.id.as_u64()));
        row.insert("priority".to_string(), json!(self.priority.value()));
        row.insert("lane".to_string(), json!(self.lane));
        row.insert("submitted_at".to_string(), json!(self.submitted_at.map(|t| t.to_rfc3339())));
        row.insert("started_at".to_string(), json!(self.started_at.map(|t| t.to_rfc3339())));
        row.insert("ended_at".to_string(), json!(self.ended_at.map(|t| t.to_rfc3339())));
        row.insert("runtime".to_string(), json!(self.runtime.map(|d| d.as_secs_f64())));
        row.insert("exitcode".to_string(), json!(self.exitcode));
        row.insert("output".to_string(), self.output.clone().unwrap_or(Value::Null));
        row.insert("error".to_string(), json!(self.error));
        row
    }
}

fn serialize_secs<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(duration) => serializer.serialize_some(&duration.as_secs_f64()),
        None => serializer.serialize_none(),
    }
}
