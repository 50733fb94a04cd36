use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{JobId, JobPriority};

/// Stable event protocol for structured observability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JobEvent {
    /// Job entered the waiting stage
    Submitted {
        job_id: JobId,
        priority: JobPriority,
        lane: Option<String>,
        at: DateTime<Utc>,
    },

    /// Job was admitted to a working slot
    Started {
        job_id: JobId,
        at: DateTime<Utc>,
    },

    /// Job finished with exit code 0
    Completed {
        job_id: JobId,
        at: DateTime<Utc>,
    },

    /// Job finished with a non-zero exit code
    Failed {
        job_id: JobId,
        exitcode: i32,
        error: String,
        at: DateTime<Utc>,
    },

    /// Job was terminated for exceeding its timeout
    TimedOut {
        job_id: JobId,
        at: DateTime<Utc>,
    },

    /// Job was skipped because its lane predecessor failed
    Skipped {
        job_id: JobId,
        lane: Option<String>,
        at: DateTime<Utc>,
    },

    /// Job was dropped from the waiting stage on dispose
    Discarded {
        job_id: JobId,
        at: DateTime<Utc>,
    },
}

impl JobEvent {
    /// Get event type name as string
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Submitted { .. } => "submitted",
            Self::Started { .. } => "started",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
            Self::TimedOut { .. } => "timed_out",
            Self::Skipped { .. } => "skipped",
            Self::Discarded { .. } => "discarded",
        }
    }

    /// Get the job ID from any event
    pub fn job_id(&self) -> JobId {
        match self {
            Self::Submitted { job_id, .. }
            | Self::Started { job_id, .. }
            | Self::Completed { job_id, .. }
            | Self::Failed { job_id, .. }
            | Self::TimedOut { job_id, .. }
            | Self::Skipped { job_id, .. }
            | Self::Discarded { job_id, .. } => *job_id,
        }
    }

    /// Get the timestamp from any event
    pub fn timestamp(&self) -> &DateTime<Utc> {
        match self {
            Self::Submitted { at, .. }
            | Self::Started { at, .. }
            | Self::Completed { at, .. }
            | Self::Failed { at, .. }
            | Self::TimedOut { at, .. }
            | Self::Skipped { at, .. }
            | Self::Discarded { at, .. } => at,
        }
    }
}
