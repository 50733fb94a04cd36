//! Job submission types.
//!
//! A [`Job`] is the immutable submission data; the engine turns it into a
//! [`JobRecord`](crate::JobRecord) when it is accepted.

pub mod callable;

pub use callable::{Callable, JobContext, JobFn};

use std::time::Duration;

use serde_json::{Map, Value};

use crate::JobPriority;

/// Job submission - the work plus its scheduling options
#[derive(Debug, Clone)]
pub struct Job {
    /// What to run
    pub callable: Callable,

    /// Positional arguments
    pub args: Vec<Value>,

    /// Keyword arguments
    pub kwargs: Map<String, Value>,

    /// Optional label for logs and metrics
    pub name: Option<String>,

    /// Dispatch priority (higher first)
    pub priority: JobPriority,

    /// Jobs sharing a lane run one at a time in submission order
    pub lane: Option<String>,

    /// Maximum working time before the worker is terminated
    pub timeout: Option<Duration>,

    /// Whether a failure is considered handled (advisory)
    pub suppress_errors: bool,

    /// Skip this job if the previous member of its lane failed
    pub skip_on_lane_error: bool,
}

impl Job {
    /// Create a new job with default options
    pub fn new(callable: Callable) -> Self {
        Self {
            callable,
            args: Vec::new(),
            kwargs: Map::new(),
            name: None,
            priority: JobPriority::default(),
            lane: None,
            timeout: None,
            suppress_errors: true,
            skip_on_lane_error: false,
        }
    }

    /// Replace the positional arguments
    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    /// Append one positional argument
    pub fn with_arg(mut self, arg: impl Into<Value>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Set a keyword argument
    pub fn with_kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }

    /// Set the job label
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the job priority
    pub fn with_priority(mut self, priority: impl Into<JobPriority>) -> Self {
        self.priority = priority.into();
        self
    }

    /// Put the job in a sequential lane
    pub fn with_lane(mut self, lane: impl Into<String>) -> Self {
        self.lane = Some(lane.into());
        self
    }

    /// Set the working timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set whether failures are suppressed
    pub fn with_suppress_errors(mut self, suppress: bool) -> Self {
        self.suppress_errors = suppress;
        self
    }

    /// Set whether to skip when the lane predecessor failed
    pub fn with_skip_on_lane_error(mut self, skip: bool) -> Self {
        self.skip_on_lane_error = skip;
        self
    }
}
