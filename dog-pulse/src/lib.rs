//! # dog-pulse: In-Process Parallel Job Engine
//!
//! **Priority-ordered, lane-aware job scheduling over isolated workers**
//!
//! Submit units of work with a priority, an optional lane and a timeout;
//! the engine runs up to `n_workers` of them at once on dedicated threads or
//! child processes and hands back a record of each outcome.
//!
//! ## Features
//!
//! - **Priority ordering**: higher priority dispatches first, ties in submission order
//! - **Lanes**: jobs sharing a lane run one at a time in submission order, and may
//!   be skipped when their predecessor failed
//! - **Isolation**: a panicking function or crashing program only fails its own record
//! - **Timeouts**: overrunning workers are terminated within one scheduler tick
//! - **Observability**: lifecycle events over a broadcast stream, live metrics, `tracing` logs
//!
//! ## Quick Start
//!
//! ```no_run
//! use dog_pulse::prelude::*;
//! use serde_json::{json, Value};
//!
//! # async fn demo() -> QueueResult<()> {
//! let engine = Engine::new(EngineConfig::default().with_workers(4))?;
//!
//! let square = Callable::func("square", |ctx| {
//!     let n = ctx.arg(0).and_then(Value::as_i64).unwrap_or(0);
//!     Ok(json!(n * n))
//! });
//!
//! engine.submit(Job::new(square.clone()).with_arg(7).with_priority(JobPriority::HIGH))?;
//! engine.submit(Job::new(square).with_arg(3).with_lane("ingest"))?;
//!
//! engine.wait(WaitOptions::default()).await?;
//! for record in engine.collect()? {
//!     println!("{} -> {:?} (exit {:?})", record.id, record.output, record.exitcode);
//! }
//!
//! engine.dispose()?;
//! # Ok(())
//! # }
//! ```
//!
//! Failures never surface as errors from `wait`, `get`, `collect` or `map`:
//! consult [`JobRecord::exitcode`] and [`JobRecord::error`], or call
//! [`JobRecord::check`].

pub mod config;
pub mod engine;
pub mod error;
pub mod execution;
pub mod job;
pub mod map;
pub mod observability;
pub mod queue;
pub mod scheduler;
pub mod types;

// Core API exports
pub use config::EngineConfig;
pub use engine::{Engine, WaitOptions};
pub use error::{JobError, QueueError, QueueResult};
pub use execution::{ExecutorKind, ProcessExecutor, ThreadExecutor, WorkerExecutor};
pub use job::{Callable, Job, JobContext};
pub use map::{MapBuilder, MapOptions};
pub use queue::Stage;
pub use scheduler::TickStats;
pub use types::{exitcode, EngineId, JobEvent, JobId, JobPriority, JobRecord, JobStatus};

// Observability exports
pub use observability::{LiveMetrics, ObservabilityLayer};

#[cfg(feature = "tracing-basic")]
pub use observability::{init_tracing, LogFormat};

/// Everything needed to submit work and read results
pub mod prelude {
    pub use crate::{
        exitcode, Callable, Engine, EngineConfig, Job, JobContext, JobError, JobId, JobPriority, JobRecord,
        JobStatus, MapOptions, QueueError, QueueResult, Stage, WaitOptions,
    };

    pub use crate::JobEvent;
}
