//! Worker execution contexts.
//!
//! A [`WorkerExecutor`] launches one job in isolation and hands back a
//! [`WorkerHandle`] the scheduler polls without blocking.

pub mod executor;
pub mod process;
pub mod thread;

pub use executor::{executor_for, ExecutorKind, WorkerExecutor, WorkerHandle, WorkerOutcome, WorkerPoll};
pub use process::ProcessExecutor;
pub use thread::ThreadExecutor;
