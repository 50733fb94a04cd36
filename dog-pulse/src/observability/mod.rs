//! Events, metrics and progress reporting.
//!
//! Every job transition is published as a [`JobEvent`](crate::JobEvent) on a
//! broadcast channel and counted in [`LiveMetrics`]. Logging goes through
//! `tracing`; enable the `tracing-basic` feature for a ready-made subscriber.

pub mod analytics;
pub mod metrics;
pub mod progress;

#[cfg(feature = "tracing-basic")]
pub mod subscriber;

pub use analytics::ObservabilityLayer;
pub use metrics::{GlobalMetrics, JobNameMetrics, LiveMetrics, MetricsSnapshot, PerformanceMetrics};
pub use progress::ProgressReporter;

#[cfg(feature = "tracing-basic")]
pub use subscriber::{init_tracing, LogFormat};
