use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Runtime samples kept per job name
const MAX_SAMPLES: usize = 1000;

/// Live counters for engine activity
#[derive(Debug, Default)]
pub struct LiveMetrics {
    jobs_submitted: AtomicU64,
    jobs_started: AtomicU64,
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    jobs_timed_out: AtomicU64,
    jobs_skipped: AtomicU64,
    jobs_discarded: AtomicU64,
    spawn_retries: AtomicU64,

    // Per-job-name metrics
    by_name: Mutex<HashMap<String, JobNameMetrics>>,

    performance: Mutex<PerformanceMetrics>,
}

impl LiveMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_jobs_submitted(&self, name: &str) {
        self.jobs_submitted.fetch_add(1, Ordering::Relaxed);
        self.by_name.lock().entry(name.to_string()).or_default().submitted += 1;
    }

    pub fn increment_jobs_started(&self) {
        self.jobs_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_jobs_completed(&self, name: &str) {
        self.jobs_completed.fetch_add(1, Ordering::Relaxed);
        self.by_name.lock().entry(name.to_string()).or_default().completed += 1;
    }

    pub fn increment_jobs_failed(&self, name: &str) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
        self.by_name.lock().entry(name.to_string()).or_default().failed += 1;
    }

    pub fn increment_jobs_timed_out(&self, name: &str) {
        self.jobs_timed_out.fetch_add(1, Ordering::Relaxed);
        self.by_name.lock().entry(name.to_string()).or_default().timed_out += 1;
    }

    pub fn increment_jobs_skipped(&self, name: &str) {
        self.jobs_skipped.fetch_add(1, Ordering::Relaxed);
        self.by_name.lock().entry(name.to_string()).or_default().skipped += 1;
    }

    pub fn increment_jobs_discarded(&self) {
        self.jobs_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_spawn_retries(&self) {
        self.spawn_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn jobs_submitted(&self) -> u64 {
        self.jobs_submitted.load(Ordering::Relaxed)
    }

    pub fn jobs_started(&self) -> u64 {
        self.jobs_started.load(Ordering::Relaxed)
    }

    pub fn jobs_completed(&self) -> u64 {
        self.jobs_completed.load(Ordering::Relaxed)
    }

    pub fn jobs_failed(&self) -> u64 {
        self.jobs_failed.load(Ordering::Relaxed)
    }

    pub fn jobs_timed_out(&self) -> u64 {
        self.jobs_timed_out.load(Ordering::Relaxed)
    }

    pub fn jobs_skipped(&self) -> u64 {
        self.jobs_skipped.load(Ordering::Relaxed)
    }

    pub fn jobs_discarded(&self) -> u64 {
        self.jobs_discarded.load(Ordering::Relaxed)
    }

    pub fn spawn_retries(&self) -> u64 {
        self.spawn_retries.load(Ordering::Relaxed)
    }

    /// Metrics for one job name
    pub fn job_name_metrics(&self, name: &str) -> Option<JobNameMetrics> {
        self.by_name.lock().get(name).cloned()
    }

    /// Record how long a job spent working
    pub fn record_runtime(&self, name: &str, runtime: Duration) {
        self.performance.lock().record_runtime(name, runtime);
    }

    /// Average runtime of jobs with this name
    pub fn average_runtime(&self, name: &str) -> Option<Duration> {
        self.performance.lock().average_runtime(name)
    }

    /// Runtime at the given percentile (0-100) for jobs with this name
    pub fn percentile_runtime(&self, name: &str, percentile: f64) -> Option<Duration> {
        self.performance.lock().percentile_runtime(name, percentile)
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: Utc::now(),
            global: GlobalMetrics {
                jobs_submitted: self.jobs_submitted(),
                jobs_started: self.jobs_started(),
                jobs_completed: self.jobs_completed(),
                jobs_failed: self.jobs_failed(),
                jobs_timed_out: self.jobs_timed_out(),
                jobs_skipped: self.jobs_skipped(),
                jobs_discarded: self.jobs_discarded(),
            },
            by_name: self.by_name.lock().clone(),
        }
    }
}

/// Counters for jobs sharing a name
#[derive(Debug, Clone, Default)]
pub struct JobNameMetrics {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub skipped: u64,
}

impl JobNameMetrics {
    /// Percentage of finished jobs that succeeded
    pub fn success_rate(&self) -> f64 {
        let finished = self.completed + self.failed + self.timed_out;
        if finished == 0 {
            100.0
        } else {
            (self.completed as f64 / finished as f64) * 100.0
        }
    }
}

/// Rolling runtime samples per job name
#[derive(Debug, Clone, Default)]
pub struct PerformanceMetrics {
    runtimes: HashMap<String, VecDeque<Duration>>,
}

impl PerformanceMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_runtime(&mut self, name: &str, runtime: Duration) {
        let samples = self.runtimes.entry(name.to_string()).or_default();
        samples.push_back(runtime);
        if samples.len() > MAX_SAMPLES {
            samples.pop_front();
        }
    }

    pub fn average_runtime(&self, name: &str) -> Option<Duration> {
        let samples = self.runtimes.get(name).filter(|s| !s.is_empty())?;
        let total: Duration = samples.iter().sum();
        Some(total / samples.len() as u32)
    }

    pub fn percentile_runtime(&self, name: &str, percentile: f64) -> Option<Duration> {
        let samples = self.runtimes.get(name).filter(|s| !s.is_empty())?;
        let mut sorted: Vec<Duration> = samples.iter().copied().collect();
        sorted.sort();

        let percentile = percentile.clamp(0.0, 100.0);
        let index = ((percentile / 100.0) * (sorted.len() - 1) as f64).round() as usize;
        sorted.get(index).copied()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub global: GlobalMetrics,
    pub by_name: HashMap<String, JobNameMetrics>,
}

/// Engine-wide counters
#[derive(Debug, Clone)]
pub struct GlobalMetrics {
    pub jobs_submitted: u64,
    pub jobs_started: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub jobs_timed_out: u64,
    pub jobs_skipped: u64,
    pub jobs_discarded: u64,
}

impl GlobalMetrics {
    /// Overall success rate of finished jobs
    pub fn success_rate(&self) -> f64 {
        let finished = self.jobs_completed + self.jobs_failed + self.jobs_timed_out;
        if finished == 0 {
            100.0
        } else {
            (self.jobs_completed as f64 / finished as f64) * 100.0
        }
    }

    /// Jobs submitted but not yet terminal
    pub fn jobs_in_progress(&self) -> u64 {
        self.jobs_submitted.saturating_sub(
            self.jobs_completed + self.jobs_failed + self.jobs_timed_out + self.jobs_skipped + self.jobs_discarded,
        )
    }
}
