use std::time::{Duration, Instant};

use tracing::info;

/// Minimum spacing between two progress lines
const REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Throttled progress lines for long waits.
///
/// Rendering bars is left to subscribers of the `dog_pulse::progress`
/// tracing target; this only reports counts.
#[derive(Debug)]
pub struct ProgressReporter {
    enabled: bool,
    total: usize,
    last_done: Option<usize>,
    last_report: Option<Instant>,
    interval: Duration,
}

impl ProgressReporter {
    pub fn new(enabled: bool, total: usize) -> Self {
        Self {
            enabled,
            total,
            last_done: None,
            last_report: None,
            interval: REPORT_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Report `remaining` outstanding jobs; returns whether a line was emitted
    pub fn update(&mut self, remaining: usize) -> bool {
        if !self.enabled {
            return false;
        }

        // Work submitted mid-wait grows the total
        self.total = self.total.max(remaining);
        let done = self.total - remaining;

        let due = self.last_report.map_or(true, |at| at.elapsed() >= self.interval);
        let finished = remaining == 0;
        if self.last_done == Some(done) || !(due || finished) {
            return false;
        }

        info!(target: "dog_pulse::progress", done, total = self.total, remaining, "Progress");
        self.last_done = Some(done);
        self.last_report = Some(Instant::now());
        true
    }

    pub fn total(&self) -> usize {
        self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    fn test_disabled_reporter_is_silent() {
        let mut progress = ProgressReporter::new(false, 10);
        assert!(!progress.update(5));
        assert!(!progress.update(0));
    }

    #[test]
    fn test_throttles_between_reports() {
        let mut progress = ProgressReporter::new(true, 10).with_interval(Duration::from_secs(3600));
        assert!(progress.update(10));
        assert!(!progress.update(8));

        // Completion is always reported
        assert!(progress.update(0));
        assert!(!progress.update(0));
    }

    #[test]
    fn test_total_grows_with_late_submissions() {
        let mut progress = ProgressReporter::new(true, 2).with_interval(Duration::ZERO);
        progress.update(5);
        assert_eq!(progress.total(), 5);
    }

    #[traced_test]
    #[test]
    fn test_emits_progress_line() {
        let mut progress = ProgressReporter::new(true, 4).with_interval(Duration::ZERO);
        progress.update(1);
        assert!(logs_contain("Progress"));
        assert!(logs_contain("done=3"));
    }
}
