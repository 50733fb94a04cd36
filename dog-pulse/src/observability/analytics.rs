use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::debug;

use crate::{JobEvent, JobRecord};

use super::LiveMetrics;

/// Buffered events per subscriber before the slowest one starts lagging
const EVENT_CAPACITY: usize = 10_000;

/// Event broadcaster and live metrics shared by the engine and its pulse
#[derive(Debug, Clone)]
pub struct ObservabilityLayer {
    event_broadcaster: broadcast::Sender<JobEvent>,
    metrics: Arc<LiveMetrics>,
}

impl ObservabilityLayer {
    pub fn new() -> Self {
        let (event_broadcaster, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            event_broadcaster,
            metrics: Arc::new(LiveMetrics::new()),
        }
    }

    fn publish(&self, event: JobEvent) {
        // No subscribers is not an error
        let _ = self.event_broadcaster.send(event);
    }

    pub fn record_job_submitted(&self, record: &JobRecord) {
        self.metrics.increment_jobs_submitted(record.label());
        self.publish(JobEvent::Submitted {
            job_id: record.id,
            priority: record.priority,
            lane: record.lane.clone(),
            at: Utc::now(),
        });
        debug!(job_id = %record.id, name = record.label(), "Recorded job submitted");
    }

    pub fn record_job_started(&self, record: &JobRecord) {
        self.metrics.increment_jobs_started();
        self.publish(JobEvent::Started {
            job_id: record.id,
            at: Utc::now(),
        });
    }

    /// Record a job that left a working slot, successfully or not
    pub fn record_job_finished(&self, record: &JobRecord) {
        let at = record.ended_at.unwrap_or_else(Utc::now);
        let name = record.label();

        // Metrics are updated before the event becomes visible
        if let Some(runtime) = record.runtime {
            self.metrics.record_runtime(name, runtime);
        }

        let event = if record.is_timed_out() {
            self.metrics.increment_jobs_timed_out(name);
            JobEvent::TimedOut { job_id: record.id, at }
        } else if record.is_failed() {
            self.metrics.increment_jobs_failed(name);
            JobEvent::Failed {
                job_id: record.id,
                exitcode: record.exitcode.unwrap_or_default(),
                error: record.error.clone().unwrap_or_default(),
                at,
            }
        } else {
            self.metrics.increment_jobs_completed(name);
            JobEvent::Completed { job_id: record.id, at }
        };
        self.publish(event);
    }

    pub fn record_job_skipped(&self, record: &JobRecord) {
        self.metrics.increment_jobs_skipped(record.label());
        self.publish(JobEvent::Skipped {
            job_id: record.id,
            lane: record.lane.clone(),
            at: Utc::now(),
        });
    }

    pub fn record_job_discarded(&self, record: &JobRecord) {
        self.metrics.increment_jobs_discarded();
        self.publish(JobEvent::Discarded {
            job_id: record.id,
            at: Utc::now(),
        });
    }

    pub fn record_spawn_retry(&self) {
        self.metrics.increment_spawn_retries();
    }

    /// Subscribe to events published from now on
    pub fn event_stream(&self) -> BroadcastStream<JobEvent> {
        BroadcastStream::new(self.event_broadcaster.subscribe())
    }

    /// Raw receiver for callers that prefer `recv().await`
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.event_broadcaster.subscribe()
    }

    pub fn metrics(&self) -> &LiveMetrics {
        &self.metrics
    }

    pub fn metrics_handle(&self) -> Arc<LiveMetrics> {
        self.metrics.clone()
    }
}

impl Default for ObservabilityLayer {
    fn default() -> Self {
        Self::new()
    }
}
