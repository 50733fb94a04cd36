//! The pulse: the background task that moves jobs between stages.
//!
//! Each tick reaps finished or overrunning workers, then admits waiting jobs
//! into free slots. A tick runs entirely under the stage lock and never waits
//! on a worker.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    config::EngineConfig,
    execution::{WorkerExecutor, WorkerHandle, WorkerOutcome, WorkerPoll},
    observability::ObservabilityLayer,
    queue::{Stages, WorkingSlot},
    EngineId, JobRecord, QueueError, QueueResult,
};

/// State shared between the engine facade and its pulse
#[derive(Debug)]
pub(crate) struct Shared {
    pub id: EngineId,
    pub config: EngineConfig,
    pub stages: Mutex<Stages>,
    pub executor: Arc<dyn WorkerExecutor>,
    pub observability: ObservabilityLayer,
    /// Wakes the pulse ahead of its next tick
    pub wake: Notify,
    pub shutdown: CancellationToken,
    pub disposed: AtomicBool,
    pub next_id: AtomicU64,
    pub next_dispatch: AtomicU64,
}

impl Shared {
    pub fn new(config: EngineConfig, executor: Arc<dyn WorkerExecutor>) -> Self {
        Self {
            id: EngineId::new(),
            stages: Mutex::new(Stages::new(config.n_workers)),
            config,
            executor,
            observability: ObservabilityLayer::new(),
            wake: Notify::new(),
            shutdown: CancellationToken::new(),
            disposed: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            next_dispatch: AtomicU64::new(1),
        }
    }

    fn dispatch_seq(&self) -> u64 {
        self.next_dispatch.fetch_add(1, Ordering::Relaxed)
    }
}

/// What one tick did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickStats {
    /// Jobs moved from working to completed
    pub reaped: usize,
    /// Of those, jobs terminated for overrunning
    pub timed_out: usize,
    /// Jobs launched into working slots
    pub admitted: usize,
    /// Jobs moved straight from waiting to completed as skipped
    pub skipped: usize,
    /// Jobs failed because no worker could be launched
    pub spawn_failed: usize,
}

/// Scheduler loop driving one engine
pub(crate) struct Pulse {
    shared: Arc<Shared>,
}

impl Pulse {
    pub fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Tick until shutdown is requested
    pub async fn run(self) {
        let mut ticker = interval(self.shared.config.poll);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            engine_id = %self.shared.id,
            n_workers = self.shared.config.n_workers,
            executor = %self.shared.executor.kind(),
            "Pulse started with interval: {:?}",
            self.shared.config.poll
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shared.shutdown.cancelled() => {
                    break;
                }

                _ = self.shared.wake.notified() => {}

                _ = ticker.tick() => {}
            }

            if self.shared.shutdown.is_cancelled() {
                break;
            }

            let stats = self.tick();
            if stats != TickStats::default() {
                debug!(engine_id = %self.shared.id, ?stats, "Pulse tick");
            }
        }

        info!(engine_id = %self.shared.id, "Pulse stopped");
    }

    /// Run one reap-then-admit cycle
    pub fn tick(&self) -> TickStats {
        let mut stats = TickStats::default();
        let mut stages = self.shared.stages.lock();

        self.reap(&mut stages, &mut stats);
        self.admit(&mut stages, &mut stats);

        stats
    }

    fn reap(&self, stages: &mut Stages, stats: &mut TickStats) {
        let finished: Vec<(usize, WorkerPoll)> = stages
            .working
            .iter_mut()
            .filter_map(|(index, slot)| match slot.handle.poll() {
                WorkerPoll::Running => None,
                done => Some((index, done)),
            })
            .collect();

        for (index, poll) in finished {
            let Some(WorkingSlot { mut record, handle }) = stages.working.release(index) else {
                continue;
            };

            let result = match poll {
                WorkerPoll::Finished(outcome) => record.finish(outcome),
                WorkerPoll::TimedOut => {
                    handle.terminate();
                    warn!(
                        job_id = %record.id,
                        elapsed = ?handle.elapsed(),
                        "Job exceeded its timeout of {:?}; terminating worker",
                        record.timeout.unwrap_or_default()
                    );
                    stats.timed_out += 1;
                    record.time_out()
                }
                WorkerPoll::Running => Ok(()),
            };
            if let Err(e) = result {
                error!(job_id = %record.id, error = %e, "Could not record job outcome");
            }

            debug!(
                job_id = %record.id,
                exitcode = ?record.exitcode,
                runtime = ?record.runtime,
                "Job finished"
            );
            self.shared.observability.record_job_finished(&record);
            stages.complete(record);
            stats.reaped += 1;
        }
    }

    fn admit(&self, stages: &mut Stages, stats: &mut TickStats) {
        // Terminated threads that have not returned yet still take up capacity
        while stages.working.free() > self.shared.executor.lingering() {
            let Some(mut record) = stages.next_dispatchable() else {
                break;
            };
            let seq = self.shared.dispatch_seq();

            if stages.lanes.should_skip(&record) {
                if let Err(e) = record.skip(seq) {
                    error!(job_id = %record.id, error = %e, "Could not skip job");
                }
                debug!(job_id = %record.id, lane = ?record.lane, "Skipping job after lane failure");
                self.shared.observability.record_job_skipped(&record);
                stages.complete(record);
                stats.skipped += 1;
                continue;
            }

            if let Err(e) = record.start(seq) {
                error!(job_id = %record.id, error = %e, "Could not start job");
                stages.complete(record);
                continue;
            }

            match self.launch(&record) {
                Ok(handle) => {
                    stages.lanes.dispatch(&record);
                    debug!(job_id = %record.id, dispatch_seq = seq, priority = %record.priority, "Job started");
                    self.shared.observability.record_job_started(&record);

                    if let Err(slot) = stages.working.occupy(WorkingSlot { record, handle }) {
                        // Unreachable while free() > 0 holds under the lock
                        error!(job_id = %slot.record.id, "No free working slot");
                        self.fail(stages, slot.record, "no free working slot".to_string());
                        continue;
                    }
                    stats.admitted += 1;
                }
                Err(e) => {
                    error!(job_id = %record.id, error = %e, "Giving up on launching worker");
                    self.fail(stages, record, e.to_string());
                    stats.spawn_failed += 1;
                }
            }
        }
    }

    /// Start a worker, retrying launch failures
    fn launch(&self, record: &JobRecord) -> QueueResult<WorkerHandle> {
        let attempts = self.shared.config.spawn_attempts.max(1);
        let mut last_error = QueueError::Spawn("no launch attempted".to_string());

        for attempt in 1..=attempts {
            match self.shared.executor.start(record) {
                Ok(handle) => return Ok(handle),
                // Not transient
                Err(e @ QueueError::UnsupportedCallable { .. }) | Err(e @ QueueError::NoRuntime) => return Err(e),
                Err(e) => {
                    warn!(job_id = %record.id, attempt, attempts, error = %e, "Worker launch failed");
                    if attempt < attempts {
                        self.shared.observability.record_spawn_retry();
                    }
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }

    fn fail(&self, stages: &mut Stages, mut record: JobRecord, error: String) {
        if let Err(e) = record.finish(WorkerOutcome::failed(error)) {
            error!(job_id = %record.id, error = %e, "Could not record job failure");
        }
        self.shared.observability.record_job_finished(&record);
        stages.complete(record);
    }
}
