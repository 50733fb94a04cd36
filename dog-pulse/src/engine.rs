use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, instrument, warn};

use crate::{
    config::EngineConfig,
    execution::{executor_for, ExecutorKind, WorkerExecutor},
    job::Callable,
    map::{MapBuilder, MapOptions},
    observability::{LiveMetrics, ProgressReporter},
    queue::{Stage, Stages},
    scheduler::{Pulse, Shared},
    EngineId, Job, JobEvent, JobId, JobRecord, QueueError, QueueResult,
};

/// Options for blocking waits
#[derive(Debug, Clone, Default)]
pub struct WaitOptions {
    /// Give up after this long; `None` waits indefinitely
    pub timeout: Option<Duration>,
    /// Polling interval; defaults to the engine's tick interval
    pub poll: Option<Duration>,
    /// Log throttled progress lines while waiting
    pub show_progress: bool,
}

impl WaitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_poll(mut self, poll: Duration) -> Self {
        self.poll = Some(poll);
        self
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }
}

/// Parallel job engine.
///
/// Jobs are submitted into a priority-ordered waiting stage, run by up to
/// `n_workers` isolated workers, and collected from a priority-ordered
/// completed stage. A background pulse task moves them between stages.
///
/// Dropping the engine disposes it.
pub struct Engine {
    shared: Arc<Shared>,
    pulse: Mutex<Option<JoinHandle<()>>>,
    runtime: Handle,
}

impl Engine {
    /// Create an engine on the current tokio runtime.
    ///
    /// Starts the pulse immediately when `config.auto_start` is set.
    pub fn new(config: EngineConfig) -> QueueResult<Self> {
        let executor = executor_for(&config);
        Self::with_executor(config, executor)
    }

    /// Create an engine around a custom executor
    pub fn with_executor(config: EngineConfig, executor: Arc<dyn WorkerExecutor>) -> QueueResult<Self> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| QueueError::NoRuntime)?;

        let auto_start = config.auto_start;
        let engine = Self {
            shared: Arc::new(Shared::new(config, executor)),
            pulse: Mutex::new(None),
            runtime,
        };

        info!(
            engine_id = %engine.shared.id,
            n_workers = engine.shared.config.n_workers,
            executor = %engine.shared.executor.kind(),
            "Created engine"
        );

        if auto_start {
            engine.start()?;
        }
        Ok(engine)
    }

    /// Run `body` against a started engine, disposing it on every exit path.
    ///
    /// Disposal also runs if the returned future is dropped early or `body`
    /// panics. A body error takes precedence over a disposal error.
    pub async fn scoped<F, Fut, T>(config: EngineConfig, body: F) -> QueueResult<T>
    where
        F: FnOnce(Arc<Engine>) -> Fut,
        Fut: Future<Output = QueueResult<T>>,
    {
        let engine = Arc::new(Engine::new(config.with_auto_start(false))?);
        let mut guard = DisposeGuard(Some(engine.clone()));
        engine.start()?;

        let result = body(engine).await;
        let disposed = guard.dispose();

        let value = result?;
        disposed?;
        Ok(value)
    }

    /// Start the pulse; a no-op when it is already running
    pub fn start(&self) -> QueueResult<()> {
        self.ensure_open()?;

        let mut pulse = self.pulse.lock();
        if pulse.is_none() {
            let task = Pulse::new(self.shared.clone());
            *pulse = Some(self.runtime.spawn(task.run()));
            debug!(engine_id = %self.shared.id, "Spawned pulse task");
        }
        Ok(())
    }

    /// Submit a job; never blocks.
    ///
    /// Fails when the engine is disposed, the callable does not match the
    /// worker mode, or the waiting stage is at `max_size`.
    #[instrument(skip(self, job), fields(engine_id = %self.shared.id, callable = %job.callable))]
    pub fn submit(&self, job: Job) -> QueueResult<JobId> {
        self.ensure_live()?;
        self.ensure_supported(&job)?;

        let id = {
            let mut stages = self.shared.stages.lock();
            self.ensure_capacity(&stages, 1)?;
            self.enqueue(&mut stages, job)
        };

        self.shared.wake.notify_one();
        Ok(id)
    }

    /// Submit a callable with positional arguments and default options
    pub fn put(&self, callable: Callable, args: Vec<Value>) -> QueueResult<JobId> {
        self.submit(Job::new(callable).with_args(args))
    }

    /// Count jobs in the given stages; an empty slice counts all of them
    pub fn size(&self, stages: &[Stage]) -> QueueResult<usize> {
        self.ensure_open()?;
        Ok(self.shared.stages.lock().size(stages))
    }

    /// Whether any job is waiting or working
    pub fn is_busy(&self) -> QueueResult<bool> {
        Ok(self.size(&[Stage::Waiting, Stage::Working])? > 0)
    }

    /// Whether any job has not been retrieved yet
    pub fn has_work(&self) -> QueueResult<bool> {
        Ok(self.size(&[])? > 0)
    }

    /// Block until nothing is waiting or working, or the timeout elapses.
    ///
    /// Returns the number of jobs still outstanding; `0` means everything
    /// finished.
    pub async fn wait(&self, options: WaitOptions) -> QueueResult<usize> {
        let poll = options.poll.unwrap_or(self.shared.config.poll);
        let deadline = options.timeout.map(|timeout| Instant::now() + timeout);
        let mut progress = ProgressReporter::new(options.show_progress, self.size(&[Stage::Waiting, Stage::Working])?);

        loop {
            self.ensure_live()?;
            let remaining = self.size(&[Stage::Waiting, Stage::Working])?;
            progress.update(remaining);

            if remaining == 0 {
                return Ok(0);
            }
            if !self.sleep_until_next_poll(poll, deadline).await {
                return Ok(remaining);
            }
        }
    }

    /// Pop the highest-priority completed record without waiting
    pub fn get(&self) -> QueueResult<Option<JobRecord>> {
        self.ensure_open()?;
        Ok(self.shared.stages.lock().completed.pop_highest())
    }

    /// Pop the highest-priority completed record, polling until one appears.
    ///
    /// Returns `None` if the timeout elapses first.
    pub async fn get_wait(&self, options: WaitOptions) -> QueueResult<Option<JobRecord>> {
        let poll = options.poll.unwrap_or(self.shared.config.poll);
        let deadline = options.timeout.map(|timeout| Instant::now() + timeout);

        loop {
            self.ensure_live()?;
            if let Some(record) = self.get()? {
                return Ok(Some(record));
            }
            if !self.sleep_until_next_poll(poll, deadline).await {
                return Ok(None);
            }
        }
    }

    /// Drain every completed record in priority order
    pub fn collect(&self) -> QueueResult<Vec<JobRecord>> {
        self.ensure_open()?;
        Ok(self.shared.stages.lock().completed.drain_all())
    }

    /// Run `callable` once per input and return the outputs in input order.
    ///
    /// Each input is passed as the single positional argument. A failed,
    /// timed-out or skipped job yields `None`.
    ///
    /// Fails without submitting anything when the batch does not fit under
    /// `max_size` or the pulse was never started.
    pub async fn map<I>(&self, callable: Callable, inputs: I, options: MapOptions) -> QueueResult<Vec<Option<Value>>>
    where
        I: IntoIterator<Item = Value>,
    {
        let records = self.map_records(callable, inputs, options).await?;
        Ok(records.into_iter().map(|record| record.output).collect())
    }

    /// Like [`map`](Self::map) but returns the full records in input order
    pub async fn map_records<I>(&self, callable: Callable, inputs: I, options: MapOptions) -> QueueResult<Vec<JobRecord>>
    where
        I: IntoIterator<Item = Value>,
    {
        let jobs = inputs
            .into_iter()
            .map(|input| options.job(callable.clone()).with_args(vec![input]))
            .collect();
        self.run_batch(jobs, options.show_progress).await
    }

    /// Like [`map`](Self::map) but each input is a full positional argument list
    pub async fn starmap<I>(&self, callable: Callable, inputs: I, options: MapOptions) -> QueueResult<Vec<Option<Value>>>
    where
        I: IntoIterator<Item = Vec<Value>>,
    {
        let jobs = inputs
            .into_iter()
            .map(|args| options.job(callable.clone()).with_args(args))
            .collect();
        let records = self.run_batch(jobs, options.show_progress).await?;
        Ok(records.into_iter().map(|record| record.output).collect())
    }

    /// Builder over [`map`](Self::map)
    pub fn mapper(&self, callable: Callable) -> MapBuilder<'_> {
        MapBuilder::new(self, callable)
    }

    /// Submit a batch, then wait for and claim exactly those records.
    ///
    /// The batch is admitted whole or not at all. Records of other
    /// submissions stay in the completed stage.
    async fn run_batch(&self, jobs: Vec<Job>, show_progress: bool) -> QueueResult<Vec<JobRecord>> {
        self.ensure_live()?;
        // Nothing would ever finish
        if self.pulse.lock().is_none() {
            return Err(QueueError::NotStarted);
        }
        let ids = self.submit_all(jobs)?;

        let mut pending: HashSet<JobId> = ids.iter().copied().collect();
        let mut claimed: HashMap<JobId, JobRecord> = HashMap::with_capacity(ids.len());
        let mut progress = ProgressReporter::new(show_progress, ids.len());

        loop {
            self.ensure_live()?;

            let records = self
                .shared
                .stages
                .lock()
                .completed
                .take_where(|record| pending.contains(&record.id));
            for record in records {
                pending.remove(&record.id);
                claimed.insert(record.id, record);
            }

            progress.update(pending.len());
            if pending.is_empty() {
                break;
            }
            tokio::time::sleep(self.shared.config.poll).await;
        }

        Ok(ids.iter().filter_map(|id| claimed.remove(id)).collect())
    }

    /// Stop the pulse, terminate every worker and discard waiting jobs.
    ///
    /// Idempotent. Returns [`QueueError::Faulted`] when the pulse had died on
    /// its own; cleanup still happens.
    #[instrument(skip(self), fields(engine_id = %self.shared.id))]
    pub fn dispose(&self) -> QueueResult<()> {
        if self.shared.disposed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let fault = self.pulse_fault();
        self.shared.shutdown.cancel();
        self.shared.wake.notify_one();
        // The pulse finishes its current tick and exits on its own
        drop(self.pulse.lock().take());

        let (terminated, discarded) = {
            let mut stages = self.shared.stages.lock();
            let slots = stages.working.drain();
            for slot in &slots {
                slot.handle.terminate();
                self.shared.observability.record_job_discarded(&slot.record);
            }
            let waiting = stages.discard_waiting();
            for record in &waiting {
                self.shared.observability.record_job_discarded(record);
            }
            (slots.len(), waiting.len())
        };

        info!(terminated, discarded, "Disposed engine");

        match fault {
            Some(reason) => {
                warn!(reason = %reason, "Engine was faulted before dispose");
                Err(QueueError::Faulted(reason))
            }
            None => Ok(()),
        }
    }

    /// Stream of job lifecycle events from now on
    pub fn events(&self) -> BroadcastStream<JobEvent> {
        self.shared.observability.event_stream()
    }

    /// Live counters
    pub fn metrics(&self) -> &LiveMetrics {
        self.shared.observability.metrics()
    }

    pub fn id(&self) -> &EngineId {
        &self.shared.id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    pub fn executor_kind(&self) -> ExecutorKind {
        self.shared.executor.kind()
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> QueueResult<()> {
        if self.is_disposed() {
            return Err(QueueError::Disposed);
        }
        Ok(())
    }

    fn ensure_live(&self) -> QueueResult<()> {
        self.ensure_open()?;
        match self.pulse_fault() {
            Some(reason) => Err(QueueError::Faulted(reason)),
            None => Ok(()),
        }
    }

    /// Submit every job or none of them
    fn submit_all(&self, jobs: Vec<Job>) -> QueueResult<Vec<JobId>> {
        self.ensure_live()?;
        for job in &jobs {
            self.ensure_supported(job)?;
        }

        let ids: Vec<JobId> = {
            let mut stages = self.shared.stages.lock();
            self.ensure_capacity(&stages, jobs.len())?;
            jobs.into_iter().map(|job| self.enqueue(&mut stages, job)).collect()
        };

        self.shared.wake.notify_one();
        Ok(ids)
    }

    fn ensure_supported(&self, job: &Job) -> QueueResult<()> {
        if !self.shared.executor.supports(&job.callable) {
            return Err(QueueError::UnsupportedCallable {
                executor: self.shared.executor.kind().name(),
                callable: job.callable.to_string(),
            });
        }
        Ok(())
    }

    fn ensure_capacity(&self, stages: &Stages, incoming: usize) -> QueueResult<()> {
        match self.shared.config.max_size {
            Some(max) if stages.waiting.len() + incoming > max => Err(QueueError::QueueFull { max }),
            _ => Ok(()),
        }
    }

    fn enqueue(&self, stages: &mut Stages, job: Job) -> JobId {
        let id = JobId(self.shared.next_id.fetch_add(1, Ordering::SeqCst));
        let record = JobRecord::new(id, job);
        self.shared.observability.record_job_submitted(&record);
        debug!(job_id = %id, priority = %record.priority, lane = ?record.lane, "Submitted job");
        stages.enqueue(record);
        id
    }

    /// Reason the pulse stopped, if it stopped without being asked to
    fn pulse_fault(&self) -> Option<String> {
        if self.shared.shutdown.is_cancelled() {
            return None;
        }
        self.pulse
            .lock()
            .as_ref()
            .filter(|handle| handle.is_finished())
            .map(|_| "pulse task exited unexpectedly".to_string())
    }

    /// Sleep one poll interval, capped at the deadline; false once it has passed
    async fn sleep_until_next_poll(&self, poll: Duration, deadline: Option<Instant>) -> bool {
        let wake_at = Instant::now() + poll;
        match deadline {
            Some(deadline) if Instant::now() >= deadline => false,
            Some(deadline) => {
                tokio::time::sleep_until(wake_at.min(deadline)).await;
                true
            }
            None => {
                tokio::time::sleep_until(wake_at).await;
                true
            }
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("id", &self.shared.id)
            .field("config", &self.shared.config)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(e) = self.dispose() {
            warn!(engine_id = %self.shared.id, error = %e, "Dispose on drop failed");
        }
    }
}

/// Disposes the engine when dropped unless disposal already ran
struct DisposeGuard(Option<Arc<Engine>>);

impl DisposeGuard {
    fn dispose(&mut self) -> QueueResult<()> {
        match self.0.take() {
            Some(engine) => engine.dispose(),
            None => Ok(()),
        }
    }
}

impl Drop for DisposeGuard {
    fn drop(&mut self) {
        if let Err(e) = self.dispose() {
            warn!(error = %e, "Scoped engine dispose failed");
        }
    }
}
