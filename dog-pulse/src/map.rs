use std::time::Duration;

use serde_json::Value;

use crate::{job::Callable, Engine, Job, JobPriority, JobRecord, QueueResult};

/// Per-job options shared by every job of a map call
#[derive(Debug, Clone, Default)]
pub struct MapOptions {
    pub name: Option<String>,
    pub priority: JobPriority,
    pub lane: Option<String>,
    pub timeout: Option<Duration>,
    pub skip_on_lane_error: bool,
    pub show_progress: bool,
}

impl MapOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// A job for `callable` carrying these options, without arguments
    pub(crate) fn job(&self, callable: Callable) -> Job {
        let mut job = Job::new(callable)
            .with_priority(self.priority)
            .with_skip_on_lane_error(self.skip_on_lane_error);
        if let Some(name) = &self.name {
            job = job.with_name(name.clone());
        }
        if let Some(lane) = &self.lane {
            job = job.with_lane(lane.clone());
        }
        if let Some(timeout) = self.timeout {
            job = job.with_timeout(timeout);
        }
        job
    }
}

/// Fluent wrapper around [`Engine::map`].
///
/// ```no_run
/// # use dog_pulse::prelude::*;
/// # use serde_json::{json, Value};
/// # async fn demo(engine: &Engine) -> QueueResult<()> {
/// let square = Callable::func("square", |ctx| {
///     let n = ctx.arg(0).and_then(Value::as_i64).unwrap_or(0);
///     Ok(json!(n * n))
/// });
/// let outputs = engine
///     .mapper(square)
///     .priority(JobPriority::HIGH)
///     .show_progress(true)
///     .run((1..=4).map(|n| json!(n)))
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct MapBuilder<'a> {
    engine: &'a Engine,
    callable: Callable,
    options: MapOptions,
}

impl<'a> MapBuilder<'a> {
    pub(crate) fn new(engine: &'a Engine, callable: Callable) -> Self {
        Self {
            engine,
            callable,
            options: MapOptions::default(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.options.name = Some(name.into());
        self
    }

    pub fn priority(mut self, priority: impl Into<JobPriority>) -> Self {
        self.options.priority = priority.into();
        self
    }

    pub fn lane(mut self, lane: impl Into<String>) -> Self {
        self.options.lane = Some(lane.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = Some(timeout);
        self
    }

    pub fn skip_on_lane_error(mut self, skip: bool) -> Self {
        self.options.skip_on_lane_error = skip;
        self
    }

    pub fn show_progress(mut self, show_progress: bool) -> Self {
        self.options.show_progress = show_progress;
        self
    }

    /// Outputs in input order
    pub async fn run<I>(self, inputs: I) -> QueueResult<Vec<Option<Value>>>
    where
        I: IntoIterator<Item = Value>,
    {
        self.engine.map(self.callable, inputs, self.options).await
    }

    /// Full records in input order
    pub async fn run_records<I>(self, inputs: I) -> QueueResult<Vec<JobRecord>>
    where
        I: IntoIterator<Item = Value>,
    {
        self.engine.map_records(self.callable, inputs, self.options).await
    }

    /// Outputs in input order, each input being a positional argument list
    pub async fn run_star<I>(self, inputs: I) -> QueueResult<Vec<Option<Value>>>
    where
        I: IntoIterator<Item = Vec<Value>>,
    {
        self.engine.starmap(self.callable, inputs, self.options).await
    }
}
