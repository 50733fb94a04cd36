use std::env;
use std::str::FromStr;
use std::thread;
use std::time::Duration;

use crate::{QueueError, QueueResult};

/// Environment variable prefix read by [`EngineConfig::from_env`]
pub const ENV_PREFIX: &str = "DOG_PULSE_";

/// Configuration for an [`Engine`](crate::Engine)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Maximum number of jobs working at once.
    ///
    /// A terminated thread that has not returned yet keeps its share until it does.
    pub n_workers: usize,
    /// Interval between scheduler ticks
    pub poll: Duration,
    /// Start the scheduler as soon as the engine is created
    pub auto_start: bool,
    /// Run jobs on threads (`true`) or in child processes (`false`)
    pub use_threads: bool,
    /// Upper bound on waiting jobs; `None` is unbounded
    pub max_size: Option<usize>,
    /// Worker launch attempts per admission before the job is failed
    pub spawn_attempts: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            n_workers: thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            poll: Duration::from_millis(100),
            auto_start: true,
            use_threads: true,
            max_size: None,
            spawn_attempts: 3,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workers(mut self, n_workers: usize) -> Self {
        self.n_workers = n_workers;
        self
    }

    pub fn with_poll(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }

    pub fn with_threads(mut self, use_threads: bool) -> Self {
        self.use_threads = use_threads;
        self
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = Some(max_size);
        self
    }

    pub fn with_spawn_attempts(mut self, attempts: usize) -> Self {
        self.spawn_attempts = attempts;
        self
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> QueueResult<()> {
        if self.n_workers == 0 {
            return Err(QueueError::Config("n_workers must be at least 1".to_string()));
        }
        if self.poll.is_zero() {
            return Err(QueueError::Config("poll interval must be non-zero".to_string()));
        }
        if self.spawn_attempts == 0 {
            return Err(QueueError::Config("spawn_attempts must be at least 1".to_string()));
        }
        if self.max_size == Some(0) {
            return Err(QueueError::Config("max_size must be at least 1 when set".to_string()));
        }
        Ok(())
    }

    /// Defaults overridden by `DOG_PULSE_*` environment variables.
    ///
    /// Reads `N_WORKERS`, `POLL_MS`, `AUTO_START`, `USE_THREADS` and
    /// `MAX_SIZE`. Unset variables keep their default; unparseable ones are
    /// an error.
    pub fn from_env() -> QueueResult<Self> {
        Self::from_lookup(|key| env::var(format!("{}{}", ENV_PREFIX, key)).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> QueueResult<Self> {
        let mut config = Self::default();

        if let Some(n) = parse_var(&lookup, "N_WORKERS")? {
            config.n_workers = n;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "POLL_MS")? {
            config.poll = Duration::from_millis(ms);
        }
        if let Some(auto_start) = parse_flag(&lookup, "AUTO_START")? {
            config.auto_start = auto_start;
        }
        if let Some(use_threads) = parse_flag(&lookup, "USE_THREADS")? {
            config.use_threads = use_threads;
        }
        if let Some(max_size) = parse_var(&lookup, "MAX_SIZE")? {
            config.max_size = Some(max_size);
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> QueueResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|e| QueueError::Config(format!("{}{}={:?}: {}", ENV_PREFIX, key, raw, e)))
        })
        .transpose()
}

fn parse_flag(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> QueueResult<Option<bool>> {
    lookup(key)
        .map(|raw| match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(QueueError::Config(format!("{}{}={:?}: expected a boolean", ENV_PREFIX, key, raw))),
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert!(config.n_workers >= 1);
        assert_eq!(config.poll, Duration::from_millis(100));
        assert!(config.auto_start);
        assert!(config.use_threads);
        assert_eq!(config.max_size, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let config = EngineConfig::default().with_workers(0);
        assert!(matches!(config.validate(), Err(QueueError::Config(_))));
    }

    #[test]
    fn test_env_overrides() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("N_WORKERS", "3"),
            ("POLL_MS", "25"),
            ("AUTO_START", "false"),
            ("USE_THREADS", "0"),
            ("MAX_SIZE", "50"),
        ]))
        .unwrap();

        assert_eq!(config.n_workers, 3);
        assert_eq!(config.poll, Duration::from_millis(25));
        assert!(!config.auto_start);
        assert!(!config.use_threads);
        assert_eq!(config.max_size, Some(50));
    }

    #[test]
    fn test_env_parse_errors() {
        let result = EngineConfig::from_lookup(lookup(&[("N_WORKERS", "many")]));
        assert!(matches!(result, Err(QueueError::Config(_))));

        let result = EngineConfig::from_lookup(lookup(&[("AUTO_START", "maybe")]));
        assert!(matches!(result, Err(QueueError::Config(_))));
    }
}
