use std::process::{Output, Stdio};

use chrono::Utc;
use serde_json::Value;
use tokio::process::Command;
use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::{
    execution::{ExecutorKind, WorkerExecutor, WorkerHandle, WorkerOutcome},
    exitcode,
    job::Callable,
    JobId, JobRecord, QueueError, QueueResult,
};

/// Runs external programs, one child process per job.
///
/// Positional args become argv entries (strings verbatim, anything else as
/// JSON) followed by one `--key=value` per keyword argument. Standard output
/// is parsed as JSON when possible and kept as a string otherwise. A
/// terminated job's child is killed.
#[derive(Debug, Clone, Default)]
pub struct ProcessExecutor {
    working_dir: Option<std::path::PathBuf>,
}

impl ProcessExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory children are started in
    pub fn with_working_dir(mut self, dir: impl Into<std::path::PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    fn command(&self, program: &str, job: &JobRecord) -> Command {
        let mut command = Command::new(program);
        command
            .args(job.args.iter().map(render_arg))
            .args(job.kwargs.iter().map(|(key, value)| format!("--{}={}", key, render_arg(value))))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        command
    }
}

impl WorkerExecutor for ProcessExecutor {
    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Process
    }

    fn supports(&self, callable: &Callable) -> bool {
        matches!(callable, Callable::Program { .. })
    }

    fn start(&self, job: &JobRecord) -> QueueResult<WorkerHandle> {
        let Callable::Program { program } = &job.callable else {
            return Err(QueueError::UnsupportedCallable {
                executor: self.kind().name(),
                callable: job.callable.to_string(),
            });
        };
        let runtime = Handle::try_current().map_err(|_| QueueError::NoRuntime)?;

        let child = {
            let _guard = runtime.enter();
            self.command(program, job)
                .spawn()
                .map_err(|e| QueueError::Spawn(format!("{}: {}", program, e)))?
        };

        let (handle, outcome_tx) = WorkerHandle::channel(job.timeout);
        let cancellation = handle.cancellation();
        let job_id = job.id;

        runtime.spawn(async move {
            tokio::select! {
                result = child.wait_with_output() => {
                    let outcome = match result {
                        Ok(output) => process_output(job_id, output),
                        Err(e) => WorkerOutcome::failed(e.to_string()),
                    };
                    if outcome_tx.send(outcome).is_err() {
                        debug!(job_id = %job_id, "Discarding outcome of terminated job");
                    }
                }
                // Dropping the pending wait kills the child
                _ = cancellation.cancelled() => {
                    warn!(job_id = %job_id, "Killing worker process");
                }
            }
        });

        Ok(handle)
    }
}

fn render_arg(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn process_output(job_id: JobId, output: Output) -> WorkerOutcome {
    let stdout = String::from_utf8_lossy(&output.stdout).trim_end().to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).trim_end().to_string();
    let code = output.status.code();

    debug!(job_id = %job_id, exit_code = ?code, "Worker process exited");

    let parsed = if stdout.is_empty() {
        None
    } else {
        Some(serde_json::from_str(&stdout).unwrap_or(Value::String(stdout)))
    };

    if output.status.success() {
        return WorkerOutcome {
            output: parsed,
            exitcode: exitcode::SUCCESS,
            error: None,
            ended_at: Utc::now(),
        };
    }

    let error = if stderr.is_empty() {
        match code {
            Some(code) => format!("Exit code: {}", code),
            None => "Terminated by signal".to_string(),
        }
    } else {
        stderr
    };

    WorkerOutcome {
        output: parsed,
        exitcode: code.unwrap_or(exitcode::FAILED),
        error: Some(error),
        ended_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{execution::WorkerPoll, Job};
    use serde_json::json;
    use std::time::Duration;

    async fn wait_finished(handle: &mut WorkerHandle) -> WorkerOutcome {
        for _ in 0..500 {
            if let WorkerPoll::Finished(outcome) = handle.poll() {
                return outcome;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("worker did not finish");
    }

    #[test]
    fn test_render_arg() {
        assert_eq!(render_arg(&json!("plain")), "plain");
        assert_eq!(render_arg(&json!(3)), "3");
        assert_eq!(render_arg(&json!({"a": 1})), r#"{"a":1}"#);
    }

    #[tokio::test]
    async fn test_json_stdout_becomes_output() {
        let executor = ProcessExecutor::new();
        let job = JobRecord::new(
            JobId(1),
            Job::new(Callable::program("sh")).with_arg("-c").with_arg(r#"echo '{"ok": true}'"#),
        );

        let mut handle = executor.start(&job).unwrap();
        let outcome = wait_finished(&mut handle).await;

        assert_eq!(outcome.exitcode, exitcode::SUCCESS);
        assert_eq!(outcome.output, Some(json!({"ok": true})));
    }

    #[tokio::test]
    async fn test_runs_in_working_dir() {
        let dir = std::env::temp_dir().canonicalize().unwrap();
        let executor = ProcessExecutor::new().with_working_dir(&dir);
        let job = JobRecord::new(JobId(1), Job::new(Callable::program("sh")).with_arg("-c").with_arg("pwd -P"));

        let mut handle = executor.start(&job).unwrap();
        let outcome = wait_finished(&mut handle).await;

        assert_eq!(outcome.output, Some(json!(dir.display().to_string())));
    }

    #[tokio::test]
    async fn test_exit_code_without_stderr() {
        let executor = ProcessExecutor::new();
        let job = JobRecord::new(JobId(2), Job::new(Callable::program("sh")).with_arg("-c").with_arg("exit 3"));

        let mut handle = executor.start(&job).unwrap();
        let outcome = wait_finished(&mut handle).await;

        assert_eq!(outcome.exitcode, 3);
        assert_eq!(outcome.error.as_deref(), Some("Exit code: 3"));
    }

    #[tokio::test]
    async fn test_missing_program_fails_to_spawn() {
        let executor = ProcessExecutor::new();
        let job = JobRecord::new(JobId(3), Job::new(Callable::program("/nonexistent/dog-pulse-worker")));

        assert!(matches!(executor.start(&job), Err(QueueError::Spawn(_))));
    }

    #[test]
    fn test_rejects_functions() {
        let executor = ProcessExecutor::new();
        let callable = Callable::func("noop", |_| Ok(Value::Null));
        assert!(!executor.supports(&callable));
    }
}
