#![cfg(unix)]

use std::time::Duration;

use serde_json::json;

use dog_pulse::{
    exitcode, Callable, Engine, EngineConfig, ExecutorKind, Job, JobId, JobRecord, QueueError, Stage, WaitOptions,
};

fn create_process_config(n_workers: usize) -> EngineConfig {
    EngineConfig::default()
        .with_workers(n_workers)
        .with_threads(false)
        .with_poll(Duration::from_millis(10))
        .with_auto_start(false)
}

/// `sh -c <script>` with `$0` set so extra argv lands in `$1..`
fn shell(script: &str) -> Job {
    Job::new(Callable::program("sh")).with_arg("-c").with_arg(script).with_arg("sh")
}

async fn run_to_completion(engine: &Engine) -> Vec<JobRecord> {
    engine.start().unwrap();
    let remaining = engine
        .wait(WaitOptions::new().with_timeout(Duration::from_secs(10)))
        .await
        .unwrap();
    assert_eq!(remaining, 0, "processes did not finish in time");
    engine.collect().unwrap()
}

#[tokio::test]
async fn test_process_mode_selected() {
    let engine = Engine::new(create_process_config(1)).unwrap();
    assert_eq!(engine.executor_kind(), ExecutorKind::Process);

    let result = engine.put(Callable::func("noop", |_| Ok(json!(null))), vec![]);
    assert!(matches!(result, Err(QueueError::UnsupportedCallable { .. })));
}

#[tokio::test]
async fn test_json_stdout_is_parsed() {
    let engine = Engine::new(create_process_config(2)).unwrap();
    engine.submit(shell(r#"echo '{"answer": 42}'"#)).unwrap();
    engine.submit(shell("echo plain text")).unwrap();

    let records = run_to_completion(&engine).await;
    let outputs: Vec<_> = records.iter().map(|r| r.output.clone()).collect();

    assert!(outputs.contains(&Some(json!({"answer": 42}))));
    assert!(outputs.contains(&Some(json!("plain text"))));
    assert!(records.iter().all(|r| r.exitcode == Some(exitcode::SUCCESS)));
}

#[tokio::test]
async fn test_kwargs_become_flags() {
    let engine = Engine::new(create_process_config(1)).unwrap();
    engine
        .submit(shell(r#"printf '%s' "$1""#).with_kwarg("level", 3))
        .unwrap();

    let records = run_to_completion(&engine).await;
    assert_eq!(records[0].output, Some(json!("--level=3")));
}

#[tokio::test]
async fn test_exit_status_and_stderr() {
    let engine = Engine::new(create_process_config(2)).unwrap();
    let quiet = engine.submit(shell("exit 3")).unwrap();
    let noisy = engine.submit(shell("echo 'disk full' >&2; exit 4")).unwrap();

    let records = run_to_completion(&engine).await;
    let find = |id: JobId| records.iter().find(|r| r.id == id).unwrap();

    assert_eq!(find(quiet).exitcode, Some(3));
    assert_eq!(find(quiet).error.as_deref(), Some("Exit code: 3"));

    assert_eq!(find(noisy).exitcode, Some(4));
    assert_eq!(find(noisy).error.as_deref(), Some("disk full"));
}

#[tokio::test]
async fn test_overrunning_process_is_killed() {
    let engine = Engine::new(create_process_config(1)).unwrap();
    engine
        .submit(shell("sleep 30").with_timeout(Duration::from_millis(100)))
        .unwrap();

    let records = run_to_completion(&engine).await;
    assert_eq!(records[0].exitcode, Some(exitcode::TIMEOUT));
    assert!(records[0].runtime.unwrap() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_missing_program_fails_job() {
    let engine = Engine::new(create_process_config(1).with_spawn_attempts(2)).unwrap();
    engine
        .submit(Job::new(Callable::program("/nonexistent/dog-pulse-worker")))
        .unwrap();

    let records = run_to_completion(&engine).await;
    assert_eq!(records[0].exitcode, Some(exitcode::FAILED));
    assert!(records[0].error.as_deref().unwrap().contains("dog-pulse-worker"));
    assert_eq!(engine.metrics().spawn_retries(), 1);
}

#[tokio::test]
async fn test_lane_skip_after_process_failure() {
    let engine = Engine::new(create_process_config(2)).unwrap();
    engine.submit(shell("exit 1").with_lane("deploy")).unwrap();
    let skipped = engine
        .submit(shell("echo never").with_lane("deploy").with_skip_on_lane_error(true))
        .unwrap();

    let records = run_to_completion(&engine).await;
    let record = records.iter().find(|r| r.id == skipped).unwrap();
    assert!(record.is_skipped());
    assert_eq!(record.exitcode, Some(exitcode::SKIPPED));
}

#[tokio::test]
async fn test_dispose_kills_working_process() {
    let marker = std::env::temp_dir().join(format!("dog-pulse-dispose-{}", std::process::id()));
    let _ = std::fs::remove_file(&marker);

    let engine = Engine::new(create_process_config(1).with_auto_start(true)).unwrap();
    engine
        .submit(shell(r#"sleep 1; touch "$1""#).with_arg(marker.display().to_string()))
        .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(engine.size(&[Stage::Working]).unwrap(), 1);

    engine.dispose().unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;

    assert!(!marker.exists(), "disposed worker kept running");
    assert_eq!(engine.metrics().jobs_discarded(), 1);
}
