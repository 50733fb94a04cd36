use std::time::Duration;

use serde_json::{json, Value};
use tokio_stream::StreamExt;

use dog_pulse::{
    exitcode, Callable, Engine, EngineConfig, Job, JobError, JobEvent, JobId, JobRecord, JobStatus, QueueError,
    Stage, WaitOptions,
};

/// Test factory functions
fn create_test_config(n_workers: usize) -> EngineConfig {
    EngineConfig::default()
        .with_workers(n_workers)
        .with_poll(Duration::from_millis(10))
        .with_auto_start(false)
}

fn sleeper(ms: u64) -> Callable {
    Callable::func("sleeper", move |ctx| {
        std::thread::sleep(Duration::from_millis(ms));
        Ok(ctx.arg(0).cloned().unwrap_or(Value::Null))
    })
}

fn failing() -> Callable {
    Callable::func("failing", |_| Err(JobError::failed("boom")))
}

fn wait_opts() -> WaitOptions {
    WaitOptions::new().with_timeout(Duration::from_secs(10))
}

async fn run_to_completion(engine: &Engine) -> Vec<JobRecord> {
    engine.start().unwrap();
    assert_eq!(engine.wait(wait_opts()).await.unwrap(), 0, "jobs did not finish in time");
    engine.collect().unwrap()
}

async fn receive_next_event(stream: &mut tokio_stream::wrappers::BroadcastStream<JobEvent>) -> JobEvent {
    tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("Timeout waiting for event")
        .expect("Stream ended")
        .expect("Event receive error")
}

/// A1. Higher priority dispatches first, ties in submission order
#[tokio::test]
async fn test_priority_then_fifo_ordering() {
    let engine = Engine::new(create_test_config(1)).unwrap();

    // Arrange: submit before the pulse runs so all jobs wait together
    for priority in [0, 5, 1, 5] {
        engine.submit(Job::new(sleeper(1)).with_priority(priority)).unwrap();
    }

    // Act
    let mut records = run_to_completion(&engine).await;

    // Assert: retrieval order and dispatch order agree
    let retrieved: Vec<JobId> = records.iter().map(|r| r.id).collect();
    assert_eq!(retrieved, vec![JobId(2), JobId(4), JobId(3), JobId(1)]);

    records.sort_by_key(|r| r.dispatch_seq);
    let dispatched: Vec<JobId> = records.iter().map(|r| r.id).collect();
    assert_eq!(dispatched, vec![JobId(2), JobId(4), JobId(3), JobId(1)]);
}

/// A2. Ten alternating-priority jobs on two workers
#[tokio::test]
async fn test_alternating_priorities_on_two_workers() {
    let engine = Engine::new(create_test_config(2)).unwrap();
    for i in 0..10 {
        engine.submit(Job::new(sleeper(5)).with_priority(i % 2).with_arg(i)).unwrap();
    }

    let records = run_to_completion(&engine).await;
    assert_eq!(records.len(), 10);
    assert!(records.iter().all(|r| r.exitcode == Some(exitcode::SUCCESS)));

    // Every job waited together, so every priority-1 job was dispatched first
    let latest_high = records
        .iter()
        .filter(|r| r.priority.value() == 1)
        .filter_map(|r| r.dispatch_seq)
        .max()
        .unwrap();
    let earliest_low = records
        .iter()
        .filter(|r| r.priority.value() == 0)
        .filter_map(|r| r.dispatch_seq)
        .min()
        .unwrap();
    assert!(latest_high < earliest_low);
}

/// B1. Lane members never overlap and start in submission order
#[tokio::test]
async fn test_lane_mutual_exclusion() {
    let engine = Engine::new(create_test_config(4)).unwrap();
    for priority in [0, 9, 5] {
        engine
            .submit(Job::new(sleeper(20)).with_lane("ingest").with_priority(priority))
            .unwrap();
    }
    engine.submit(Job::new(sleeper(20)).with_priority(1)).unwrap();

    let mut records = run_to_completion(&engine).await;
    records.retain(|r| r.lane.is_some());
    records.sort_by_key(|r| r.dispatch_seq);

    // Submission order despite priorities
    let order: Vec<JobId> = records.iter().map(|r| r.id).collect();
    assert_eq!(order, vec![JobId(1), JobId(2), JobId(3)]);

    for pair in records.windows(2) {
        assert!(pair[1].started_at >= pair[0].ended_at, "lane members overlapped");
    }
}

/// B2. A fails, B skips, C runs
#[tokio::test]
async fn test_lane_skip_propagation() {
    let engine = Engine::new(create_test_config(1)).unwrap();
    let a = engine.submit(Job::new(failing()).with_lane("l")).unwrap();
    let b = engine
        .submit(Job::new(sleeper(1)).with_lane("l").with_skip_on_lane_error(true))
        .unwrap();
    let c = engine.submit(Job::new(sleeper(1)).with_lane("l")).unwrap();

    let records = run_to_completion(&engine).await;
    let find = |id: JobId| records.iter().find(|r| r.id == id).unwrap();

    assert_eq!(find(a).exitcode, Some(exitcode::FAILED));
    assert_eq!(find(a).error.as_deref(), Some("boom"));

    assert_eq!(find(b).status, JobStatus::Skipped);
    assert_eq!(find(b).exitcode, Some(exitcode::SKIPPED));
    assert_eq!(find(b).output, None);

    assert_eq!(find(c).status, JobStatus::Completed);
    assert_eq!(find(c).exitcode, Some(exitcode::SUCCESS));
}

/// B3. Skipping carries through consecutive flagged members
#[tokio::test]
async fn test_lane_skip_is_transitive() {
    let engine = Engine::new(create_test_config(2)).unwrap();
    engine.submit(Job::new(failing()).with_lane("l")).unwrap();
    for _ in 0..2 {
        engine
            .submit(Job::new(sleeper(1)).with_lane("l").with_skip_on_lane_error(true))
            .unwrap();
    }

    let records = run_to_completion(&engine).await;
    assert_eq!(records.iter().filter(|r| r.is_skipped()).count(), 2);
}

/// C1. Jobs are never lost between stages
#[tokio::test]
async fn test_conservation_while_running() {
    let engine = Engine::new(create_test_config(2)).unwrap();
    for _ in 0..6 {
        engine.submit(Job::new(sleeper(15))).unwrap();
    }
    engine.start().unwrap();

    while engine.is_busy().unwrap() {
        assert_eq!(engine.size(&[]).unwrap(), 6);
        assert!(engine.size(&[Stage::Working]).unwrap() <= 2);
        tokio::time::sleep(Duration::from_millis(3)).await;
    }

    assert_eq!(engine.size(&[Stage::Completed]).unwrap(), 6);
    assert_eq!(
        engine.size(&[]).unwrap(),
        engine.size(&[Stage::Waiting, Stage::Working, Stage::Completed]).unwrap()
    );
}

/// C2. Collect drains exactly once
#[tokio::test]
async fn test_drain_correctness() {
    let engine = Engine::new(create_test_config(2)).unwrap();
    for i in 0..5 {
        engine.submit(Job::new(sleeper(1)).with_arg(i)).unwrap();
    }

    let first = run_to_completion(&engine).await;
    assert_eq!(first.len(), 5);
    assert!(engine.collect().unwrap().is_empty());
    assert!(!engine.has_work().unwrap());
}

/// C3. get pops the highest-priority completed record
#[tokio::test]
async fn test_get_pops_by_priority() {
    let engine = Engine::new(create_test_config(2)).unwrap();
    engine.submit(Job::new(sleeper(1)).with_priority(1)).unwrap();
    let top = engine.submit(Job::new(sleeper(1)).with_priority(7)).unwrap();

    engine.start().unwrap();
    engine.wait(wait_opts()).await.unwrap();

    assert_eq!(engine.get().unwrap().unwrap().id, top);
    assert!(engine.get().unwrap().is_some());
    assert!(engine.get().unwrap().is_none());
}

/// C4. get_wait blocks until a record appears
#[tokio::test]
async fn test_get_wait_returns_first_completion() {
    let engine = Engine::new(create_test_config(1).with_auto_start(true)).unwrap();
    let id = engine.submit(Job::new(sleeper(20)).with_arg("late")).unwrap();

    let record = engine.get_wait(wait_opts()).await.unwrap().unwrap();
    assert_eq!(record.id, id);
    assert_eq!(record.output, Some(json!("late")));
}

/// D1. Overrunning jobs are terminated and marked
#[tokio::test]
async fn test_timeout_enforcement() {
    let engine = Engine::new(create_test_config(1)).unwrap();
    let spin = Callable::func("spin", |ctx| {
        while !ctx.is_cancelled() {
            std::thread::sleep(Duration::from_millis(2));
        }
        Err(JobError::Cancelled)
    });
    engine
        .submit(Job::new(spin).with_timeout(Duration::from_millis(50)))
        .unwrap();
    let after = engine.submit(Job::new(sleeper(1))).unwrap();

    let records = run_to_completion(&engine).await;
    let timed_out = records.iter().find(|r| r.is_timed_out()).unwrap();

    assert_eq!(timed_out.exitcode, Some(exitcode::TIMEOUT));
    // Terminated within a few ticks of the deadline
    let runtime = timed_out.runtime.unwrap();
    let poll = engine.config().poll;
    assert!(runtime >= Duration::from_millis(50), "terminated early: {:?}", runtime);
    assert!(runtime < Duration::from_millis(50) + poll * 8, "terminated late: {:?}", runtime);

    // The slot was released for the next job
    let next = records.iter().find(|r| r.id == after).unwrap();
    assert_eq!(next.exitcode, Some(exitcode::SUCCESS));
}

/// D2. A panicking job only fails its own record
#[tokio::test]
async fn test_panic_is_recorded_not_thrown() {
    let engine = Engine::new(create_test_config(2)).unwrap();
    engine
        .submit(Job::new(Callable::func("explode", |_| panic!("kaboom"))))
        .unwrap();
    engine.submit(Job::new(sleeper(1)).with_arg(1)).unwrap();

    let records = run_to_completion(&engine).await;
    assert_eq!(records.len(), 2);

    let exploded = records.iter().find(|r| r.is_failed()).unwrap();
    assert!(exploded.error.as_deref().unwrap().contains("kaboom"));
    assert!(exploded.check().is_ok(), "failures are suppressed by default");
}

/// D3. Unsuppressed failures surface through check
#[tokio::test]
async fn test_unsuppressed_failure_check() {
    let engine = Engine::new(create_test_config(1)).unwrap();
    engine
        .submit(Job::new(failing()).with_suppress_errors(false))
        .unwrap();

    let records = run_to_completion(&engine).await;
    assert!(matches!(records[0].check(), Err(QueueError::JobFailed { .. })));
}

/// E1. Operations after dispose fail
#[tokio::test]
async fn test_dispose_lifecycle() {
    let engine = Engine::new(create_test_config(1).with_auto_start(true)).unwrap();
    engine.submit(Job::new(sleeper(200))).unwrap();
    engine.submit(Job::new(sleeper(1))).unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    engine.dispose().unwrap();
    engine.dispose().unwrap();

    assert!(matches!(engine.submit(Job::new(sleeper(1))), Err(QueueError::Disposed)));
    assert!(matches!(engine.wait(wait_opts()).await, Err(QueueError::Disposed)));
    assert!(matches!(engine.collect(), Err(QueueError::Disposed)));
    assert_eq!(engine.metrics().jobs_discarded(), 2);
}

/// E2. Scoped engines dispose on the way out
#[tokio::test]
async fn test_scoped_engine() {
    let mut handle = None;
    let records = Engine::scoped(create_test_config(2), |engine| {
        handle = Some(engine.clone());
        async move {
            engine.put(sleeper(1), vec![json!("a")])?;
            engine.put(sleeper(1), vec![json!("b")])?;
            engine.wait(wait_opts()).await?;
            engine.collect()
        }
    })
    .await
    .unwrap();

    assert_eq!(records.len(), 2);
    assert!(handle.unwrap().is_disposed());
}

/// F1. Lifecycle events are published in order
#[tokio::test]
async fn test_emits_lifecycle_events() {
    let engine = Engine::new(create_test_config(1)).unwrap();
    let mut stream = engine.events();

    let id = engine.submit(Job::new(sleeper(1))).unwrap();
    engine.start().unwrap();

    let submitted = receive_next_event(&mut stream).await;
    assert_eq!(submitted.event_name(), "submitted");
    assert_eq!(submitted.job_id(), id);

    assert_eq!(receive_next_event(&mut stream).await.event_name(), "started");
    assert_eq!(receive_next_event(&mut stream).await.event_name(), "completed");

    assert_eq!(engine.metrics().jobs_completed(), 1);
}

/// F2. Flat rows carry the stable key set
#[tokio::test]
async fn test_records_export_rows() {
    let engine = Engine::new(create_test_config(1)).unwrap();
    engine
        .submit(Job::new(sleeper(1)).with_arg(json!({"k": 1})).with_lane("rows"))
        .unwrap();

    let records = run_to_completion(&engine).await;
    let row = records[0].to_row();

    assert_eq!(row.len(), 10);
    assert_eq!(row["lane"], json!("rows"));
    assert_eq!(row["output"], json!({"k": 1}));
    assert_eq!(row["exitcode"], json!(0));
    assert!(row["runtime"].as_f64().is_some());
}
