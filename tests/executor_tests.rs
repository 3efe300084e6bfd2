
use std::sync::Arc;
use std::time::Duration;

use momo::job::JobExecutor;
use momo::repo::{ExecutionsRepository, InMemoryExecutionsRepository, InMemoryJobRepository, JobRepository};
use momo::{ExecutionStatus, Job, JobHandler};

use test_harness::{counting_handler, failing_handler, in_memory_repos};

const SCHEDULE_ID: &str = "test-schedule";

async fn test_executor() -> (
    JobExecutor,
    Arc<InMemoryJobRepository>,
    Arc<InMemoryExecutionsRepository>,
) {
    let (jobs, executions) = in_memory_repos(Duration::from_secs(1));
    executions
        .add_schedule(SCHEDULE_ID, "test")
        .await
        .expect("add schedule");
    let executor = JobExecutor::new(SCHEDULE_ID, jobs.clone(), executions.clone());
    (executor, jobs, executions)
}

#[tokio::test]
async fn test_execute_finished() {
    let (executor, jobs, executions) = test_executor().await;
    let job = Job::new("greet", "one minute");
    jobs.save(&job).await.unwrap();

    let (handler, count) = counting_handler();
    let result = executor.execute(&job, &handler).await.unwrap();

    assert_eq!(result.status, ExecutionStatus::Finished);
    assert!(result.error.is_none());
    assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 1);

    // Counters are released and the outcome is recorded.
    let stored = jobs.find_one("greet").await.unwrap().unwrap();
    assert_eq!(stored.running, 0);
    let info = stored.execution_info.expect("execution info recorded");
    assert!(info.last_finished.is_some());
    assert_eq!(info.last_result.unwrap().status, ExecutionStatus::Finished);
    assert_eq!(executions.count_running("greet").await.unwrap(), 0);
}

#[tokio::test]
async fn test_execute_failed_captures_message() {
    let (executor, jobs, _executions) = test_executor().await;
    let job = Job::new("flaky", "one minute");
    jobs.save(&job).await.unwrap();

    let handler = failing_handler("boom");
    let result = executor.execute(&job, &handler).await.unwrap();

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_eq!(result.error.as_deref(), Some("boom"));

    let stored = jobs.find_one("flaky").await.unwrap().unwrap();
    assert_eq!(stored.running, 0);
    let last = stored.execution_info.unwrap().last_result.unwrap();
    assert_eq!(last.status, ExecutionStatus::Failed);
}

#[tokio::test]
async fn test_execute_failure_message_is_bounded() {
    let (executor, jobs, _executions) = test_executor().await;
    let job = Job::new("verbose", "one minute");
    jobs.save(&job).await.unwrap();

    let handler = failing_handler(&"x".repeat(5000));
    let result = executor.execute(&job, &handler).await.unwrap();

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_eq!(result.error.unwrap().len(), 1000);
}

#[tokio::test]
async fn test_execute_contains_handler_panic() {
    let (executor, jobs, executions) = test_executor().await;
    let job = Job::new("panicky", "one minute");
    jobs.save(&job).await.unwrap();

    let handler: JobHandler = Arc::new(|| Box::pin(async { panic!("kaboom") }));
    let result = executor.execute(&job, &handler).await.unwrap();

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert!(result.error.unwrap().contains("kaboom"));

    // The counters were released despite the panic.
    let stored = jobs.find_one("panicky").await.unwrap().unwrap();
    assert_eq!(stored.running, 0);
    assert_eq!(executions.count_running("panicky").await.unwrap(), 0);
}

#[tokio::test]
async fn test_max_running_reached_aborts_without_running() {
    let (executor, jobs, executions) = test_executor().await;
    let mut job = Job::new("capped", "one minute").with_max_running(2);
    job.running = 2;
    jobs.save(&job).await.unwrap();

    let (handler, count) = counting_handler();
    let result = executor.execute(&job, &handler).await.unwrap();

    assert_eq!(result.status, ExecutionStatus::MaxRunningReached);
    assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 0, "handler must not run");

    // Nothing was incremented, nothing needs releasing.
    let stored = jobs.find_one("capped").await.unwrap().unwrap();
    assert_eq!(stored.running, 2);
    assert_eq!(executions.count_running("capped").await.unwrap(), 0);
}

#[tokio::test]
async fn test_execute_below_cap_takes_one_slot() {
    let (executor, jobs, _executions) = test_executor().await;
    let mut job = Job::new("roomy", "one minute").with_max_running(2);
    job.running = 1;
    jobs.save(&job).await.unwrap();

    let (handler, count) = counting_handler();
    let result = executor.execute(&job, &handler).await.unwrap();

    assert_eq!(result.status, ExecutionStatus::Finished);
    assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 1);

    // Back to the pre-invocation count.
    let stored = jobs.find_one("roomy").await.unwrap().unwrap();
    assert_eq!(stored.running, 1);
}

#[tokio::test]
async fn test_unbounded_job_ignores_running_count() {
    let (executor, jobs, _executions) = test_executor().await;
    let mut job = Job::new("unbounded", "one minute");
    job.running = 50;
    jobs.save(&job).await.unwrap();

    let (handler, _count) = counting_handler();
    let result = executor.execute(&job, &handler).await.unwrap();
    assert_eq!(result.status, ExecutionStatus::Finished);
}
