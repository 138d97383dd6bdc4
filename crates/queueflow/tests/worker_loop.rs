mod common;

use common::{insert_job_with, make_due, setup_db};

use std::sync::Arc;
use std::time::{Duration, Instant};

use queueflow::jobs::{JobLog, JobState, JobsRepo, NewJob, Resolution};
use queueflow::settings::{SettingsRepo, POLL_INTERVAL_MS};
use queueflow::worker::Worker;
use queueflow::workers::{WorkerStatus, WorkersRepo};
use tokio_util::sync::CancellationToken;

async fn wait_for_state(jobs: &JobsRepo, id: &str, state: JobState) {
    let deadline = Instant::now() + Duration::from_secs(15);
    loop {
        let job = jobs.get(id).await.unwrap().unwrap();
        if job.state == state {
            return;
        }
        assert!(
            Instant::now() < deadline,
            "job {id} stuck in {} waiting for {state}",
            job.state
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

async fn log_text(log: &JobLog, id: &str) -> String {
    let bytes = log.read(id).await.unwrap().unwrap_or_default();
    String::from_utf8_lossy(&bytes).into_owned()
}

#[tokio::test]
async fn failing_command_retries_then_dead_letters() {
    let (pool, cfg) = setup_db().await;
    let jobs = JobsRepo::new(pool.clone());
    let worker = Worker::new(pool.clone(), &cfg, "w-retry", 1);

    insert_job_with(&pool, NewJob::new("exit 1").with_id("flaky").with_max_retries(1)).await;

    let (job, first) = worker.process_next().await.unwrap().expect("job claimed");
    assert_eq!(job.id, "flaky");
    assert_eq!(
        first,
        Resolution::Rescheduled {
            delay_seconds: 2.0,
            attempts: 1
        }
    );
    let failed = jobs.get("flaky").await.unwrap().unwrap();
    assert_eq!(failed.state, JobState::Failed);
    assert_eq!(failed.last_error.as_deref(), Some("Exit code 1"));

    // Still backing off.
    assert!(worker.process_next().await.unwrap().is_none());

    make_due(&pool, "flaky").await;
    let (_, second) = worker.process_next().await.unwrap().expect("retry claimed");
    assert_eq!(second, Resolution::DeadLettered { attempts: 2 });

    let dead = jobs.get("flaky").await.unwrap().unwrap();
    assert_eq!(dead.state, JobState::Dead);
    assert_eq!(dead.attempts, 2);

    let text = log_text(&JobLog::new(&cfg.log_dir), "flaky").await;
    assert_eq!(text.matches("=== Job flaky started at ").count(), 2);
    assert!(text.contains("Command: exit 1\n"));
    assert!(text.contains("=== Job flaky failed at "));
    assert!(text.contains("Reason: Exit code 1\nNext delay: 2s\n"));
    assert!(text.contains("=== Job flaky DEAD at "));
    assert!(text.contains("Next delay: n/a\n"));
}

#[tokio::test]
async fn backoff_base_is_read_before_each_failure() {
    let (pool, cfg) = setup_db().await;
    let settings = SettingsRepo::new(pool.clone());
    let worker = Worker::new(pool.clone(), &cfg, "w-base", 1);

    insert_job_with(&pool, NewJob::new("false").with_id("b").with_max_retries(5)).await;

    settings.set("backoff-base", "3").await.unwrap();
    let (_, r) = worker.process_next().await.unwrap().unwrap();
    assert_eq!(
        r,
        Resolution::Rescheduled {
            delay_seconds: 3.0,
            attempts: 1
        }
    );

    settings.set("backoff-base", "5").await.unwrap();
    make_due(&pool, "b").await;
    let (_, r) = worker.process_next().await.unwrap().unwrap();
    assert_eq!(
        r,
        Resolution::Rescheduled {
            delay_seconds: 25.0,
            attempts: 2
        }
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn run_processes_jobs_until_cancelled() {
    let (pool, cfg) = setup_db().await;
    let jobs = JobsRepo::new(pool.clone());
    let registry = WorkersRepo::new(pool.clone());
    SettingsRepo::new(pool.clone())
        .set(POLL_INTERVAL_MS, "25")
        .await
        .unwrap();

    insert_job_with(&pool, NewJob::new("echo hello from job").with_id("hello")).await;

    let worker = Arc::new(Worker::new(pool.clone(), &cfg, "w-run", 31337));
    let shutdown = CancellationToken::new();
    let handle = {
        let worker = worker.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { worker.run(shutdown).await })
    };

    wait_for_state(&jobs, "hello", JobState::Completed).await;

    let registered = registry.get("w-run").await.unwrap().expect("registered");
    assert_eq!(registered.status, WorkerStatus::Running);
    assert_eq!(registered.pid, 31337);
    assert!(cfg.pid_dir.join("31337.pid").exists());

    shutdown.cancel();
    let stats = handle.await.unwrap().unwrap();
    assert_eq!(stats.completed, 1);

    let stopped = registry.get("w-run").await.unwrap().unwrap();
    assert_eq!(stopped.status, WorkerStatus::Stopped);
    assert!(!cfg.pid_dir.join("31337.pid").exists());

    let text = log_text(&JobLog::new(&cfg.log_dir), "hello").await;
    assert!(text.contains("hello from job\n"));
    assert!(text.contains("=== Job hello completed at "));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_waits_for_the_in_flight_job() {
    let (pool, cfg) = setup_db().await;
    let jobs = JobsRepo::new(pool.clone());
    let registry = WorkersRepo::new(pool.clone());
    SettingsRepo::new(pool.clone())
        .set(POLL_INTERVAL_MS, "25")
        .await
        .unwrap();

    insert_job_with(&pool, NewJob::new("sleep 1; echo finished").with_id("slow")).await;

    let worker = Arc::new(Worker::new(pool.clone(), &cfg, "w-drain", 4001));
    let shutdown = CancellationToken::new();
    let handle = {
        let worker = worker.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { worker.run(shutdown).await })
    };

    wait_for_state(&jobs, "slow", JobState::Processing).await;
    shutdown.cancel();

    // The registry flips to stopping while the command is still running.
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let w = registry.get("w-drain").await.unwrap().unwrap();
        if w.status != WorkerStatus::Running {
            break;
        }
        assert!(Instant::now() < deadline, "worker never marked stopping");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let stats = handle.await.unwrap().unwrap();
    assert_eq!(stats.completed, 1);

    let done = jobs.get("slow").await.unwrap().unwrap();
    assert_eq!(done.state, JobState::Completed);
    assert_eq!(
        registry.get("w-drain").await.unwrap().unwrap().status,
        WorkerStatus::Stopped
    );
}

#[tokio::test]
async fn cancelled_before_start_claims_nothing() {
    let (pool, cfg) = setup_db().await;
    let jobs = JobsRepo::new(pool.clone());

    insert_job_with(&pool, NewJob::new("true").with_id("untouched")).await;

    let worker = Worker::new(pool.clone(), &cfg, "w-idle", 4002);
    let shutdown = CancellationToken::new();
    shutdown.cancel();

    let stats = worker.run(shutdown).await.unwrap();
    assert_eq!(stats.completed, 0);

    let job = jobs.get("untouched").await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Pending);
    assert_eq!(
        WorkersRepo::new(pool)
            .get("w-idle")
            .await
            .unwrap()
            .unwrap()
            .status,
        WorkerStatus::Stopped
    );
}
