mod common;

use common::{insert_job, insert_job_with, setup_db};

use chrono::{Duration as ChronoDuration, Utc};
use queueflow::db;
use queueflow::jobs::{JobState, JobsRepo, NewJob};
use std::collections::HashSet;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_claimers_never_share_a_job() {
    let (pool, cfg) = setup_db().await;

    const JOBS: usize = 40;
    for i in 0..JOBS {
        insert_job(&pool, &format!("echo {i}")).await;
    }

    // Separate pools stand in for separate worker processes on one file.
    let mut handles = Vec::new();
    for w in 0..6 {
        let url = cfg.database_url.clone();
        handles.push(tokio::spawn(async move {
            let pool = db::make_pool(&url).await.unwrap();
            let repo = JobsRepo::new(pool);
            let worker_id = format!("worker-{w}");
            let mut claimed = Vec::new();
            while let Some(job) = repo.claim(&worker_id).await.unwrap() {
                assert_eq!(job.state, JobState::Processing);
                assert_eq!(job.worker_id.as_deref(), Some(worker_id.as_str()));
                claimed.push(job.id);
            }
            claimed
        }));
    }

    let mut all = Vec::new();
    for h in handles {
        all.extend(h.await.unwrap());
    }

    let unique: HashSet<_> = all.iter().cloned().collect();
    assert_eq!(all.len(), JOBS, "every job claimed exactly once");
    assert_eq!(unique.len(), JOBS);

    let repo = JobsRepo::new(pool);
    assert!(repo.list(Some(JobState::Pending)).await.unwrap().is_empty());
    assert_eq!(repo.list(Some(JobState::Processing)).await.unwrap().len(), JOBS);
}

#[tokio::test]
async fn two_claimers_one_job() {
    let (pool, _cfg) = setup_db().await;
    let repo = JobsRepo::new(pool.clone());
    insert_job(&pool, "true").await;

    let repo_a = repo.clone();
    let repo_b = repo.clone();
    let (a, b) = tokio::join!(
        async move { repo_a.claim("worker-a").await.unwrap() },
        async move { repo_b.claim("worker-b").await.unwrap() },
    );

    assert!(
        a.is_some() ^ b.is_some(),
        "exactly one claimer gets the job"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn many_claimers_one_job() {
    let (pool, cfg) = setup_db().await;
    insert_job(&pool, "true").await;

    let mut handles = Vec::new();
    for w in 0..8 {
        let url = cfg.database_url.clone();
        handles.push(tokio::spawn(async move {
            let repo = JobsRepo::new(db::make_pool(&url).await.unwrap());
            repo.claim(&format!("worker-{w}")).await.unwrap()
        }));
    }

    let mut winners = 0;
    for h in handles {
        if h.await.unwrap().is_some() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn claims_by_priority_then_age() {
    let (pool, _cfg) = setup_db().await;
    let repo = JobsRepo::new(pool.clone());
    let base = Utc::now() - ChronoDuration::seconds(60);

    insert_job_with(
        &pool,
        NewJob::new("echo a")
            .with_id("A")
            .with_priority(5)
            .with_created_at(base),
    )
    .await;
    insert_job_with(
        &pool,
        NewJob::new("echo b")
            .with_id("B")
            .with_priority(1)
            .with_created_at(base + ChronoDuration::seconds(1)),
    )
    .await;
    insert_job_with(
        &pool,
        NewJob::new("echo c")
            .with_id("C")
            .with_priority(1)
            .with_created_at(base - ChronoDuration::seconds(1)),
    )
    .await;

    let mut order = Vec::new();
    while let Some(job) = repo.claim("w").await.unwrap() {
        order.push(job.id);
    }
    assert_eq!(order, vec!["C", "B", "A"]);
}

#[tokio::test]
async fn scheduled_jobs_wait_for_run_at() {
    let (pool, _cfg) = setup_db().await;
    let repo = JobsRepo::new(pool.clone());

    insert_job_with(
        &pool,
        NewJob::new("echo later")
            .with_id("later")
            .with_priority(0)
            .with_run_at(Utc::now() + ChronoDuration::hours(1)),
    )
    .await;
    insert_job_with(&pool, NewJob::new("echo now").with_id("now").with_priority(50)).await;

    let first = repo.claim("w").await.unwrap().expect("due job is claimable");
    assert_eq!(first.id, "now");
    assert!(repo.claim("w").await.unwrap().is_none());

    let later = repo.get("later").await.unwrap().unwrap();
    assert_eq!(later.state, JobState::Pending);
    assert!(later.worker_id.is_none());
}

#[tokio::test]
async fn failed_jobs_are_claimable_again_once_due() {
    let (pool, _cfg) = setup_db().await;
    let repo = JobsRepo::new(pool.clone());
    insert_job_with(&pool, NewJob::new("false").with_id("f").with_max_retries(5)).await;

    let job = repo.claim("w1").await.unwrap().unwrap();
    repo.fail_with_retry(&job.id, job.attempts, job.max_retries, 0.0, "Exit code 1")
        .await
        .unwrap()
        .unwrap();

    let again = repo.claim("w2").await.unwrap().expect("zero delay is due now");
    assert_eq!(again.id, "f");
    assert_eq!(again.attempts, 1);
    assert_eq!(again.worker_id.as_deref(), Some("w2"));
}

#[tokio::test]
async fn nothing_to_claim_in_terminal_states() {
    let (pool, _cfg) = setup_db().await;
    let repo = JobsRepo::new(pool.clone());

    insert_job_with(&pool, NewJob::new("true").with_id("done")).await;
    let job = repo.claim("w").await.unwrap().unwrap();
    repo.complete(&job.id).await.unwrap();

    assert!(repo.claim("w").await.unwrap().is_none());
}
