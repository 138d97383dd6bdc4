use queueflow::config::Config;
use queueflow::db;
use queueflow::jobs::{Job, JobsRepo, NewJob};
use sqlx::SqlitePool;

/// A fresh store in its own temp directory. Every test gets an isolated
/// file, so tests can run in parallel.
pub async fn setup_db() -> (SqlitePool, Config) {
    let dir = std::env::temp_dir().join(format!("queueflow-test-{}", uuid::Uuid::new_v4()));
    let cfg = Config::for_data_dir(&dir);
    cfg.ensure_dirs().expect("failed to create test dirs");

    let pool = db::open(&cfg.database_url)
        .await
        .expect("failed to open test database");

    (pool, cfg)
}

#[allow(dead_code)]
pub async fn insert_job(pool: &SqlitePool, command: &str) -> Job {
    JobsRepo::new(pool.clone())
        .upsert(NewJob::new(command))
        .await
        .expect("failed to insert job")
}

#[allow(dead_code)]
pub async fn insert_job_with(pool: &SqlitePool, job: NewJob) -> Job {
    JobsRepo::new(pool.clone())
        .upsert(job)
        .await
        .expect("failed to insert job")
}

/// Pull a rescheduled job's `run_at` back to now so it can be claimed again
/// without waiting out the backoff.
#[allow(dead_code)]
pub async fn make_due(pool: &SqlitePool, id: &str) {
    sqlx::query("UPDATE jobs SET run_at = ?2 WHERE id = ?1")
        .bind(id)
        .bind(chrono::Utc::now())
        .execute(pool)
        .await
        .expect("failed to reschedule job");
}

