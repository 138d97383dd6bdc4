// crates/queueflow/src/jobs/repo.rs

use crate::error::JobInputError;
use crate::jobs::input::validate_new_job;
use crate::jobs::model::{truncate_error, Job, JobState, NewJob};
use crate::jobs::retry::exhausted;
use chrono::{Duration, Utc};
use sqlx::SqlitePool;

#[derive(Clone)]
pub struct JobsRepo {
    pool: SqlitePool,
}

/// Result of `fail_with_retry`: the row as stored, and whether it was the
/// terminal (dead-letter) transition.
#[derive(Debug, Clone)]
pub struct FailOutcome {
    pub is_final: bool,
    pub job: Job,
}

impl JobsRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // ----------------------------
    // Submission
    // ----------------------------

    /// Insert a job, or overwrite every mutable field of the job with the
    /// same id. `created_at` survives an overwrite; `worker_id` is always
    /// cleared since nothing can be upserted into `processing`.
    ///
    /// A job that is `processing` right now is left alone and the call fails
    /// with `JobInputError::InProgress`; resetting it would let a second
    /// worker claim it while the first is still running it.
    pub async fn upsert(&self, job: NewJob) -> anyhow::Result<Job> {
        validate_new_job(&job)?;

        let now = Utc::now();
        let stored = sqlx::query_as::<_, Job>(
            r#"
            INSERT INTO jobs (
                id, command, state, attempts, max_retries, priority,
                timeout_seconds, run_at, created_at, updated_at, last_error, worker_id
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, NULL)
            ON CONFLICT(id) DO UPDATE SET
                command = excluded.command,
                state = excluded.state,
                attempts = excluded.attempts,
                max_retries = excluded.max_retries,
                priority = excluded.priority,
                timeout_seconds = excluded.timeout_seconds,
                run_at = excluded.run_at,
                updated_at = excluded.updated_at,
                last_error = excluded.last_error,
                worker_id = NULL
            WHERE jobs.state <> 'processing'
            RETURNING *
            "#,
        )
        .bind(&job.id)
        .bind(&job.command)
        .bind(job.state.as_str())
        .bind(job.attempts)
        .bind(job.max_retries)
        .bind(job.priority)
        .bind(job.timeout_seconds)
        .bind(job.run_at)
        .bind(job.created_at)
        .bind(now)
        .bind(job.last_error.as_deref().map(truncate_error))
        .fetch_optional(&self.pool)
        .await?;

        match stored {
            Some(stored) => Ok(stored),
            None => Err(JobInputError::InProgress(job.id).into()),
        }
    }

    // ----------------------------
    // Reads
    // ----------------------------

    pub async fn get(&self, id: &str) -> anyhow::Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    /// All jobs in creation order, optionally only those in `state`.
    pub async fn list(&self, state: Option<JobState>) -> anyhow::Result<Vec<Job>> {
        let jobs = match state {
            Some(state) => {
                sqlx::query_as::<_, Job>(
                    r#"
                    SELECT * FROM jobs
                    WHERE state = ?1
                    ORDER BY created_at ASC, rowid ASC
                    "#,
                )
                .bind(state.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, Job>("SELECT * FROM jobs ORDER BY created_at ASC, rowid ASC")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Ok(jobs)
    }

    // ----------------------------
    // Claiming
    // ----------------------------

    /// Claim exactly one eligible job for `worker_id`.
    ///
    /// Eligible: `pending` or `failed` with `run_at <= now`. Picks the
    /// smallest `(priority, created_at)`.
    ///
    /// Correctness: a single UPDATE statement. SQLite takes the database
    /// write lock when a write statement starts, so the inner SELECT and the
    /// UPDATE run with no other writer in between; a concurrent claimer
    /// blocks on the busy timeout and then finds the row already
    /// `processing`. The repeated state predicate on the outer UPDATE keeps
    /// the statement a no-op if that ever stops holding.
    pub async fn claim(&self, worker_id: &str) -> anyhow::Result<Option<Job>> {
        let now = Utc::now();
        let job = sqlx::query_as::<_, Job>(
            r#"
            UPDATE jobs
            SET state = 'processing',
                worker_id = ?1,
                updated_at = ?2
            WHERE id = (
                SELECT id
                FROM jobs
                WHERE state IN ('pending', 'failed')
                  AND run_at <= ?2
                ORDER BY priority ASC, created_at ASC, rowid ASC
                LIMIT 1
            )
              AND state IN ('pending', 'failed')
            RETURNING *
            "#,
        )
        .bind(worker_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(job)
    }

    // ----------------------------
    // State transitions
    // ----------------------------

    /// `processing -> completed`. A job in any other state is left alone, so
    /// completing twice changes nothing. Returns the current row, or `None`
    /// if the id is unknown.
    pub async fn complete(&self, id: &str) -> anyhow::Result<Option<Job>> {
        let done = sqlx::query_as::<_, Job>(
            r#"
            UPDATE jobs
            SET state = 'completed',
                worker_id = NULL,
                updated_at = ?2
            WHERE id = ?1
              AND state = 'processing'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        match done {
            Some(job) => Ok(Some(job)),
            None => self.get(id).await,
        }
    }

    /// Record a failed execution of a `processing` job.
    ///
    /// `attempts` is the count before this failure. When `attempts + 1`
    /// exceeds `max_retries` the job goes to `dead`; otherwise it goes to
    /// `failed` and becomes eligible again `delay_seconds` from now. Either
    /// way `worker_id` is cleared. Returns `None` when the job is unknown or
    /// not `processing`.
    pub async fn fail_with_retry(
        &self,
        id: &str,
        attempts: i32,
        max_retries: i32,
        delay_seconds: f64,
        error_message: &str,
    ) -> anyhow::Result<Option<FailOutcome>> {
        let now = Utc::now();
        let next_attempts = attempts + 1;
        let last_error = truncate_error(error_message);

        if exhausted(next_attempts, max_retries) {
            let job = sqlx::query_as::<_, Job>(
                r#"
                UPDATE jobs
                SET state = 'dead',
                    attempts = ?2,
                    last_error = ?3,
                    updated_at = ?4,
                    worker_id = NULL
                WHERE id = ?1
                  AND state = 'processing'
                RETURNING *
                "#,
            )
            .bind(id)
            .bind(next_attempts)
            .bind(&last_error)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;

            return Ok(job.map(|job| FailOutcome {
                is_final: true,
                job,
            }));
        }

        let delay_ms = (delay_seconds.max(0.0) * 1000.0).round() as i64;
        let next_run_at = now + Duration::milliseconds(delay_ms);

        let job = sqlx::query_as::<_, Job>(
            r#"
            UPDATE jobs
            SET state = 'failed',
                attempts = ?2,
                last_error = ?3,
                run_at = ?4,
                updated_at = ?5,
                worker_id = NULL
            WHERE id = ?1
              AND state = 'processing'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(next_attempts)
        .bind(&last_error)
        .bind(next_run_at)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(job.map(|job| FailOutcome {
            is_final: false,
            job,
        }))
    }

    // ----------------------------
    // Dead-letter queue
    // ----------------------------

    pub async fn dlq_list(&self) -> anyhow::Result<Vec<Job>> {
        self.list(Some(JobState::Dead)).await
    }

    /// Put a dead job back in the queue with a fresh retry budget, eligible
    /// immediately. `None` if the job is unknown or not dead.
    pub async fn dlq_retry(&self, id: &str) -> anyhow::Result<Option<Job>> {
        let now = Utc::now();
        let job = sqlx::query_as::<_, Job>(
            r#"
            UPDATE jobs
            SET state = 'pending',
                attempts = 0,
                last_error = NULL,
                worker_id = NULL,
                run_at = ?2,
                updated_at = ?2
            WHERE id = ?1
              AND state = 'dead'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(job)
    }
}
