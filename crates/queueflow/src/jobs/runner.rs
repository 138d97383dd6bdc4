use crate::jobs::{
    model::Job,
    repo::JobsRepo,
    retry::{next_delay_seconds, RetryConfig},
};

/// What happened to a job after one execution.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Completed,
    Rescheduled { delay_seconds: f64, attempts: i32 },
    DeadLettered { attempts: i32 },
    /// The row was no longer `processing` when the result came back.
    Lost,
}

#[derive(Clone)]
pub struct JobRunner {
    jobs: JobsRepo,
}

impl JobRunner {
    pub fn new(jobs: JobsRepo) -> Self {
        Self { jobs }
    }

    pub async fn on_success(&self, job: &Job) -> anyhow::Result<Resolution> {
        match self.jobs.complete(&job.id).await? {
            Some(_) => Ok(Resolution::Completed),
            None => Ok(Resolution::Lost),
        }
    }

    pub async fn on_failure(
        &self,
        job: &Job,
        error_message: &str,
        retry_cfg: &RetryConfig,
    ) -> anyhow::Result<Resolution> {
        // delay is computed for the attempt that just failed
        let delay_seconds = next_delay_seconds(job.attempts + 1, retry_cfg);

        let outcome = self
            .jobs
            .fail_with_retry(
                &job.id,
                job.attempts,
                job.max_retries,
                delay_seconds,
                error_message,
            )
            .await?;

        Ok(match outcome {
            Some(o) if o.is_final => Resolution::DeadLettered {
                attempts: o.job.attempts,
            },
            Some(o) => Resolution::Rescheduled {
                delay_seconds,
                attempts: o.job.attempts,
            },
            None => Resolution::Lost,
        })
    }
}
