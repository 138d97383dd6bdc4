// Per-process worker loop: claim, execute, resolve, repeat.
// A running command is never interrupted; cancellation only stops further
// claims.

pub mod pidfile;

use std::path::PathBuf;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::jobs::retry::RetryConfig;
use crate::jobs::{CommandExecutor, ExecOutcome, Job, JobLog, JobRunner, JobsRepo, Resolution};
use crate::settings::SettingsRepo;
use crate::workers::WorkersRepo;
use pidfile::PidFile;

/// Tally of what one worker resolved before it stopped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub completed: u64,
    pub rescheduled: u64,
    pub dead_lettered: u64,
    pub lost: u64,
}

impl WorkerStats {
    fn record(&mut self, resolution: &Resolution) {
        match resolution {
            Resolution::Completed => self.completed += 1,
            Resolution::Rescheduled { .. } => self.rescheduled += 1,
            Resolution::DeadLettered { .. } => self.dead_lettered += 1,
            Resolution::Lost => self.lost += 1,
        }
    }
}

pub struct Worker {
    id: String,
    pid: u32,
    pid_dir: PathBuf,
    jobs: JobsRepo,
    registry: WorkersRepo,
    settings: SettingsRepo,
    runner: JobRunner,
    executor: CommandExecutor,
    log: JobLog,
}

impl Worker {
    pub fn new(pool: SqlitePool, cfg: &Config, id: impl Into<String>, pid: u32) -> Self {
        let jobs = JobsRepo::new(pool.clone());
        let log = JobLog::new(&cfg.log_dir);
        Self {
            id: id.into(),
            pid,
            pid_dir: cfg.pid_dir.clone(),
            runner: JobRunner::new(jobs.clone()),
            executor: CommandExecutor::new(log.clone()),
            registry: WorkersRepo::new(pool.clone()),
            settings: SettingsRepo::new(pool),
            jobs,
            log,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Register, poll until `shutdown` fires, then deregister.
    ///
    /// Store errors end the loop and are returned; the pid marker is removed
    /// and the registry row marked `stopped` on the way out either way.
    pub async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<WorkerStats> {
        let poll = self.settings.poll_interval().await?;

        self.registry.register(&self.id, self.pid, Utc::now()).await?;
        let pidfile = match PidFile::create(&self.pid_dir, self.pid) {
            Ok(p) => p,
            Err(e) => {
                let _ = self.registry.mark_stopped(&self.id).await;
                return Err(anyhow::anyhow!(
                    "cannot write pid marker in {}: {e}",
                    self.pid_dir.display()
                ));
            }
        };

        info!(worker_id = %self.id, pid = self.pid, poll_ms = poll.as_millis() as u64, "worker started");

        // Flip to `stopping` the moment shutdown is requested, even mid-job.
        let watcher = {
            let registry = self.registry.clone();
            let id = self.id.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                shutdown.cancelled().await;
                info!(worker_id = %id, "shutdown requested; finishing in-flight work");
                if let Err(e) = registry.mark_stopping(&id).await {
                    warn!(worker_id = %id, error = %e, "failed to mark worker stopping");
                }
            })
        };

        let result = self.poll_loop(&shutdown, poll).await;

        if shutdown.is_cancelled() {
            let _ = watcher.await;
        } else {
            watcher.abort();
        }

        if let Err(e) = pidfile.remove() {
            warn!(worker_id = %self.id, error = %e, "failed to remove pid marker");
        }
        let stopped = self.registry.mark_stopped(&self.id).await;

        let stats = result?;
        stopped?;
        info!(
            worker_id = %self.id,
            completed = stats.completed,
            rescheduled = stats.rescheduled,
            dead_lettered = stats.dead_lettered,
            "worker stopped"
        );
        Ok(stats)
    }

    async fn poll_loop(
        &self,
        shutdown: &CancellationToken,
        poll: Duration,
    ) -> anyhow::Result<WorkerStats> {
        let mut stats = WorkerStats::default();

        while !shutdown.is_cancelled() {
            match self.process_next().await? {
                Some((_, resolution)) => stats.record(&resolution),
                None => {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(poll) => {}
                    }
                }
            }
        }

        Ok(stats)
    }

    /// One claim-execute-resolve cycle. `None` when nothing was eligible.
    pub async fn process_next(&self) -> anyhow::Result<Option<(Job, Resolution)>> {
        let Some(job) = self.jobs.claim(&self.id).await? else {
            return Ok(None);
        };

        info!(worker_id = %self.id, job_id = %job.id, attempts = job.attempts, "claimed job");
        self.mark(
            &job.id,
            format!(
                "\n=== Job {} started at {} ===\nCommand: {}\n",
                job.id,
                now_stamp(),
                job.command
            ),
        )
        .await;

        let resolution = match self.executor.run(&job).await {
            ExecOutcome::Success => {
                let resolution = self.runner.on_success(&job).await?;
                self.mark(
                    &job.id,
                    format!("=== Job {} completed at {} ===\n", job.id, now_stamp()),
                )
                .await;
                info!(worker_id = %self.id, job_id = %job.id, "job completed");
                resolution
            }
            ExecOutcome::Failure { message } => {
                let retry_cfg = RetryConfig::with_base(self.settings.backoff_base().await?);
                let resolution = self.runner.on_failure(&job, &message, &retry_cfg).await?;

                let (label, next_delay) = match &resolution {
                    Resolution::Rescheduled { delay_seconds, .. } => {
                        ("failed", format!("{delay_seconds}s"))
                    }
                    Resolution::DeadLettered { .. } => ("DEAD", "n/a".to_string()),
                    _ => ("failed", "n/a".to_string()),
                };
                self.mark(
                    &job.id,
                    format!(
                        "=== Job {} {} at {} ===\nReason: {}\nNext delay: {}\n",
                        job.id,
                        label,
                        now_stamp(),
                        message,
                        next_delay
                    ),
                )
                .await;
                warn!(
                    worker_id = %self.id,
                    job_id = %job.id,
                    reason = %message,
                    resolution = ?resolution,
                    "job failed"
                );
                resolution
            }
        };

        if resolution == Resolution::Lost {
            warn!(worker_id = %self.id, job_id = %job.id, "job left processing before it was resolved");
        }

        Ok(Some((job, resolution)))
    }

    async fn mark(&self, job_id: &str, text: String) {
        if let Err(e) = self.log.append(job_id, text).await {
            warn!(job_id = %job_id, error = %e, "failed to write job log marker");
        }
    }
}

fn now_stamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
