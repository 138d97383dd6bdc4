// queuectl: submit and inspect jobs, manage worker processes.

use std::path::PathBuf;
use std::process::Stdio;
use std::str::FromStr;

use anyhow::Context;
use clap::{Parser, Subcommand};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use serde::Serialize;
use tracing::{info, warn};

use queueflow::admin::StatusRepo;
use queueflow::api::{self, ApiState};
use queueflow::config::Config;
use queueflow::db;
use queueflow::jobs::input::parse_run_at;
use queueflow::jobs::{JobInput, JobLog, JobState, JobsRepo, SubmitDefaults};
use queueflow::settings::SettingsRepo;
use queueflow::telemetry;
use queueflow::worker::pidfile::list_pid_files;
use queueflow::workers::WorkersRepo;

const WORKER_BIN: &str = "queueflow-worker";

#[derive(Parser)]
#[command(name = "queuectl")]
#[command(about = "Background job queue with workers, retries, and DLQ", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a job to the queue (or re-queue an existing id)
    Enqueue {
        /// JSON job description, at least {"command": "..."}
        job_json: String,
        /// Custom job id
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        max_retries: Option<i64>,
        /// Lower number runs first
        #[arg(long)]
        priority: Option<i64>,
        /// Seconds before the command is killed; 0 disables
        #[arg(long = "timeout")]
        timeout_seconds: Option<i64>,
        /// RFC 3339 timestamp or "now"
        #[arg(long)]
        run_at: Option<String>,
    },
    /// Manage worker processes
    Worker {
        #[command(subcommand)]
        command: WorkerCommands,
    },
    /// Job counts by state and registered workers
    Status,
    /// List jobs, optionally filtered by state
    List {
        /// pending | processing | completed | failed | dead
        #[arg(long)]
        state: Option<String>,
    },
    /// Print a job's output log
    Logs { job_id: String },
    /// Dead letter queue operations
    Dlq {
        #[command(subcommand)]
        command: DlqCommands,
    },
    /// Queue settings shared by all workers
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Serve the admin HTTP API
    Serve {
        #[arg(long, env = "QUEUEFLOW_ADMIN_ADDR")]
        addr: Option<String>,
    },
}

#[derive(Subcommand)]
enum WorkerCommands {
    /// Start detached worker processes
    Start {
        #[arg(long, default_value = "1")]
        count: u32,
    },
    /// Ask every recorded worker to finish its current job and exit
    Stop,
}

#[derive(Subcommand)]
enum DlqCommands {
    List,
    /// Move a dead job back to pending with a fresh retry budget
    Retry { job_id: String },
}

#[derive(Subcommand)]
enum ConfigCommands {
    Get { key: String },
    Set { key: String, value: String },
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init();
    let cli = Cli::parse();

    let cfg = Config::from_env()?;
    cfg.ensure_dirs()?;

    // Migrate once here so freshly started workers find the schema in place.
    let pool = db::open(&cfg.database_url).await?;

    let command = match cli.command {
        Commands::Worker { command } => {
            return match command {
                WorkerCommands::Start { count } => start_workers(&cfg, count),
                WorkerCommands::Stop => stop_workers(&cfg),
            };
        }
        other => other,
    };

    let jobs = JobsRepo::new(pool.clone());
    let settings = SettingsRepo::new(pool.clone());

    match command {
        Commands::Enqueue {
            job_json,
            id,
            max_retries,
            priority,
            timeout_seconds,
            run_at,
        } => {
            let run_at = run_at.filter(|raw| match parse_run_at(raw) {
                Ok(_) => true,
                Err(_) => {
                    warn!(run_at = %raw, "invalid --run-at value, defaulting to now");
                    false
                }
            });

            let input = JobInput::from_json(&job_json)?.merge(JobInput {
                id,
                command: None,
                max_retries,
                priority,
                timeout_seconds,
                run_at,
            });
            let defaults = SubmitDefaults {
                max_retries: settings.max_retries().await?,
                ..SubmitDefaults::default()
            };

            let job = jobs.upsert(input.into_new_job(&defaults)?).await?;
            info!(job_id = %job.id, "enqueued job");
            print_json(&job)?;
        }

        Commands::Status => {
            let workers = WorkersRepo::new(pool.clone());
            let removed = workers.gc_stopped().await?;
            if removed > 0 {
                info!(removed, "cleared stopped workers");
            }

            let summary = StatusRepo::new(pool.clone()).summary().await?;
            println!("{:<12} {:>8}", "STATE", "COUNT");
            for (state, count) in &summary.states {
                println!("{:<12} {:>8}", state.as_str(), count);
            }
            println!("Active workers: {}", summary.active_workers);

            let registered = workers.list().await?;
            if !registered.is_empty() {
                println!("\nWorkers:");
                for w in registered {
                    println!(
                        "- id={} pid={} status={} started_at={}",
                        w.id,
                        w.pid,
                        w.status,
                        w.started_at.to_rfc3339()
                    );
                }
            }
        }

        Commands::List { state } => {
            let filter = state.as_deref().map(JobState::from_str).transpose()?;
            print_json(&jobs.list(filter).await?)?;
        }

        Commands::Logs { job_id } => match JobLog::new(&cfg.log_dir).read(&job_id).await? {
            Some(bytes) => {
                use std::io::Write;
                std::io::stdout().write_all(&bytes)?;
            }
            None => warn!(job_id = %job_id, "no logs for job"),
        },

        Commands::Dlq { command } => match command {
            DlqCommands::List => print_json(&jobs.dlq_list().await?)?,
            DlqCommands::Retry { job_id } => match jobs.dlq_retry(&job_id).await? {
                Some(job) => {
                    info!(job_id = %job_id, "re-enqueued dead job");
                    print_json(&job)?;
                }
                None => warn!(job_id = %job_id, "job not found in DLQ"),
            },
        },

        Commands::Config { command } => match command {
            ConfigCommands::Get { key } => match settings.get(&key).await? {
                Some(value) => println!("{value}"),
                None => warn!(key = %key, "config key is not set"),
            },
            ConfigCommands::Set { key, value } => {
                settings.set(&key, &value).await?;
                info!(key = %key, value = %value, "config updated");
            }
            ConfigCommands::List => print_json(&settings.list().await?)?,
        },

        Commands::Serve { addr } => {
            let addr = addr.unwrap_or_else(|| cfg.admin_addr.clone());
            let state = ApiState::new(pool, JobLog::new(&cfg.log_dir));
            let listener = tokio::net::TcpListener::bind(&addr)
                .await
                .with_context(|| format!("cannot bind admin API on {addr}"))?;
            info!(addr = %addr, "admin API listening");
            axum::serve(listener, api::router(state))
                .with_graceful_shutdown(async {
                    let _ = tokio::signal::ctrl_c().await;
                })
                .await?;
        }

        Commands::Worker { .. } => {}
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn worker_bin(cfg: &Config) -> anyhow::Result<PathBuf> {
    if let Some(bin) = &cfg.worker_bin {
        return Ok(bin.clone());
    }
    let exe = std::env::current_exe().context("cannot locate queuectl executable")?;
    Ok(exe.with_file_name(WORKER_BIN))
}

fn start_workers(cfg: &Config, count: u32) -> anyhow::Result<()> {
    let bin = worker_bin(cfg)?;

    for n in 1..=count {
        let log_path = cfg.log_dir.join(format!("worker-{n}.log"));
        let log = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .with_context(|| format!("cannot open {}", log_path.display()))?;

        let child = std::process::Command::new(&bin)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(log))
            .spawn()
            .with_context(|| format!("cannot start {}", bin.display()))?;
        info!(pid = child.id(), log = %log_path.display(), "started worker");
    }

    info!(count, "started worker(s)");
    Ok(())
}

fn stop_workers(cfg: &Config) -> anyhow::Result<()> {
    let mut signalled = 0u32;

    for (path, pid) in list_pid_files(&cfg.pid_dir)? {
        match kill(Pid::from_raw(pid), Signal::SIGTERM) {
            Ok(()) => signalled += 1,
            Err(Errno::ESRCH) => {
                warn!(pid, "worker is gone, removing stale pid marker");
                let _ = std::fs::remove_file(&path);
            }
            Err(e) => warn!(pid, error = %e, "failed to signal worker"),
        }
    }

    info!(signalled, "signaled worker(s) to stop");
    Ok(())
}
