// Runs a job's shell command and classifies how it ended.

use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::warn;

use crate::jobs::joblog::JobLog;
use crate::jobs::model::Job;

const DRAIN_AFTER_KILL: Duration = Duration::from_secs(2);

/// How one execution ended. Retry decisions are the caller's business.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecOutcome {
    Success,
    Failure { message: String },
}

#[derive(Clone)]
pub struct CommandExecutor {
    log: JobLog,
    shell: String,
}

impl CommandExecutor {
    pub fn new(log: JobLog) -> Self {
        Self {
            log,
            shell: "sh".to_string(),
        }
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    /// Run `job.command` under `sh -c`, streaming stdout and stderr into the
    /// job log as they arrive. A positive `timeout_seconds` kills the whole
    /// process group once it elapses.
    pub async fn run(&self, job: &Job) -> ExecOutcome {
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(&job.command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return ExecOutcome::Failure {
                    message: format!("Spawn failed: {e}"),
                }
            }
        };

        let pgid = child.id().map(|id| Pid::from_raw(id as i32));
        let stdout = child
            .stdout
            .take()
            .map(|out| tokio::spawn(pump(out, self.log.clone(), job.id.clone())));
        let stderr = child
            .stderr
            .take()
            .map(|err| tokio::spawn(pump(err, self.log.clone(), job.id.clone())));

        let waited = if job.timeout_seconds > 0 {
            let limit = Duration::from_secs(job.timeout_seconds as u64);
            match tokio::time::timeout(limit, child.wait()).await {
                Ok(status) => Some(status),
                Err(_) => {
                    if let Some(pgid) = pgid {
                        let _ = killpg(pgid, Signal::SIGKILL);
                    }
                    let _ = child.kill().await;
                    None
                }
            }
        } else {
            Some(child.wait().await)
        };

        // A killed command can leave a detached grandchild holding the pipes
        // open, so after a timeout the output drain gets a deadline too.
        for mut task in [stdout, stderr].into_iter().flatten() {
            if waited.is_some() {
                let _ = task.await;
            } else if tokio::time::timeout(DRAIN_AFTER_KILL, &mut task).await.is_err() {
                warn!(job_id = %job.id, "output still open after kill, abandoning it");
                task.abort();
            }
        }

        match waited {
            None => ExecOutcome::Failure {
                message: format!("Timeout after {}s", job.timeout_seconds),
            },
            Some(Ok(status)) if status.success() => ExecOutcome::Success,
            Some(Ok(status)) => ExecOutcome::Failure {
                message: exit_message(status),
            },
            Some(Err(e)) => ExecOutcome::Failure {
                message: format!("Wait failed: {e}"),
            },
        }
    }
}

async fn pump<R: AsyncRead + Unpin>(mut reader: R, log: JobLog, job_id: String) {
    let mut buf = vec![0u8; 8 * 1024];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if let Err(e) = log.append(&job_id, &buf[..n]).await {
                    warn!(job_id = %job_id, error = %e, "failed to append job output");
                }
            }
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "failed to read job output");
                break;
            }
        }
    }
}

/// `Exit code <code>`, plus ` (signal <NAME>)` when a signal ended the
/// process. Signal deaths carry no exit code and render it as `unknown`.
pub fn exit_message(status: ExitStatus) -> String {
    let code = status
        .code()
        .map(|c| c.to_string())
        .unwrap_or_else(|| "unknown".to_string());

    match status.signal() {
        Some(sig) => {
            let name = Signal::try_from(sig)
                .map(|s| s.as_str().to_string())
                .unwrap_or_else(|_| sig.to_string());
            format!("Exit code {code} (signal {name})")
        }
        None => format!("Exit code {code}"),
    }
}
