use queueflow::config::Config;
use queueflow::db;
use queueflow::telemetry;
use queueflow::worker::Worker;

use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init();

    let cfg = Config::from_env()?;
    cfg.ensure_dirs()?;

    let pool = db::open(&cfg.database_url).await?;

    let worker_id = Uuid::new_v4().to_string();
    let pid = std::process::id();
    info!(
        worker_id = %worker_id,
        pid,
        database_url = %cfg.database_url,
        log_dir = %cfg.log_dir.display(),
        "queueflow worker starting"
    );

    let shutdown = CancellationToken::new();
    spawn_signal_adapter(shutdown.clone())?;

    let worker = Worker::new(pool, &cfg, worker_id, pid);
    if let Err(e) = worker.run(shutdown).await {
        error!(worker_id = %worker.id(), error = %e, "worker exited with a store error");
        return Err(e);
    }

    Ok(())
}

/// SIGTERM (what `queuectl worker stop` sends) and Ctrl-C both request a
/// graceful stop. A second signal is ignored; the in-flight job still finishes.
fn spawn_signal_adapter(shutdown: CancellationToken) -> anyhow::Result<()> {
    let mut term = signal(SignalKind::terminate())?;

    tokio::spawn(async move {
        tokio::select! {
            _ = term.recv() => info!("received SIGTERM"),
            _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
        }
        shutdown.cancel();
    });

    Ok(())
}
