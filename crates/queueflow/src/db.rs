use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

const MIGRATE_ATTEMPTS: u32 = 5;

fn env_u64(key: &str, default: u64, min: u64, max: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(default)
        .clamp(min, max)
}

/// Open a pool on the shared SQLite file. Several worker processes hold pools
/// on the same file at once; the busy timeout is what makes a writer wait for
/// another process's write lock instead of failing.
pub async fn make_pool(database_url: &str) -> anyhow::Result<SqlitePool> {
    let max_connections = env_u64("QUEUEFLOW_DB_MAX_CONNECTIONS", 4, 1, 32) as u32;
    let busy_timeout_secs = env_u64("QUEUEFLOW_DB_BUSY_TIMEOUT_SECS", 60, 1, 600);

    let opts = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(busy_timeout_secs));

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(busy_timeout_secs))
        .connect_with(opts)
        .await?;

    Ok(pool)
}

/// Apply pending migrations. Processes that open a fresh file together race
/// to record the same migration version; the loser gets a unique violation
/// (or a busy snapshot) and simply runs again, by which point the winner's
/// row is visible and nothing is left to apply. The schema itself is written
/// with `IF NOT EXISTS`, so a replay is harmless.
pub async fn run_migrations(pool: &SqlitePool) -> anyhow::Result<()> {
    let mut attempt = 1;
    loop {
        match sqlx::migrate!("./migrations").run(pool).await {
            Ok(()) => return Ok(()),
            Err(e) if attempt < MIGRATE_ATTEMPTS => {
                warn!(attempt, error = %e, "migration raced another process, retrying");
                tokio::time::sleep(Duration::from_millis(50 * attempt as u64)).await;
                attempt += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Pool + schema in one step; what every binary does on startup.
pub async fn open(database_url: &str) -> anyhow::Result<SqlitePool> {
    let pool = make_pool(database_url).await?;
    run_migrations(&pool).await?;
    Ok(pool)
}
