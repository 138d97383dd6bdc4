use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::warn;

pub const MAX_RETRIES: &str = "max-retries";
pub const BACKOFF_BASE: &str = "backoff-base";
pub const POLL_INTERVAL_MS: &str = "poll-interval-ms";
/// Reserved: stored and listed, but no behavior reads it. Workers claim one
/// job at a time.
pub const CLAIM_BATCH_SIZE: &str = "claim-batch-size";

pub const DEFAULTS: [(&str, &str); 4] = [
    (MAX_RETRIES, "3"),
    (BACKOFF_BASE, "2"),
    (POLL_INTERVAL_MS, "500"),
    (CLAIM_BATCH_SIZE, "1"),
];

pub fn default_for(key: &str) -> Option<&'static str> {
    DEFAULTS.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}

/// Queue tunables shared by every process on the store: `config` table
/// overrides on top of built-in defaults.
#[derive(Clone)]
pub struct SettingsRepo {
    pool: SqlitePool,
}

impl SettingsRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Override if set, else the default, else `None` for unknown keys.
    pub async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM config WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(value.or_else(|| default_for(key).map(str::to_string)))
    }

    pub async fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let key = key.trim();
        if key.is_empty() {
            anyhow::bail!("config key must not be empty");
        }

        sqlx::query(
            r#"
            INSERT INTO config (key, value)
            VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE
            SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Defaults merged with overrides, sorted by key.
    pub async fn list(&self) -> anyhow::Result<BTreeMap<String, String>> {
        let rows: Vec<(String, String)> = sqlx::query_as("SELECT key, value FROM config")
            .fetch_all(&self.pool)
            .await?;

        let mut out: BTreeMap<String, String> = DEFAULTS
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        out.extend(rows);
        Ok(out)
    }

    pub async fn max_retries(&self) -> anyhow::Result<i32> {
        self.parsed(MAX_RETRIES, 3, |v: &i32| *v >= 0).await
    }

    pub async fn backoff_base(&self) -> anyhow::Result<f64> {
        self.parsed(BACKOFF_BASE, 2.0, |v: &f64| v.is_finite()).await
    }

    pub async fn poll_interval(&self) -> anyhow::Result<Duration> {
        let ms = self.parsed(POLL_INTERVAL_MS, 500u64, |v: &u64| *v > 0).await?;
        Ok(Duration::from_millis(ms))
    }

    async fn parsed<T>(&self, key: &str, default: T, valid: impl Fn(&T) -> bool) -> anyhow::Result<T>
    where
        T: std::str::FromStr + Copy,
    {
        let Some(raw) = self.get(key).await? else {
            return Ok(default);
        };
        match raw.trim().parse::<T>() {
            Ok(v) if valid(&v) => Ok(v),
            _ => {
                warn!(key, value = %raw, "ignoring invalid config value, using default");
                Ok(default)
            }
        }
    }
}
