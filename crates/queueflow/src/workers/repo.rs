use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::workers::model::Worker;

#[derive(Clone)]
pub struct WorkersRepo {
    pool: SqlitePool,
}

impl WorkersRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn register(
        &self,
        id: &str,
        pid: u32,
        started_at: DateTime<Utc>,
    ) -> anyhow::Result<Worker> {
        let worker = sqlx::query_as::<_, Worker>(
            r#"
            INSERT INTO workers (id, pid, started_at, status)
            VALUES (?1, ?2, ?3, 'running')
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(pid as i64)
        .bind(started_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(worker)
    }

    /// `running -> stopping`. Returns false when the id is unknown or the
    /// worker is already past `running`.
    pub async fn mark_stopping(&self, id: &str) -> anyhow::Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE workers
            SET status = 'stopping'
            WHERE id = ?1
              AND status = 'running'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() > 0)
    }

    /// Returns false when the id is unknown.
    pub async fn mark_stopped(&self, id: &str) -> anyhow::Result<bool> {
        let res = sqlx::query("UPDATE workers SET status = 'stopped' WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(res.rows_affected() > 0)
    }

    pub async fn get(&self, id: &str) -> anyhow::Result<Option<Worker>> {
        let worker = sqlx::query_as::<_, Worker>("SELECT * FROM workers WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(worker)
    }

    pub async fn list(&self) -> anyhow::Result<Vec<Worker>> {
        let workers =
            sqlx::query_as::<_, Worker>("SELECT * FROM workers ORDER BY started_at ASC, rowid ASC")
                .fetch_all(&self.pool)
                .await?;
        Ok(workers)
    }

    /// Delete every `stopped` row; returns how many went.
    pub async fn gc_stopped(&self) -> anyhow::Result<u64> {
        let res = sqlx::query("DELETE FROM workers WHERE status = 'stopped'")
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected())
    }
}
