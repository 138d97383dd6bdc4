use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, SqlitePool};
use std::collections::BTreeMap;

use crate::jobs::JobState;

#[derive(Debug, Clone, Serialize)]
pub struct StatusSummary {
    pub now_utc: DateTime<Utc>,
    /// Every state, zero-filled.
    pub states: BTreeMap<JobState, i64>,
    pub active_workers: i64,
}

impl StatusSummary {
    pub fn count(&self, state: JobState) -> i64 {
        self.states.get(&state).copied().unwrap_or(0)
    }
}

#[derive(FromRow)]
struct TotalsRow {
    pending: i64,
    processing: i64,
    completed: i64,
    failed: i64,
    dead: i64,
}

#[derive(Clone)]
pub struct StatusRepo {
    pool: SqlitePool,
}

impl StatusRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn summary(&self) -> anyhow::Result<StatusSummary> {
        let totals = sqlx::query_as::<_, TotalsRow>(
            r#"
            SELECT
              COUNT(*) FILTER (WHERE state = 'pending')    AS pending,
              COUNT(*) FILTER (WHERE state = 'processing') AS processing,
              COUNT(*) FILTER (WHERE state = 'completed')  AS completed,
              COUNT(*) FILTER (WHERE state = 'failed')     AS failed,
              COUNT(*) FILTER (WHERE state = 'dead')       AS dead
            FROM jobs
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let active_workers: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM workers WHERE status = 'running'")
                .fetch_one(&self.pool)
                .await?;

        let states = BTreeMap::from([
            (JobState::Pending, totals.pending),
            (JobState::Processing, totals.processing),
            (JobState::Completed, totals.completed),
            (JobState::Failed, totals.failed),
            (JobState::Dead, totals.dead),
        ]);

        Ok(StatusSummary {
            now_utc: Utc::now(),
            states,
            active_workers,
        })
    }
}
