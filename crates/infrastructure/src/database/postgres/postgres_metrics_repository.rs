use async_trait::async_trait;
use chrono::Utc;
use scheduler_core::SchedulerResult;
use scheduler_domain::entities::WorkerMetrics;
use scheduler_domain::repositories::WorkerMetricsRepository;
use sqlx::{postgres::PgRow, types::Json, PgPool, Postgres, Row, Transaction};
use std::collections::HashMap;
use std::time::Duration;

use super::{from_nanos, nanos};

pub struct PostgresWorkerMetricsRepository {
    pool: PgPool,
}

impl PostgresWorkerMetricsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_metrics(row: &PgRow) -> SchedulerResult<WorkerMetrics> {
        let custom: Json<HashMap<String, String>> = row.try_get("custom_metrics")?;
        let completed: i64 = row.try_get("tasks_completed")?;
        let failed: i64 = row.try_get("tasks_failed")?;

        Ok(WorkerMetrics {
            worker_id: row.try_get("worker_id")?,
            cpu_usage_percent: row.try_get("cpu_usage_percent")?,
            memory_usage_percent: row.try_get("memory_usage_percent")?,
            tasks_completed: completed.max(0) as u64,
            tasks_failed: failed.max(0) as u64,
            average_task_duration: from_nanos(row.try_get("average_task_duration_nanos")?),
            last_task_duration: from_nanos(row.try_get("last_task_duration_nanos")?),
            uptime: from_nanos(row.try_get("uptime_nanos")?),
            custom_metrics: custom.0,
            timestamp: row.try_get("updated_at")?,
        })
    }

    async fn lock_row(
        tx: &mut Transaction<'_, Postgres>,
        worker_id: &str,
    ) -> SchedulerResult<WorkerMetrics> {
        let row = sqlx::query("SELECT * FROM worker_metrics WHERE worker_id = $1 FOR UPDATE")
            .bind(worker_id)
            .fetch_optional(&mut **tx)
            .await?;
        match row {
            Some(row) => Self::row_to_metrics(&row),
            None => Ok(WorkerMetrics::new(worker_id)),
        }
    }

    async fn upsert(
        tx: &mut Transaction<'_, Postgres>,
        metrics: &WorkerMetrics,
    ) -> SchedulerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO worker_metrics (worker_id, cpu_usage_percent, memory_usage_percent,
                tasks_completed, tasks_failed, average_task_duration_nanos, last_task_duration_nanos,
                uptime_nanos, custom_metrics, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (worker_id) DO UPDATE SET
                cpu_usage_percent = EXCLUDED.cpu_usage_percent,
                memory_usage_percent = EXCLUDED.memory_usage_percent,
                tasks_completed = EXCLUDED.tasks_completed,
                tasks_failed = EXCLUDED.tasks_failed,
                average_task_duration_nanos = EXCLUDED.average_task_duration_nanos,
                last_task_duration_nanos = EXCLUDED.last_task_duration_nanos,
                uptime_nanos = EXCLUDED.uptime_nanos,
                custom_metrics = EXCLUDED.custom_metrics,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&metrics.worker_id)
        .bind(metrics.cpu_usage_percent)
        .bind(metrics.memory_usage_percent)
        .bind(metrics.tasks_completed as i64)
        .bind(metrics.tasks_failed as i64)
        .bind(nanos(metrics.average_task_duration))
        .bind(nanos(metrics.last_task_duration))
        .bind(nanos(metrics.uptime))
        .bind(Json(&metrics.custom_metrics))
        .bind(Utc::now())
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl WorkerMetricsRepository for PostgresWorkerMetricsRepository {
    async fn get(&self, worker_id: &str) -> SchedulerResult<Option<WorkerMetrics>> {
        let row = sqlx::query("SELECT * FROM worker_metrics WHERE worker_id = $1")
            .bind(worker_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_metrics).transpose()
    }

    async fn record_report(&self, reported: &WorkerMetrics) -> SchedulerResult<()> {
        let mut tx = self.pool.begin().await?;
        let mut stored = Self::lock_row(&mut tx, &reported.worker_id).await?;
        stored.merge_reported(reported);
        Self::upsert(&mut tx, &stored).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn record_task_outcome(
        &self,
        worker_id: &str,
        succeeded: bool,
        duration: Option<Duration>,
    ) -> SchedulerResult<()> {
        let mut tx = self.pool.begin().await?;
        let mut stored = Self::lock_row(&mut tx, worker_id).await?;
        stored.record_outcome(succeeded, duration);
        Self::upsert(&mut tx, &stored).await?;
        tx.commit().await?;
        Ok(())
    }
}
