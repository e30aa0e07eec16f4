use async_trait::async_trait;
use scheduler_core::{SchedulerError, SchedulerResult};
use scheduler_domain::entities::Worker;
use scheduler_domain::repositories::WorkerRepository;
use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::{debug, instrument};

use super::{from_nanos, nanos, version_miss};

const WORKER_COLUMNS: &str = "id, compute_resource_id, experiment_id, user_id, status, \
    current_task_id, connection_state, walltime_nanos, walltime_remaining_nanos, last_heartbeat, \
    registered_at, updated_at, terminated_at, spawn_job_id, metadata, version";

/// PostgreSQL Worker仓储实现
pub struct PostgresWorkerRepository {
    pool: PgPool,
}

impl PostgresWorkerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_worker(row: &PgRow) -> SchedulerResult<Worker> {
        Ok(Worker {
            id: row.try_get("id")?,
            compute_resource_id: row.try_get("compute_resource_id")?,
            experiment_id: row.try_get("experiment_id")?,
            user_id: row.try_get("user_id")?,
            status: row.try_get("status")?,
            current_task_id: row.try_get("current_task_id")?,
            connection_state: row.try_get("connection_state")?,
            walltime: from_nanos(row.try_get("walltime_nanos")?),
            walltime_remaining: from_nanos(row.try_get("walltime_remaining_nanos")?),
            last_heartbeat: row.try_get("last_heartbeat")?,
            registered_at: row.try_get("registered_at")?,
            updated_at: row.try_get("updated_at")?,
            terminated_at: row.try_get("terminated_at")?,
            spawn_job_id: row.try_get("spawn_job_id")?,
            metadata: row.try_get("metadata")?,
            version: row.try_get("version")?,
        })
    }
}

#[async_trait]
impl WorkerRepository for PostgresWorkerRepository {
    #[instrument(skip(self, worker), fields(worker_id = %worker.id))]
    async fn create(&self, worker: &Worker) -> SchedulerResult<Worker> {
        let query = format!(
            "INSERT INTO workers ({WORKER_COLUMNS}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16) \
             RETURNING {WORKER_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(&worker.id)
            .bind(&worker.compute_resource_id)
            .bind(&worker.experiment_id)
            .bind(&worker.user_id)
            .bind(worker.status)
            .bind(&worker.current_task_id)
            .bind(worker.connection_state)
            .bind(nanos(worker.walltime))
            .bind(nanos(worker.walltime_remaining))
            .bind(worker.last_heartbeat)
            .bind(worker.registered_at)
            .bind(worker.updated_at)
            .bind(worker.terminated_at)
            .bind(&worker.spawn_job_id)
            .bind(&worker.metadata)
            .bind(worker.version)
            .fetch_one(&self.pool)
            .await?;

        debug!("注册Worker成功: {}", worker.id);
        Self::row_to_worker(&row)
    }

    async fn get_by_id(&self, id: &str) -> SchedulerResult<Option<Worker>> {
        let query = format!("SELECT {WORKER_COLUMNS} FROM workers WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_worker).transpose()
    }

    async fn list(&self) -> SchedulerResult<Vec<Worker>> {
        let query = format!("SELECT {WORKER_COLUMNS} FROM workers ORDER BY registered_at");
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_worker).collect()
    }

    async fn list_by_experiment(&self, experiment_id: &str) -> SchedulerResult<Vec<Worker>> {
        let query = format!(
            "SELECT {WORKER_COLUMNS} FROM workers WHERE experiment_id = $1 ORDER BY registered_at"
        );
        let rows = sqlx::query(&query)
            .bind(experiment_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_worker).collect()
    }

    #[instrument(skip(self, worker), fields(worker_id = %worker.id, version = worker.version))]
    async fn update(&self, worker: &Worker) -> SchedulerResult<Worker> {
        let query = format!(
            "UPDATE workers SET status = $3, current_task_id = $4, connection_state = $5, \
             walltime_nanos = $6, walltime_remaining_nanos = $7, last_heartbeat = $8, \
             registered_at = $9, updated_at = $10, terminated_at = $11, spawn_job_id = $12, \
             metadata = $13, version = version + 1 \
             WHERE id = $1 AND version = $2 RETURNING {WORKER_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(&worker.id)
            .bind(worker.version)
            .bind(worker.status)
            .bind(&worker.current_task_id)
            .bind(worker.connection_state)
            .bind(nanos(worker.walltime))
            .bind(nanos(worker.walltime_remaining))
            .bind(worker.last_heartbeat)
            .bind(worker.registered_at)
            .bind(worker.updated_at)
            .bind(worker.terminated_at)
            .bind(&worker.spawn_job_id)
            .bind(&worker.metadata)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Self::row_to_worker(&row),
            None => Err(version_miss(
                &self.pool,
                "workers",
                "Worker",
                &worker.id,
                |id| SchedulerError::worker_not_found(id),
            )
            .await),
        }
    }
}
