use async_trait::async_trait;
use scheduler_core::{SchedulerError, SchedulerResult};
use scheduler_domain::entities::{Task, TaskStatus};
use scheduler_domain::repositories::TaskRepository;
use scheduler_domain::value_objects::FileMetadata;
use sqlx::{postgres::PgRow, types::Json, PgPool, Row};
use tracing::{debug, instrument};

use super::{from_nanos, nanos, to_u32, version_miss};

const TASK_COLUMNS: &str = "id, experiment_id, status, command, execution_script, input_files, \
    output_files, dependencies, worker_id, compute_resource_id, retry_count, max_retries, \
    created_at, updated_at, started_at, completed_at, staging_started_at, staging_completed_at, \
    duration_nanos, error, result, metadata, version";

/// PostgreSQL任务仓储实现
pub struct PostgresTaskRepository {
    pool: PgPool,
}

impl PostgresTaskRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_task(row: &PgRow) -> SchedulerResult<Task> {
        let input_files: Json<Vec<FileMetadata>> = row.try_get("input_files")?;
        let output_files: Json<Vec<FileMetadata>> = row.try_get("output_files")?;
        let dependencies: Json<Vec<String>> = row.try_get("dependencies")?;
        let duration: Option<i64> = row.try_get("duration_nanos")?;

        Ok(Task {
            id: row.try_get("id")?,
            experiment_id: row.try_get("experiment_id")?,
            status: row.try_get("status")?,
            command: row.try_get("command")?,
            execution_script: row.try_get("execution_script")?,
            input_files: input_files.0,
            output_files: output_files.0,
            dependencies: dependencies.0,
            worker_id: row.try_get("worker_id")?,
            compute_resource_id: row.try_get("compute_resource_id")?,
            retry_count: to_u32(row.try_get("retry_count")?, "retry_count")?,
            max_retries: to_u32(row.try_get("max_retries")?, "max_retries")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            staging_started_at: row.try_get("staging_started_at")?,
            staging_completed_at: row.try_get("staging_completed_at")?,
            duration: duration.map(from_nanos),
            error: row.try_get("error")?,
            result: row.try_get("result")?,
            metadata: row.try_get("metadata")?,
            version: row.try_get("version")?,
        })
    }

    async fn fetch_where(&self, clause: &str, arg: &str) -> SchedulerResult<Vec<Task>> {
        let query = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE {clause}");
        let rows = sqlx::query(&query).bind(arg).fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_task).collect()
    }
}

#[async_trait]
impl TaskRepository for PostgresTaskRepository {
    #[instrument(skip(self, task), fields(task_id = %task.id))]
    async fn create(&self, task: &Task) -> SchedulerResult<Task> {
        let query = format!(
            "INSERT INTO tasks ({TASK_COLUMNS}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, \
              $19, $20, $21, $22, $23) RETURNING {TASK_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(&task.id)
            .bind(&task.experiment_id)
            .bind(task.status)
            .bind(&task.command)
            .bind(&task.execution_script)
            .bind(Json(&task.input_files))
            .bind(Json(&task.output_files))
            .bind(Json(&task.dependencies))
            .bind(&task.worker_id)
            .bind(&task.compute_resource_id)
            .bind(task.retry_count as i32)
            .bind(task.max_retries as i32)
            .bind(task.created_at)
            .bind(task.updated_at)
            .bind(task.started_at)
            .bind(task.completed_at)
            .bind(task.staging_started_at)
            .bind(task.staging_completed_at)
            .bind(task.duration.map(nanos))
            .bind(&task.error)
            .bind(&task.result)
            .bind(&task.metadata)
            .bind(task.version)
            .fetch_one(&self.pool)
            .await?;

        debug!("创建任务成功: {}", task.id);
        Self::row_to_task(&row)
    }

    async fn get_by_id(&self, id: &str) -> SchedulerResult<Option<Task>> {
        let query = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_task).transpose()
    }

    async fn list_by_experiment(&self, experiment_id: &str) -> SchedulerResult<Vec<Task>> {
        self.fetch_where("experiment_id = $1 ORDER BY created_at, id", experiment_id)
            .await
    }

    async fn find_queued(&self, experiment_id: &str) -> SchedulerResult<Vec<Task>> {
        let query = format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE experiment_id = $1 AND status = $2 \
             ORDER BY created_at, id"
        );
        let rows = sqlx::query(&query)
            .bind(experiment_id)
            .bind(TaskStatus::Queued)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_task).collect()
    }

    async fn list_active_by_worker(&self, worker_id: &str) -> SchedulerResult<Vec<Task>> {
        self.fetch_where(
            "worker_id = $1 AND status IN ('DATA_STAGING', 'ENV_SETUP', 'RUNNING', 'OUTPUT_STAGING')",
            worker_id,
        )
        .await
    }

    #[instrument(skip(self, task), fields(task_id = %task.id, version = task.version))]
    async fn update(&self, task: &Task) -> SchedulerResult<Task> {
        let query = format!(
            "UPDATE tasks SET status = $3, command = $4, execution_script = $5, input_files = $6, \
             output_files = $7, dependencies = $8, worker_id = $9, compute_resource_id = $10, \
             retry_count = $11, max_retries = $12, updated_at = $13, started_at = $14, \
             completed_at = $15, staging_started_at = $16, staging_completed_at = $17, \
             duration_nanos = $18, error = $19, result = $20, metadata = $21, \
             version = version + 1 \
             WHERE id = $1 AND version = $2 RETURNING {TASK_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(&task.id)
            .bind(task.version)
            .bind(task.status)
            .bind(&task.command)
            .bind(&task.execution_script)
            .bind(Json(&task.input_files))
            .bind(Json(&task.output_files))
            .bind(Json(&task.dependencies))
            .bind(&task.worker_id)
            .bind(&task.compute_resource_id)
            .bind(task.retry_count as i32)
            .bind(task.max_retries as i32)
            .bind(task.updated_at)
            .bind(task.started_at)
            .bind(task.completed_at)
            .bind(task.staging_started_at)
            .bind(task.staging_completed_at)
            .bind(task.duration.map(nanos))
            .bind(&task.error)
            .bind(&task.result)
            .bind(&task.metadata)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Self::row_to_task(&row),
            None => Err(version_miss(
                &self.pool,
                "tasks",
                "任务",
                &task.id,
                |id| SchedulerError::task_not_found(id),
            )
            .await),
        }
    }
}
