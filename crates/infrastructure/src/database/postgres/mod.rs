mod postgres_experiment_repository;
mod postgres_metrics_repository;
mod postgres_task_repository;
mod postgres_worker_repository;

pub use postgres_experiment_repository::PostgresExperimentRepository;
pub use postgres_metrics_repository::PostgresWorkerMetricsRepository;
pub use postgres_task_repository::PostgresTaskRepository;
pub use postgres_worker_repository::PostgresWorkerRepository;

use scheduler_core::{SchedulerError, SchedulerResult};
use sqlx::PgPool;
use std::time::Duration;

use scheduler_domain::value_objects::duration_nanos;

pub(crate) fn nanos(duration: Duration) -> i64 {
    duration_nanos::to_nanos(duration)
}

pub(crate) fn from_nanos(nanos: i64) -> Duration {
    duration_nanos::from_nanos(nanos)
}

/// 版本校验写入未命中时，区分记录不存在和版本冲突
pub(crate) async fn version_miss(
    pool: &PgPool,
    table: &'static str,
    entity: &'static str,
    id: &str,
    not_found: fn(&str) -> SchedulerError,
) -> SchedulerError {
    let query = format!("SELECT 1 FROM {table} WHERE id = $1");
    match sqlx::query(&query).bind(id).fetch_optional(pool).await {
        Ok(Some(_)) => SchedulerError::concurrent_modification(entity, id),
        Ok(None) => not_found(id),
        Err(e) => SchedulerError::Database(e),
    }
}

pub(crate) fn to_u32(value: i32, field: &str) -> SchedulerResult<u32> {
    u32::try_from(value)
        .map_err(|_| SchedulerError::DatabaseOperation(format!("字段 {field} 取值为负: {value}")))
}
