pub mod postgres;

pub use postgres::{
    PostgresExperimentRepository, PostgresTaskRepository, PostgresWorkerMetricsRepository,
    PostgresWorkerRepository,
};

use scheduler_core::{config::DatabaseConfig, SchedulerError, SchedulerResult};
use scheduler_domain::Repositories;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// 数据库连接池管理器
pub struct DatabaseManager {
    pool: PgPool,
}

impl DatabaseManager {
    /// 创建连接池，按配置决定是否执行迁移
    pub async fn new(config: &DatabaseConfig) -> SchedulerResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
            .connect(&config.url)
            .await?;

        info!("数据库连接池已创建，最大连接数: {}", config.max_connections);

        let manager = Self { pool };
        if config.run_migrations {
            manager.migrate().await?;
        }
        Ok(manager)
    }

    pub async fn migrate(&self) -> SchedulerResult<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| SchedulerError::DatabaseOperation(format!("执行数据库迁移失败: {e}")))?;
        info!("数据库迁移完成");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn repositories(&self) -> Repositories {
        Repositories {
            tasks: Arc::new(PostgresTaskRepository::new(self.pool.clone())),
            workers: Arc::new(PostgresWorkerRepository::new(self.pool.clone())),
            experiments: Arc::new(PostgresExperimentRepository::new(self.pool.clone())),
            metrics: Arc::new(PostgresWorkerMetricsRepository::new(self.pool.clone())),
        }
    }
}
