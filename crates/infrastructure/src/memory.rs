//! 进程内存储
//!
//! 每条记录独立加锁，索引只在插入时短暂写锁。版本校验写入只锁定目标记录，
//! 不同任务之间的更新互不阻塞。

mod arena;
mod experiment_repository;
mod metrics_repository;
mod resource_registry;
mod task_repository;
mod worker_repository;

pub use experiment_repository::InMemoryExperimentRepository;
pub use metrics_repository::InMemoryWorkerMetricsRepository;
pub use resource_registry::InMemoryResourceRegistry;
pub use task_repository::InMemoryTaskRepository;
pub use worker_repository::InMemoryWorkerRepository;

use scheduler_domain::Repositories;
use std::sync::Arc;

/// 一组全新的内存仓储
pub fn in_memory_repositories() -> Repositories {
    Repositories {
        tasks: Arc::new(InMemoryTaskRepository::new()),
        workers: Arc::new(InMemoryWorkerRepository::new()),
        experiments: Arc::new(InMemoryExperimentRepository::new()),
        metrics: Arc::new(InMemoryWorkerMetricsRepository::new()),
    }
}
