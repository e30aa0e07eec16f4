//! 领域仓储抽象
//!
//! `update` 均为版本校验写入：存储中的版本必须等于传入实体的 `version`，
//! 成功后版本加一并返回新实体，版本不一致返回 `ConcurrentModification`。

use async_trait::async_trait;
use scheduler_core::SchedulerResult;
use std::sync::Arc;
use std::time::Duration;

use crate::entities::{Experiment, Task, Worker, WorkerMetrics};

#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn create(&self, task: &Task) -> SchedulerResult<Task>;
    async fn get_by_id(&self, id: &str) -> SchedulerResult<Option<Task>>;
    async fn list_by_experiment(&self, experiment_id: &str) -> SchedulerResult<Vec<Task>>;
    /// 实验中处于 QUEUED 的任务，按创建时间、ID 排序
    async fn find_queued(&self, experiment_id: &str) -> SchedulerResult<Vec<Task>>;
    /// 仍绑定在该Worker上、处理中的任务
    async fn list_active_by_worker(&self, worker_id: &str) -> SchedulerResult<Vec<Task>>;
    async fn update(&self, task: &Task) -> SchedulerResult<Task>;
}

#[async_trait]
pub trait WorkerRepository: Send + Sync {
    async fn create(&self, worker: &Worker) -> SchedulerResult<Worker>;
    async fn get_by_id(&self, id: &str) -> SchedulerResult<Option<Worker>>;
    async fn list(&self) -> SchedulerResult<Vec<Worker>>;
    async fn list_by_experiment(&self, experiment_id: &str) -> SchedulerResult<Vec<Worker>>;
    async fn update(&self, worker: &Worker) -> SchedulerResult<Worker>;
}

#[async_trait]
pub trait ExperimentRepository: Send + Sync {
    async fn create(&self, experiment: &Experiment) -> SchedulerResult<Experiment>;
    async fn get_by_id(&self, id: &str) -> SchedulerResult<Option<Experiment>>;
    async fn update(&self, experiment: &Experiment) -> SchedulerResult<Experiment>;
}

#[async_trait]
pub trait WorkerMetricsRepository: Send + Sync {
    async fn get(&self, worker_id: &str) -> SchedulerResult<Option<WorkerMetrics>>;
    /// 合并心跳上报的资源指标
    async fn record_report(&self, metrics: &WorkerMetrics) -> SchedulerResult<()>;
    async fn record_task_outcome(
        &self,
        worker_id: &str,
        succeeded: bool,
        duration: Option<Duration>,
    ) -> SchedulerResult<()>;
}

/// 调度引擎使用的全部仓储
#[derive(Clone)]
pub struct Repositories {
    pub tasks: Arc<dyn TaskRepository>,
    pub workers: Arc<dyn WorkerRepository>,
    pub experiments: Arc<dyn ExperimentRepository>,
    pub metrics: Arc<dyn WorkerMetricsRepository>,
}
