use async_trait::async_trait;
use scheduler_core::SchedulerResult;

use crate::entities::{ComputeResource, Resource, Task};

/// 根据参数模板生成实验任务
#[async_trait]
pub trait ExperimentOrchestrator: Send + Sync {
    async fn generate_tasks(&self, experiment_id: &str) -> SchedulerResult<Vec<Task>>;
}

/// 任务输入输出的数据搬运
#[async_trait]
pub trait DataMover: Send + Sync {
    async fn stage_input_to_worker(
        &self,
        task: &Task,
        worker_id: &str,
        user_id: &str,
    ) -> SchedulerResult<()>;

    async fn stage_output_from_worker(
        &self,
        task: &Task,
        worker_id: &str,
        user_id: &str,
    ) -> SchedulerResult<()>;
}

/// 资源注册表的只读视图
#[async_trait]
pub trait ResourceRegistry: Send + Sync {
    async fn get_resource(&self, id: &str) -> SchedulerResult<Option<Resource>>;

    async fn list_compute_resources(&self) -> SchedulerResult<Vec<ComputeResource>>;

    /// 调整资源上的Worker计数，计数只作为优化器的参考值
    async fn adjust_worker_count(&self, _resource_id: &str, _delta: i32) -> SchedulerResult<()> {
        Ok(())
    }
}
