use async_trait::async_trait;
use scheduler_core::SchedulerResult;
use std::time::Duration;

use crate::entities::{ComputeResource, ComputeResourceType};
use crate::value_objects::ResourceRequirements;

/// 生成启动脚本所需的全部信息
#[derive(Debug, Clone)]
pub struct SpawnContext {
    pub worker_id: String,
    pub experiment_id: String,
    pub user_id: String,
    pub resource: ComputeResource,
    pub walltime: Duration,
    pub requirements: ResourceRequirements,
    pub worker_binary: String,
    pub server_address: String,
    pub working_dir: String,
}

/// 按资源类型启动Worker的适配器
#[async_trait]
pub trait WorkerSpawner: Send + Sync {
    fn resource_type(&self) -> ComputeResourceType;

    fn generate_worker_spawn_script(&self, ctx: &SpawnContext) -> SchedulerResult<String>;

    /// 提交启动脚本，返回资源侧的作业标识
    async fn submit(&self, ctx: &SpawnContext, script: &str) -> SchedulerResult<String>;

    async fn cancel(&self, job_id: &str) -> SchedulerResult<()>;
}
