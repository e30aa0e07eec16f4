//! 领域实体

mod experiment;
mod metrics;
mod plan;
mod resource;
mod task;
mod worker;

pub use experiment::{Experiment, ExperimentStatus};
pub use metrics::WorkerMetrics;
pub use plan::{CostWeights, SchedulingPlan, WorkerDistribution};
pub use resource::{
    ComputeResource, ComputeResourceType, Resource, ResourceStatus, StorageResource,
    StorageResourceType,
};
pub use task::{Task, TaskStatus};
pub use worker::{ConnectionState, Worker, WorkerStatus};

/// 状态枚举解析失败
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseStatusError {
    pub kind: &'static str,
    pub value: String,
}

impl std::fmt::Display for ParseStatusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "无效的{}: {}", self.kind, self.value)
    }
}

impl std::error::Error for ParseStatusError {}
