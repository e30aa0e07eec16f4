use async_trait::async_trait;
use scheduler_core::SchedulerResult;

use crate::events::{ExperimentStateChange, TaskStateChange, WorkerStateChange};

/// 任务状态变更观察者
///
/// 钩子在独立的分发任务中执行，返回错误只会被记录，不影响已提交的状态转换。
#[async_trait]
pub trait TaskStateChangeHook: Send + Sync {
    fn name(&self) -> &str;

    async fn on_task_state_change(&self, event: &TaskStateChange) -> SchedulerResult<()>;
}

#[async_trait]
pub trait WorkerStateChangeHook: Send + Sync {
    fn name(&self) -> &str;

    async fn on_worker_state_change(&self, event: &WorkerStateChange) -> SchedulerResult<()>;
}

#[async_trait]
pub trait ExperimentStateChangeHook: Send + Sync {
    fn name(&self) -> &str;

    async fn on_experiment_state_change(&self, event: &ExperimentStateChange)
        -> SchedulerResult<()>;
}
