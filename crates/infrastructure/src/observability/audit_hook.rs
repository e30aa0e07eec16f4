use async_trait::async_trait;
use scheduler_core::SchedulerResult;
use scheduler_domain::events::{ExperimentStateChange, TaskStateChange, WorkerStateChange};
use scheduler_domain::ports::{
    ExperimentStateChangeHook, TaskStateChangeHook, WorkerStateChangeHook,
};
use tracing::info;

/// 以结构化日志记录每一次状态转换
#[derive(Debug, Default, Clone)]
pub struct AuditLogHook;

impl AuditLogHook {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TaskStateChangeHook for AuditLogHook {
    fn name(&self) -> &str {
        "audit_log"
    }

    async fn on_task_state_change(&self, event: &TaskStateChange) -> SchedulerResult<()> {
        info!(
            target: "audit",
            entity = "task",
            task_id = %event.task_id,
            experiment_id = %event.experiment_id,
            from = event.from.as_str(),
            to = event.to.as_str(),
            message = event.message.as_deref().unwrap_or(""),
            timestamp = %event.timestamp,
            "任务状态变更"
        );
        Ok(())
    }
}

#[async_trait]
impl WorkerStateChangeHook for AuditLogHook {
    fn name(&self) -> &str {
        "audit_log"
    }

    async fn on_worker_state_change(&self, event: &WorkerStateChange) -> SchedulerResult<()> {
        info!(
            target: "audit",
            entity = "worker",
            worker_id = %event.worker_id,
            experiment_id = %event.experiment_id,
            from = event.from.as_str(),
            to = event.to.as_str(),
            message = event.message.as_deref().unwrap_or(""),
            timestamp = %event.timestamp,
            "Worker状态变更"
        );
        Ok(())
    }
}

#[async_trait]
impl ExperimentStateChangeHook for AuditLogHook {
    fn name(&self) -> &str {
        "audit_log"
    }

    async fn on_experiment_state_change(
        &self,
        event: &ExperimentStateChange,
    ) -> SchedulerResult<()> {
        info!(
            target: "audit",
            entity = "experiment",
            experiment_id = %event.experiment_id,
            from = event.from.as_str(),
            to = event.to.as_str(),
            message = event.message.as_deref().unwrap_or(""),
            timestamp = %event.timestamp,
            "实验状态变更"
        );
        Ok(())
    }
}
