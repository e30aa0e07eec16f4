use async_trait::async_trait;
use metrics::counter;
use scheduler_core::SchedulerResult;
use scheduler_domain::entities::TaskStatus;
use scheduler_domain::events::{ExperimentStateChange, TaskStateChange, WorkerStateChange};
use scheduler_domain::ports::{
    ExperimentStateChangeHook, TaskStateChangeHook, WorkerStateChangeHook,
};

/// 指标名称
pub struct SchedulerMetrics;

impl SchedulerMetrics {
    pub const STATE_TRANSITIONS: &'static str = "scheduler_state_transitions_total";
    pub const TASK_RETRIES: &'static str = "scheduler_task_retries_total";
    pub const TASK_PERMANENT_FAILURES: &'static str = "scheduler_task_permanent_failures_total";
}

/// 把状态转换计入 Prometheus 指标
#[derive(Debug, Default, Clone)]
pub struct MetricsHook;

impl MetricsHook {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TaskStateChangeHook for MetricsHook {
    fn name(&self) -> &str {
        "metrics"
    }

    async fn on_task_state_change(&self, event: &TaskStateChange) -> SchedulerResult<()> {
        counter!(
            SchedulerMetrics::STATE_TRANSITIONS,
            "entity" => "task",
            "from" => event.from.as_str(),
            "to" => event.to.as_str()
        )
        .increment(1);

        if event.to == TaskStatus::Queued && event.from != TaskStatus::Created {
            counter!(SchedulerMetrics::TASK_RETRIES).increment(1);
        }
        if event.to == TaskStatus::Failed {
            counter!(SchedulerMetrics::TASK_PERMANENT_FAILURES).increment(1);
        }
        Ok(())
    }
}

#[async_trait]
impl WorkerStateChangeHook for MetricsHook {
    fn name(&self) -> &str {
        "metrics"
    }

    async fn on_worker_state_change(&self, event: &WorkerStateChange) -> SchedulerResult<()> {
        counter!(
            SchedulerMetrics::STATE_TRANSITIONS,
            "entity" => "worker",
            "from" => event.from.as_str(),
            "to" => event.to.as_str()
        )
        .increment(1);
        Ok(())
    }
}

#[async_trait]
impl ExperimentStateChangeHook for MetricsHook {
    fn name(&self) -> &str {
        "metrics"
    }

    async fn on_experiment_state_change(
        &self,
        event: &ExperimentStateChange,
    ) -> SchedulerResult<()> {
        counter!(
            SchedulerMetrics::STATE_TRANSITIONS,
            "entity" => "experiment",
            "from" => event.from.as_str(),
            "to" => event.to.as_str()
        )
        .increment(1);
        Ok(())
    }
}
