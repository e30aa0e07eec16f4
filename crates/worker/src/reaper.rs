//! 实验结束后回收Worker
//!
//! 作为状态变更钩子注册：实验进入最终状态时终止其空闲Worker，之后释放为 IDLE 的
//! Worker 逐个终止。钩子先于生命周期创建，组装完成后再通过 `bind` 关联。

use std::sync::{Arc, OnceLock, Weak};

use async_trait::async_trait;
use scheduler_core::SchedulerResult;
use scheduler_domain::entities::WorkerStatus;
use scheduler_domain::events::{ExperimentStateChange, WorkerStateChange};
use scheduler_domain::ports::{ExperimentStateChangeHook, WorkerStateChangeHook};
use tracing::{debug, error, warn};

use crate::lifecycle::WorkerLifecycle;

#[derive(Default)]
pub struct ExperimentWorkerReaper {
    lifecycle: OnceLock<Weak<WorkerLifecycle>>,
}

impl ExperimentWorkerReaper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&self, lifecycle: &Arc<WorkerLifecycle>) {
        if self.lifecycle.set(Arc::downgrade(lifecycle)).is_err() {
            warn!("Worker回收钩子重复绑定，保留首次绑定的生命周期");
        }
    }

    fn lifecycle(&self) -> Option<Arc<WorkerLifecycle>> {
        let lifecycle = self.lifecycle.get().and_then(Weak::upgrade);
        if lifecycle.is_none() {
            debug!("Worker回收钩子未绑定生命周期，忽略事件");
        }
        lifecycle
    }
}

// 终止会调用资源侧的取消命令，放到独立任务中执行，不占用钩子分发
#[async_trait]
impl ExperimentStateChangeHook for ExperimentWorkerReaper {
    fn name(&self) -> &str {
        "experiment_worker_reaper"
    }

    async fn on_experiment_state_change(
        &self,
        event: &ExperimentStateChange,
    ) -> SchedulerResult<()> {
        if !event.to.is_final() {
            return Ok(());
        }
        let Some(lifecycle) = self.lifecycle() else {
            return Ok(());
        };
        let experiment_id = event.experiment_id.clone();
        tokio::spawn(async move {
            if let Err(e) = lifecycle.shutdown_experiment_workers(&experiment_id).await {
                error!("回收实验 {} 的Worker失败: {}", experiment_id, e);
            }
        });
        Ok(())
    }
}

#[async_trait]
impl WorkerStateChangeHook for ExperimentWorkerReaper {
    fn name(&self) -> &str {
        "experiment_worker_reaper"
    }

    async fn on_worker_state_change(&self, event: &WorkerStateChange) -> SchedulerResult<()> {
        if event.from != WorkerStatus::Busy || event.to != WorkerStatus::Idle {
            return Ok(());
        }
        let Some(lifecycle) = self.lifecycle() else {
            return Ok(());
        };
        let worker_id = event.worker_id.clone();
        tokio::spawn(async move {
            if let Err(e) = lifecycle.retire_if_experiment_finished(&worker_id).await {
                error!("回收Worker {} 失败: {}", worker_id, e);
            }
        });
        Ok(())
    }
}
