use std::future::Future;
use std::sync::Arc;

use scheduler_core::{SchedulerError, SchedulerResult};
use scheduler_domain::entities::{Task, TaskStatus};
use scheduler_domain::ports::DataMover;
use tracing::{debug, warn};

use crate::scheduler::TaskScheduler;

/// 驱动数据搬运并把结果反馈为任务状态信号
pub struct StagingCoordinator {
    scheduler: Arc<TaskScheduler>,
    data_mover: Arc<dyn DataMover>,
}

impl StagingCoordinator {
    pub fn new(scheduler: Arc<TaskScheduler>, data_mover: Arc<dyn DataMover>) -> Self {
        Self {
            scheduler,
            data_mover,
        }
    }

    /// 向Worker暂存输入文件，成功后任务进入 RUNNING，失败按失败规则处理
    ///
    /// 搬运超过 `staging_timeout_seconds` 未返回时同样按暂存失败处理。
    pub async fn stage_inputs(&self, task: &Task) -> SchedulerResult<Task> {
        if task.status != TaskStatus::DataStaging {
            debug!("任务 {} 处于 {}，无需暂存输入", task.id, task.status);
            return Ok(task.clone());
        }
        let (worker_id, user_id) = self.assignment(task).await?;

        let transfer = self
            .data_mover
            .stage_input_to_worker(task, &worker_id, &user_id);
        match self.bounded(transfer).await {
            Ok(()) => self.scheduler.on_staging_complete(&task.id).await,
            Err(e) => {
                warn!("任务 {} 输入暂存到Worker {} 失败: {}", task.id, worker_id, e);
                self.scheduler
                    .on_staging_failed(&task.id, &e.to_string())
                    .await
            }
        }
    }

    /// 从Worker回传输出文件
    pub async fn stage_outputs(&self, task: &Task) -> SchedulerResult<Task> {
        if task.status != TaskStatus::OutputStaging {
            debug!("任务 {} 处于 {}，无需回传输出", task.id, task.status);
            return Ok(task.clone());
        }
        let (worker_id, user_id) = self.assignment(task).await?;

        let transfer = self
            .data_mover
            .stage_output_from_worker(task, &worker_id, &user_id);
        match self.bounded(transfer).await {
            Ok(()) => self.scheduler.on_output_staging_complete(&task.id).await,
            Err(e) => {
                warn!("任务 {} 从Worker {} 回传输出失败: {}", task.id, worker_id, e);
                self.scheduler
                    .fail_task(&task.id, &worker_id, &e.to_string())
                    .await
            }
        }
    }

    async fn bounded<F>(&self, transfer: F) -> SchedulerResult<()>
    where
        F: Future<Output = SchedulerResult<()>>,
    {
        let limit = self.scheduler.config().staging_timeout();
        match tokio::time::timeout(limit, transfer).await {
            Ok(result) => result,
            Err(_) => Err(SchedulerError::Staging(format!(
                "数据搬运超过 {} 秒未完成",
                limit.as_secs()
            ))),
        }
    }

    async fn assignment(&self, task: &Task) -> SchedulerResult<(String, String)> {
        let worker_id = task
            .worker_id
            .clone()
            .ok_or_else(|| SchedulerError::TaskNotAssigned {
                task_id: task.id.clone(),
                worker_id: String::new(),
            })?;
        let worker = self
            .scheduler
            .repositories()
            .workers
            .get_by_id(&worker_id)
            .await?
            .ok_or_else(|| SchedulerError::worker_not_found(&worker_id))?;
        Ok((worker_id, worker.user_id))
    }
}
