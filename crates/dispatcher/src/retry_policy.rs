use std::time::Duration;

use chrono::{DateTime, Utc};
use scheduler_core::{SchedulerError, SchedulerResult};
use scheduler_domain::entities::{Task, TaskStatus};
use scheduler_domain::state_machine::{advance_task, Hop};

/// 任务失败时合成的Worker失效原因
pub const WORKER_FAILURE_MESSAGE: &str = "worker failure/timeout";

/// 失败信号对任务的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// 重新入队，携带新的重试次数
    Requeued { retry_count: u32 },
    /// 重试次数耗尽
    PermanentlyFailed,
    /// 实验已不再执行，任务直接取消
    Canceled,
}

impl FailureOutcome {
    /// 任务已进入最终状态
    pub fn is_final(&self) -> bool {
        !matches!(self, FailureOutcome::Requeued { .. })
    }
}

/// 对任务应用一次失败
///
/// 重试次数未用完时任务回到 QUEUED 并清除分配信息，否则进入 FAILED 并记录完成时间。
/// 已处于 COMPLETED、CANCELED、FAILED 的任务拒绝失败信号，任务保持不变。
pub fn apply_failure(
    task: &mut Task,
    message: &str,
    now: DateTime<Utc>,
) -> SchedulerResult<(FailureOutcome, Vec<Hop<TaskStatus>>)> {
    if task.status.is_final() {
        return Err(SchedulerError::TaskAlreadyFinal {
            id: task.id.clone(),
            status: task.status.to_string(),
        });
    }

    if task.can_retry() {
        // RUNNING 和 QUEUED 可以直接回到队列，其余处理中的状态经由 FAILED 重新入队
        let path: &[TaskStatus] = match task.status {
            TaskStatus::Running | TaskStatus::Queued => &[TaskStatus::Queued],
            _ => &[TaskStatus::Failed, TaskStatus::Queued],
        };
        let hops = advance_task(task, path)?;
        task.retry_count += 1;
        task.clear_assignment();
        task.error = Some(message.to_string());
        task.updated_at = now;
        Ok((
            FailureOutcome::Requeued {
                retry_count: task.retry_count,
            },
            hops,
        ))
    } else {
        let hops = advance_task(task, &[TaskStatus::Failed])?;
        task.error = Some(message.to_string());
        task.completed_at = Some(now);
        task.updated_at = now;
        Ok((FailureOutcome::PermanentlyFailed, hops))
    }
}

/// 所属实验已停止接收任务时的失败处理
///
/// 不再重新入队，任务进入 CANCELED，重试次数保持不变。
pub fn cancel_on_failure(
    task: &mut Task,
    message: &str,
    now: DateTime<Utc>,
) -> SchedulerResult<(FailureOutcome, Vec<Hop<TaskStatus>>)> {
    if task.status.is_final() {
        return Err(SchedulerError::TaskAlreadyFinal {
            id: task.id.clone(),
            status: task.status.to_string(),
        });
    }

    let hops = advance_task(task, &[TaskStatus::Canceled])?;
    task.clear_assignment();
    task.error = Some(message.to_string());
    task.completed_at = Some(now);
    task.updated_at = now;
    Ok((FailureOutcome::Canceled, hops))
}

/// 乐观锁冲突退避配置
#[derive(Debug, Clone)]
pub struct ConflictBackoff {
    pub base: Duration,
    pub max: Duration,
    /// 随机抖动范围（0.0-1.0）
    pub jitter_factor: f64,
}

impl Default for ConflictBackoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(2),
            max: Duration::from_millis(100),
            jitter_factor: 0.5,
        }
    }
}

impl ConflictBackoff {
    pub fn with_base(base: Duration) -> Self {
        Self {
            base,
            ..Self::default()
        }
    }

    /// 第 attempt 次冲突后的等待时长
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base.as_secs_f64();
        let exponential = base * 2f64.powi(attempt.min(16) as i32);
        let capped = exponential.min(self.max.as_secs_f64());
        let jitter = capped * self.jitter_factor * (rand::random::<f64>() - 0.5) * 2.0;
        Duration::from_secs_f64((capped + jitter).max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scheduler_testing_utils::TaskBuilder;

    #[test]
    fn test_retry_from_running_goes_straight_to_queue() {
        let mut task = TaskBuilder::new()
            .with_status(TaskStatus::Running)
            .with_max_retries(2)
            .assigned_to("w-1", "r-1")
            .build();

        let (outcome, hops) = apply_failure(&mut task, "boom", Utc::now()).unwrap();

        assert_eq!(outcome, FailureOutcome::Requeued { retry_count: 1 });
        assert_eq!(hops, vec![(TaskStatus::Running, TaskStatus::Queued)]);
        assert_eq!(task.status, TaskStatus::Queued);
        assert!(task.worker_id.is_none());
        assert!(task.compute_resource_id.is_none());
        assert!(task.completed_at.is_none());
        assert_eq!(task.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_retry_from_staging_passes_through_failed() {
        let mut task = TaskBuilder::new()
            .with_status(TaskStatus::DataStaging)
            .assigned_to("w-1", "r-1")
            .build();

        let (_, hops) = apply_failure(&mut task, "staging", Utc::now()).unwrap();

        assert_eq!(
            hops,
            vec![
                (TaskStatus::DataStaging, TaskStatus::Failed),
                (TaskStatus::Failed, TaskStatus::Queued)
            ]
        );
        assert_eq!(task.status, TaskStatus::Queued);
    }

    #[test]
    fn test_exhausted_budget_fails_permanently() {
        let mut task = TaskBuilder::new()
            .with_status(TaskStatus::Running)
            .with_max_retries(1)
            .with_retry_count(1)
            .assigned_to("w-1", "r-1")
            .build();

        let (outcome, _) = apply_failure(&mut task, "final", Utc::now()).unwrap();

        assert_eq!(outcome, FailureOutcome::PermanentlyFailed);
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.retry_count, 1);
        assert!(task.completed_at.is_some());
    }

    #[test]
    fn test_final_task_rejected_unchanged() {
        for status in [TaskStatus::Completed, TaskStatus::Canceled, TaskStatus::Failed] {
            let mut task = TaskBuilder::new().with_status(status).build();
            let before = task.clone();
            let err = apply_failure(&mut task, "late", Utc::now()).unwrap_err();
            assert!(matches!(err, SchedulerError::TaskAlreadyFinal { .. }));
            assert_eq!(task, before);
        }
    }

    #[test]
    fn test_cancel_on_failure_keeps_retry_budget() {
        let mut task = TaskBuilder::new()
            .with_status(TaskStatus::EnvSetup)
            .with_max_retries(3)
            .assigned_to("w-1", "r-1")
            .build();

        let (outcome, hops) = cancel_on_failure(&mut task, "实验已取消", Utc::now()).unwrap();

        assert_eq!(outcome, FailureOutcome::Canceled);
        assert_eq!(hops, vec![(TaskStatus::EnvSetup, TaskStatus::Canceled)]);
        assert_eq!(task.retry_count, 0);
        assert!(task.worker_id.is_none());
        assert!(task.completed_at.is_some());

        let err = cancel_on_failure(&mut task, "again", Utc::now()).unwrap_err();
        assert!(matches!(err, SchedulerError::TaskAlreadyFinal { .. }));
    }

    #[test]
    fn test_conflict_backoff_bounded() {
        let backoff = ConflictBackoff::default();
        for attempt in 0..20 {
            let delay = backoff.delay(attempt);
            assert!(delay <= backoff.max + backoff.max / 2);
        }
    }
}
