//! 任务、Worker、实验三类状态的合法转换表
//!
//! 所有状态写入前都必须经过这里的校验，多步转换按单步逐一校验。

use scheduler_core::{SchedulerError, SchedulerResult};

use crate::entities::{ExperimentStatus, Task, TaskStatus, WorkerStatus};

pub fn valid_task_transitions(from: TaskStatus) -> &'static [TaskStatus] {
    use TaskStatus::*;
    match from {
        Created => &[Queued, Failed, Canceled],
        Queued => &[DataStaging, Failed, Canceled, Queued],
        DataStaging => &[EnvSetup, Failed, Canceled],
        EnvSetup => &[Running, Failed, Canceled],
        Running => &[OutputStaging, Failed, Canceled, Queued],
        OutputStaging => &[Completed, Failed, Canceled],
        Completed | Canceled => &[],
        Failed => &[Queued],
    }
}

pub fn is_valid_task_transition(from: TaskStatus, to: TaskStatus) -> bool {
    valid_task_transitions(from).contains(&to)
}

pub fn is_task_terminal(status: TaskStatus) -> bool {
    valid_task_transitions(status).is_empty()
}

pub fn validate_task_transition(from: TaskStatus, to: TaskStatus) -> SchedulerResult<()> {
    if is_valid_task_transition(from, to) {
        Ok(())
    } else {
        Err(SchedulerError::invalid_transition("任务", from, to))
    }
}

pub fn valid_worker_transitions(from: WorkerStatus) -> &'static [WorkerStatus] {
    match from {
        WorkerStatus::Idle => &[WorkerStatus::Busy],
        WorkerStatus::Busy => &[WorkerStatus::Idle],
    }
}

pub fn is_valid_worker_transition(from: WorkerStatus, to: WorkerStatus) -> bool {
    valid_worker_transitions(from).contains(&to)
}

/// Worker状态没有终态，终止通过连接状态表达
pub fn is_worker_terminal(_status: WorkerStatus) -> bool {
    false
}

pub fn validate_worker_transition(from: WorkerStatus, to: WorkerStatus) -> SchedulerResult<()> {
    if is_valid_worker_transition(from, to) {
        Ok(())
    } else {
        Err(SchedulerError::invalid_transition("Worker", from, to))
    }
}

pub fn valid_experiment_transitions(from: ExperimentStatus) -> &'static [ExperimentStatus] {
    use ExperimentStatus::*;
    match from {
        Created => &[Executing, Canceled],
        Executing => &[Completed, Canceled],
        Completed | Canceled => &[],
    }
}

pub fn is_valid_experiment_transition(from: ExperimentStatus, to: ExperimentStatus) -> bool {
    valid_experiment_transitions(from).contains(&to)
}

pub fn is_experiment_terminal(status: ExperimentStatus) -> bool {
    valid_experiment_transitions(status).is_empty()
}

pub fn validate_experiment_transition(
    from: ExperimentStatus,
    to: ExperimentStatus,
) -> SchedulerResult<()> {
    if is_valid_experiment_transition(from, to) {
        Ok(())
    } else {
        Err(SchedulerError::invalid_transition("实验", from, to))
    }
}

/// 一次已校验的状态跳转
pub type Hop<S> = (S, S);

/// 沿路径逐步推进任务状态，任何一步非法都不会修改任务
pub fn advance_task(task: &mut Task, path: &[TaskStatus]) -> SchedulerResult<Vec<Hop<TaskStatus>>> {
    let mut current = task.status;
    let mut hops = Vec::with_capacity(path.len());
    for &next in path {
        validate_task_transition(current, next)?;
        hops.push((current, next));
        current = next;
    }
    task.status = current;
    Ok(hops)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_table_exact() {
        use TaskStatus::*;
        let expected: &[(TaskStatus, &[TaskStatus])] = &[
            (Created, &[Queued, Failed, Canceled]),
            (Queued, &[DataStaging, Failed, Canceled, Queued]),
            (DataStaging, &[EnvSetup, Failed, Canceled]),
            (EnvSetup, &[Running, Failed, Canceled]),
            (Running, &[OutputStaging, Failed, Canceled, Queued]),
            (OutputStaging, &[Completed, Failed, Canceled]),
            (Completed, &[]),
            (Canceled, &[]),
            (Failed, &[Queued]),
        ];

        for (from, allowed) in expected {
            for to in TaskStatus::ALL {
                assert_eq!(
                    is_valid_task_transition(*from, to),
                    allowed.contains(&to),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(is_task_terminal(TaskStatus::Completed));
        assert!(is_task_terminal(TaskStatus::Canceled));
        assert!(!is_task_terminal(TaskStatus::Failed));
        assert!(is_experiment_terminal(ExperimentStatus::Completed));
        assert!(is_experiment_terminal(ExperimentStatus::Canceled));
        assert!(!is_experiment_terminal(ExperimentStatus::Executing));
        for status in WorkerStatus::ALL {
            assert!(!is_worker_terminal(status));
        }
    }

    #[test]
    fn test_worker_and_experiment_tables() {
        assert!(is_valid_worker_transition(WorkerStatus::Idle, WorkerStatus::Busy));
        assert!(is_valid_worker_transition(WorkerStatus::Busy, WorkerStatus::Idle));
        assert!(!is_valid_worker_transition(WorkerStatus::Idle, WorkerStatus::Idle));

        use ExperimentStatus::*;
        assert!(is_valid_experiment_transition(Created, Executing));
        assert!(is_valid_experiment_transition(Created, Canceled));
        assert!(!is_valid_experiment_transition(Created, Completed));
        assert!(is_valid_experiment_transition(Executing, Completed));
        assert!(!is_valid_experiment_transition(Completed, Executing));
    }

    #[test]
    fn test_advance_task_is_all_or_nothing() {
        let mut task = Task::new("exp-1", "echo", 1);
        task.status = TaskStatus::Queued;

        let hops = advance_task(
            &mut task,
            &[TaskStatus::DataStaging, TaskStatus::EnvSetup, TaskStatus::Running],
        )
        .unwrap();
        assert_eq!(hops.len(), 3);
        assert_eq!(task.status, TaskStatus::Running);

        let err = advance_task(&mut task, &[TaskStatus::OutputStaging, TaskStatus::Queued]);
        assert!(err.is_err());
        assert_eq!(task.status, TaskStatus::Running);
    }
}
