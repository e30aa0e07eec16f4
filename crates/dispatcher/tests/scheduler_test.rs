mod common;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{Harness, EXPERIMENT_ID, RESOURCE_ID};
use scheduler_core::config::SchedulerConfig;
use scheduler_core::{SchedulerError, SchedulerResult};
use scheduler_dispatcher::{DistributionOptimizer, TaskScheduler, WORKER_FAILURE_MESSAGE};
use scheduler_domain::entities::{ExperimentStatus, Task, TaskStatus, WorkerStatus};
use scheduler_domain::repositories::{Repositories, TaskRepository};
use scheduler_infrastructure::in_memory_repositories;
use tokio::sync::Notify;
use scheduler_testing_utils::{ExperimentBuilder, StaticOrchestrator, TaskBuilder, WorkerBuilder};

#[tokio::test]
async fn test_retry_monotonicity() {
    let h = Harness::new().await;
    h.executing_experiment().await;
    let task = h.queued_tasks(1, 3).await.remove(0);
    h.idle_worker("w-1").await;

    for attempt in 1..=3 {
        let assigned = h.scheduler.assign_task("w-1").await.unwrap().unwrap();
        assert_eq!(assigned.id, task.id);
        assert_eq!(assigned.status, TaskStatus::Running);

        let failed = h
            .scheduler
            .fail_task(&task.id, "w-1", &format!("attempt {attempt}"))
            .await
            .unwrap();
        assert_eq!(failed.status, TaskStatus::Queued);
        assert_eq!(failed.retry_count, attempt);
        assert!(failed.worker_id.is_none());
        assert!(failed.compute_resource_id.is_none());
        assert!(failed.completed_at.is_none());
        assert_eq!(h.worker("w-1").await.status, WorkerStatus::Idle);
    }

    h.scheduler.assign_task("w-1").await.unwrap().unwrap();
    let failed = h.scheduler.fail_task(&task.id, "w-1", "last").await.unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);
    assert_eq!(failed.retry_count, 3);
    assert!(failed.completed_at.is_some());
    assert_eq!(failed.error.as_deref(), Some("last"));

    assert_eq!(h.experiment().await.status, ExperimentStatus::Canceled);
}

#[tokio::test]
async fn test_zero_max_retries_fails_immediately() {
    let h = Harness::new().await;
    h.executing_experiment().await;
    let task = h.queued_tasks(1, 0).await.remove(0);
    h.idle_worker("w-1").await;

    h.scheduler.assign_task("w-1").await.unwrap().unwrap();
    let failed = h.scheduler.fail_task(&task.id, "w-1", "boom").await.unwrap();

    assert_eq!(failed.status, TaskStatus::Failed);
    assert_eq!(failed.retry_count, 0);
    assert!(failed.completed_at.is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_failures_are_isolated() {
    let h = Harness::new().await;
    h.executing_experiment().await;

    let mut ids = Vec::new();
    for _ in 0..5 {
        let task = h
            .create_task(
                TaskBuilder::new()
                    .with_status(TaskStatus::Running)
                    .with_max_retries(2)
                    .assigned_to("w-1", RESOURCE_ID)
                    .build(),
            )
            .await;
        ids.push(task.id);
    }
    h.repos()
        .workers
        .create(&WorkerBuilder::new().with_id("w-1").busy_with(&ids[0]).build())
        .await
        .unwrap();

    let handles: Vec<_> = ids
        .iter()
        .cloned()
        .map(|id| {
            let scheduler = h.scheduler.clone();
            tokio::spawn(async move { scheduler.fail_task(&id, "w-1", "crash").await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    for id in &ids {
        let task = h.task(id).await;
        assert_eq!(task.status, TaskStatus::Queued);
        assert_eq!(task.retry_count, 1);
        assert!(task.worker_id.is_none());
    }
    assert_eq!(h.worker("w-1").await.status, WorkerStatus::Idle);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_no_double_assignment() {
    let h = Harness::new().await;
    h.executing_experiment().await;
    h.queued_tasks(5, 1).await;

    let workers: Vec<String> = (0..8).map(|i| format!("w-{i}")).collect();
    for id in &workers {
        h.idle_worker(id).await;
    }

    let handles = workers.iter().cloned().map(|id| {
        let scheduler = h.scheduler.clone();
        tokio::spawn(async move { (id.clone(), scheduler.assign_task(&id).await) })
    });
    let results = futures::future::join_all(handles).await;

    let mut assigned = HashSet::new();
    for joined in results {
        let (worker_id, result) = joined.unwrap();
        if let Some(task) = result.unwrap() {
            assert!(assigned.insert(task.id.clone()), "任务 {} 被分配了两次", task.id);
            assert_eq!(task.worker_id.as_deref(), Some(worker_id.as_str()));
            let worker = h.worker(&worker_id).await;
            assert_eq!(worker.status, WorkerStatus::Busy);
            assert_eq!(worker.current_task_id.as_deref(), Some(task.id.as_str()));
        } else {
            let worker = h.worker(&worker_id).await;
            assert_eq!(worker.status, WorkerStatus::Idle);
            assert!(worker.current_task_id.is_none());
        }
    }
    assert_eq!(assigned.len(), 5);
}

#[tokio::test]
async fn test_unknown_ids_are_not_found() {
    let h = Harness::new().await;
    h.executing_experiment().await;
    let task = h.queued_tasks(1, 2).await.remove(0);
    h.idle_worker("w-1").await;
    h.scheduler.assign_task("w-1").await.unwrap().unwrap();

    let err = h.scheduler.fail_task("missing", "w-1", "x").await.unwrap_err();
    assert!(matches!(err, SchedulerError::TaskNotFound { .. }));

    let before = h.task(&task.id).await;
    let err = h.scheduler.fail_task(&task.id, "ghost", "x").await.unwrap_err();
    assert!(matches!(err, SchedulerError::WorkerNotFound { .. }));
    assert!(err.is_not_found());
    assert_eq!(h.task(&task.id).await, before);

    let err = h.scheduler.assign_task("ghost").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_terminal_tasks_are_immutable() {
    let h = Harness::new().await;
    h.executing_experiment().await;
    let tasks = h.queued_tasks(2, 0).await;
    h.idle_worker("w-1").await;
    h.idle_worker("w-2").await;

    let done = h.scheduler.assign_task("w-1").await.unwrap().unwrap();
    assert_eq!(done.id, tasks[0].id);
    let done = h
        .scheduler
        .complete_task(&done.id, "w-1", Some("ok".into()))
        .await
        .unwrap();
    assert_eq!(done.status, TaskStatus::Completed);

    let failed = h.scheduler.assign_task("w-2").await.unwrap().unwrap();
    let failed = h.scheduler.fail_task(&failed.id, "w-2", "boom").await.unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);

    for (id, worker) in [(&done.id, "w-1"), (&failed.id, "w-2")] {
        let before = h.task(id).await;
        let err = h.scheduler.fail_task(id, worker, "late").await.unwrap_err();
        assert!(matches!(err, SchedulerError::TaskAlreadyFinal { .. }));
        let err = h
            .scheduler
            .complete_task(id, worker, None)
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::TaskAlreadyFinal { .. }));
        assert_eq!(h.task(id).await, before);
    }

    // 实验已经结束，不再分配任何任务
    assert!(h.scheduler.assign_task("w-1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_busy_and_terminated_workers_rejected() {
    let h = Harness::new().await;
    h.executing_experiment().await;
    h.queued_tasks(2, 1).await;
    h.idle_worker("w-1").await;

    h.scheduler.assign_task("w-1").await.unwrap().unwrap();
    let err = h.scheduler.assign_task("w-1").await.unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidWorkerState { .. }));

    h.repos()
        .workers
        .create(&WorkerBuilder::new().with_id("w-dead").terminated().build())
        .await
        .unwrap();
    let err = h.scheduler.assign_task("w-dead").await.unwrap_err();
    assert!(matches!(err, SchedulerError::WorkerTerminated { .. }));
}

#[tokio::test]
async fn test_assignment_order_and_resource_binding() {
    let h = Harness::new().await;
    h.executing_experiment().await;
    let base = chrono::Utc::now() - chrono::Duration::minutes(5);

    let bound_elsewhere = h
        .create_task(
            TaskBuilder::new()
                .queued()
                .on_resource("resource-2")
                .created_at(base)
                .build(),
        )
        .await;
    let oldest_eligible = h
        .create_task(
            TaskBuilder::new()
                .queued()
                .created_at(base + chrono::Duration::seconds(1))
                .build(),
        )
        .await;
    let bound_here = h
        .create_task(
            TaskBuilder::new()
                .queued()
                .on_resource(RESOURCE_ID)
                .created_at(base + chrono::Duration::seconds(2))
                .build(),
        )
        .await;
    h.idle_worker("w-1").await;
    h.idle_worker("w-2").await;

    let first = h.scheduler.assign_task("w-1").await.unwrap().unwrap();
    assert_eq!(first.id, oldest_eligible.id);
    let second = h.scheduler.assign_task("w-2").await.unwrap().unwrap();
    assert_eq!(second.id, bound_here.id);
    assert_eq!(second.compute_resource_id.as_deref(), Some(RESOURCE_ID));

    assert_eq!(h.task(&bound_elsewhere.id).await.status, TaskStatus::Queued);
}

#[tokio::test]
async fn test_dependencies_gate_assignment() {
    let h = Harness::new().await;
    h.executing_experiment().await;
    let base = chrono::Utc::now() - chrono::Duration::minutes(5);

    let upstream_id = "upstream".to_string();
    let downstream = h
        .create_task(
            TaskBuilder::new()
                .queued()
                .with_id("downstream")
                .with_dependencies(vec![upstream_id.clone()])
                .created_at(base)
                .build(),
        )
        .await;
    h.create_task(
        TaskBuilder::new()
            .queued()
            .with_id(&upstream_id)
            .created_at(base + chrono::Duration::seconds(1))
            .build(),
    )
    .await;
    h.idle_worker("w-1").await;
    h.idle_worker("w-2").await;

    let first = h.scheduler.assign_task("w-1").await.unwrap().unwrap();
    assert_eq!(first.id, upstream_id);
    assert!(h.scheduler.assign_task("w-2").await.unwrap().is_none());

    h.scheduler.complete_task(&upstream_id, "w-1", None).await.unwrap();
    let next = h.scheduler.assign_task("w-2").await.unwrap().unwrap();
    assert_eq!(next.id, downstream.id);
}

#[tokio::test]
async fn test_canceled_experiment_stops_offering_tasks() {
    let h = Harness::new().await;
    h.executing_experiment().await;
    let tasks = h.queued_tasks(3, 1).await;
    h.idle_worker("w-1").await;
    h.idle_worker("w-2").await;

    let running = h.scheduler.assign_task("w-1").await.unwrap().unwrap();
    let experiment = h.scheduler.cancel_experiment(EXPERIMENT_ID).await.unwrap();
    assert_eq!(experiment.status, ExperimentStatus::Canceled);

    assert!(h.scheduler.assign_task("w-2").await.unwrap().is_none());
    for task in &tasks[1..] {
        assert_eq!(h.task(&task.id).await.status, TaskStatus::Canceled);
    }

    // 处理中的任务仍可以正常收尾
    let finished = h
        .scheduler
        .complete_task(&running.id, "w-1", None)
        .await
        .unwrap();
    assert_eq!(finished.status, TaskStatus::Completed);
    assert_eq!(h.experiment().await.status, ExperimentStatus::Canceled);

    // 重复取消不报错
    h.scheduler.cancel_experiment(EXPERIMENT_ID).await.unwrap();
}

#[tokio::test]
async fn test_near_expiry_worker_drains() {
    let h = Harness::new().await;
    h.executing_experiment().await;
    h.queued_tasks(1, 1).await;
    h.repos()
        .workers
        .create(
            &WorkerBuilder::new()
                .with_id("w-short")
                .with_walltime(Duration::from_secs(60))
                .build(),
        )
        .await
        .unwrap();

    assert!(h.scheduler.assign_task("w-short").await.unwrap().is_none());
    let worker = h.worker("w-short").await;
    assert_eq!(worker.status, WorkerStatus::Idle);
    assert!(!worker.is_terminated());
}

#[tokio::test]
async fn test_staging_signals() {
    let h = Harness::new().await;
    h.executing_experiment().await;
    let task = h
        .create_task(
            TaskBuilder::new()
                .queued()
                .with_input_file("/data/in.csv")
                .with_output_file("/data/out.csv")
                .build(),
        )
        .await;
    h.idle_worker("w-1").await;

    let assigned = h.scheduler.assign_task("w-1").await.unwrap().unwrap();
    assert_eq!(assigned.status, TaskStatus::DataStaging);
    assert!(assigned.staging_started_at.is_some());
    assert!(assigned.staging_completed_at.is_none());

    let running = h.scheduler.on_staging_complete(&task.id).await.unwrap();
    assert_eq!(running.status, TaskStatus::Running);
    assert!(running.staging_completed_at.is_some());

    let again = h.scheduler.on_staging_complete(&task.id).await.unwrap();
    assert_eq!(again.version, running.version);

    let staged_out = h
        .scheduler
        .complete_task(&task.id, "w-1", Some("done".into()))
        .await
        .unwrap();
    assert_eq!(staged_out.status, TaskStatus::OutputStaging);
    assert!(staged_out.duration.is_some());
    assert_eq!(h.worker("w-1").await.status, WorkerStatus::Idle);
    assert_eq!(h.experiment().await.status, ExperimentStatus::Executing);

    let completed = h.scheduler.on_output_staging_complete(&task.id).await.unwrap();
    assert_eq!(completed.status, TaskStatus::Completed);
    assert!(completed.completed_at.is_some());
    assert_eq!(h.experiment().await.status, ExperimentStatus::Completed);
}

#[tokio::test]
async fn test_staging_failure_requeues_through_failed() {
    let h = Harness::new().await;
    h.executing_experiment().await;
    let task = h
        .create_task(TaskBuilder::new().queued().with_input_file("/data/in.csv").build())
        .await;
    h.idle_worker("w-1").await;
    h.scheduler.assign_task("w-1").await.unwrap().unwrap();

    let requeued = h
        .scheduler
        .on_staging_failed(&task.id, "checksum mismatch")
        .await
        .unwrap();
    assert_eq!(requeued.status, TaskStatus::Queued);
    assert_eq!(requeued.retry_count, 1);

    h.publisher.flush().await;
    assert_eq!(
        h.recorder.task_transitions(&task.id),
        vec![
            (TaskStatus::Queued, TaskStatus::DataStaging),
            (TaskStatus::DataStaging, TaskStatus::Failed),
            (TaskStatus::Failed, TaskStatus::Queued),
        ]
    );
}

#[tokio::test]
async fn test_complete_by_other_worker_rejected() {
    let h = Harness::new().await;
    h.executing_experiment().await;
    let task = h.queued_tasks(1, 1).await.remove(0);
    h.idle_worker("w-1").await;
    h.idle_worker("w-2").await;
    h.scheduler.assign_task("w-1").await.unwrap().unwrap();

    let err = h
        .scheduler
        .complete_task(&task.id, "w-2", None)
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::TaskNotAssigned { .. }));
    assert_eq!(h.task(&task.id).await.status, TaskStatus::Running);
    assert_eq!(h.worker("w-1").await.status, WorkerStatus::Busy);
}

#[tokio::test]
async fn test_handle_worker_failure_is_idempotent() {
    let h = Harness::new().await;
    h.executing_experiment().await;
    let task = h.queued_tasks(1, 1).await.remove(0);
    h.idle_worker("w-1").await;
    h.scheduler.assign_task("w-1").await.unwrap().unwrap();

    let affected = h.scheduler.handle_worker_failure("w-1").await.unwrap();
    assert_eq!(affected.len(), 1);
    let requeued = h.task(&task.id).await;
    assert_eq!(requeued.status, TaskStatus::Queued);
    assert_eq!(requeued.error.as_deref(), Some(WORKER_FAILURE_MESSAGE));

    let worker = h.worker("w-1").await;
    assert!(worker.is_terminated());
    assert_eq!(worker.status, WorkerStatus::Idle);
    assert!(worker.current_task_id.is_none());

    assert!(h.scheduler.handle_worker_failure("w-1").await.unwrap().is_empty());
    assert_eq!(h.task(&task.id).await.retry_count, 1);

    let err = h.scheduler.assign_task("w-1").await.unwrap_err();
    assert!(matches!(err, SchedulerError::WorkerTerminated { .. }));
}

#[tokio::test]
async fn test_hooks_observe_every_transition() {
    let h = Harness::new().await;
    h.executing_experiment().await;
    let task = h.queued_tasks(1, 1).await.remove(0);
    h.idle_worker("w-1").await;

    h.scheduler.assign_task("w-1").await.unwrap().unwrap();
    h.scheduler.complete_task(&task.id, "w-1", None).await.unwrap();
    h.publisher.flush().await;

    assert_eq!(
        h.recorder.task_transitions(&task.id),
        vec![
            (TaskStatus::Queued, TaskStatus::DataStaging),
            (TaskStatus::DataStaging, TaskStatus::EnvSetup),
            (TaskStatus::EnvSetup, TaskStatus::Running),
            (TaskStatus::Running, TaskStatus::OutputStaging),
            (TaskStatus::OutputStaging, TaskStatus::Completed),
        ]
    );
    let worker_hops: Vec<_> = h
        .recorder
        .worker_events()
        .into_iter()
        .map(|e| (e.from, e.to))
        .collect();
    assert_eq!(
        worker_hops,
        vec![
            (WorkerStatus::Idle, WorkerStatus::Busy),
            (WorkerStatus::Busy, WorkerStatus::Idle)
        ]
    );
    let experiment_hops: Vec<_> = h
        .recorder
        .experiment_events()
        .into_iter()
        .map(|e| (e.from, e.to))
        .collect();
    assert_eq!(
        experiment_hops,
        vec![(ExperimentStatus::Executing, ExperimentStatus::Completed)]
    );
}

#[tokio::test]
async fn test_schedule_and_submit_experiment() {
    let h = Harness::new().await;
    let orchestrated = Arc::new(
        TaskScheduler::new(
            h.repos().clone(),
            h.registry.clone(),
            h.publisher.clone(),
            DistributionOptimizer::default(),
            SchedulerConfig::default(),
        )
        .with_orchestrator(Arc::new(StaticOrchestrator::with_task_count(4, 2))),
    );
    h.repos()
        .experiments
        .create(&ExperimentBuilder::new().build())
        .await
        .unwrap();

    let plan = orchestrated.submit_experiment(EXPERIMENT_ID).await.unwrap();
    assert_eq!(plan.task_count, 4);
    assert_eq!(plan.distribution.total_workers, 4);
    assert_eq!(plan.distribution.allocations.get(RESOURCE_ID), Some(&4));

    assert_eq!(h.experiment().await.status, ExperimentStatus::Executing);
    let tasks = h.repos().tasks.list_by_experiment(EXPERIMENT_ID).await.unwrap();
    assert_eq!(tasks.len(), 4);
    assert!(tasks.iter().all(|t| t.status == TaskStatus::Queued));

    let err = orchestrated.schedule_experiment(EXPERIMENT_ID).await.unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_worker_metrics_track_outcomes() {
    let h = Harness::new().await;
    h.executing_experiment().await;
    let tasks = h.queued_tasks(2, 0).await;
    h.idle_worker("w-1").await;

    h.scheduler.assign_task("w-1").await.unwrap().unwrap();
    h.scheduler.complete_task(&tasks[0].id, "w-1", None).await.unwrap();
    h.scheduler.assign_task("w-1").await.unwrap().unwrap();
    h.scheduler.fail_task(&tasks[1].id, "w-1", "boom").await.unwrap();

    let metrics = h.scheduler.get_worker_metrics("w-1").await.unwrap();
    assert_eq!(metrics.tasks_completed, 1);
    assert_eq!(metrics.tasks_failed, 1);

    let err = h.scheduler.get_worker_metrics("ghost").await.unwrap_err();
    assert!(err.is_not_found());
}

/// 在第一次认领写入前停住，等待测试放行
struct GatedTaskRepository {
    inner: Arc<dyn TaskRepository>,
    armed: AtomicBool,
    reached: Notify,
    release: Notify,
}

impl GatedTaskRepository {
    fn wrap(inner: Arc<dyn TaskRepository>) -> Self {
        Self {
            inner,
            armed: AtomicBool::new(true),
            reached: Notify::new(),
            release: Notify::new(),
        }
    }
}

#[async_trait]
impl TaskRepository for GatedTaskRepository {
    async fn create(&self, task: &Task) -> SchedulerResult<Task> {
        self.inner.create(task).await
    }

    async fn get_by_id(&self, id: &str) -> SchedulerResult<Option<Task>> {
        self.inner.get_by_id(id).await
    }

    async fn list_by_experiment(&self, experiment_id: &str) -> SchedulerResult<Vec<Task>> {
        self.inner.list_by_experiment(experiment_id).await
    }

    async fn find_queued(&self, experiment_id: &str) -> SchedulerResult<Vec<Task>> {
        self.inner.find_queued(experiment_id).await
    }

    async fn list_active_by_worker(&self, worker_id: &str) -> SchedulerResult<Vec<Task>> {
        self.inner.list_active_by_worker(worker_id).await
    }

    async fn update(&self, task: &Task) -> SchedulerResult<Task> {
        let claiming = task.worker_id.is_some() && task.status != TaskStatus::Queued;
        if claiming && self.armed.swap(false, Ordering::SeqCst) {
            self.reached.notify_one();
            self.release.notified().await;
        }
        self.inner.update(task).await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_worker_failure_during_claim_does_not_orphan_task() {
    let base = in_memory_repositories();
    let gate = Arc::new(GatedTaskRepository::wrap(base.tasks.clone()));
    let repos = Repositories {
        tasks: gate.clone(),
        ..base
    };
    let h = Harness::build(repos, SchedulerConfig::default()).await;
    h.executing_experiment().await;
    let task = h.queued_tasks(1, 2).await.remove(0);
    h.idle_worker("w-1").await;

    let scheduler = h.scheduler.clone();
    let assigning = tokio::spawn(async move { scheduler.assign_task("w-1").await });

    // Worker已标记 BUSY，任务写入被挡住时判定Worker失效
    gate.reached.notified().await;
    let affected = h.scheduler.handle_worker_failure("w-1").await.unwrap();
    assert!(affected.is_empty());
    gate.release.notify_one();

    let assigned = assigning.await.unwrap().unwrap();
    assert!(assigned.is_none());

    let task = h.task(&task.id).await;
    assert_eq!(task.status, TaskStatus::Queued);
    assert!(task.worker_id.is_none());
    assert_eq!(task.retry_count, 1);
    assert_eq!(task.error.as_deref(), Some(WORKER_FAILURE_MESSAGE));

    let worker = h.worker("w-1").await;
    assert!(worker.is_terminated());
    assert_eq!(worker.status, WorkerStatus::Idle);
    assert!(worker.current_task_id.is_none());
    assert!(h.repos().tasks.list_active_by_worker("w-1").await.unwrap().is_empty());

    // 其他Worker可以继续领取这个任务
    h.idle_worker("w-2").await;
    let next = h.scheduler.assign_task("w-2").await.unwrap().unwrap();
    assert_eq!(next.id, task.id);
}

#[tokio::test]
async fn test_terminated_worker_failure_reclaims_leftover_tasks() {
    let h = Harness::new().await;
    h.executing_experiment().await;
    h.repos()
        .workers
        .create(&WorkerBuilder::new().with_id("w-1").terminated().build())
        .await
        .unwrap();
    let task = h
        .create_task(
            TaskBuilder::new()
                .with_status(TaskStatus::Running)
                .with_max_retries(1)
                .assigned_to("w-1", RESOURCE_ID)
                .build(),
        )
        .await;

    let report = h.scheduler.reconcile_worker_failure("w-1").await.unwrap();
    assert!(!report.terminated_now);
    assert_eq!(report.affected.len(), 1);
    assert_eq!(h.task(&task.id).await.status, TaskStatus::Queued);

    let again = h.scheduler.reconcile_worker_failure("w-1").await.unwrap();
    assert!(!again.terminated_now);
    assert!(again.affected.is_empty());
}

#[tokio::test]
async fn test_failure_after_cancel_does_not_requeue() {
    let h = Harness::new().await;
    h.executing_experiment().await;
    let tasks = h.queued_tasks(2, 3).await;
    h.idle_worker("w-1").await;
    h.idle_worker("w-2").await;

    let first = h.scheduler.assign_task("w-1").await.unwrap().unwrap();
    let second = h.scheduler.assign_task("w-2").await.unwrap().unwrap();
    assert_eq!(first.id, tasks[0].id);
    h.scheduler.cancel_experiment(EXPERIMENT_ID).await.unwrap();

    let failed = h.scheduler.fail_task(&first.id, "w-1", "oom").await.unwrap();
    assert_eq!(failed.status, TaskStatus::Canceled);
    assert_eq!(failed.retry_count, 0);
    assert!(failed.worker_id.is_none());
    assert!(failed.completed_at.is_some());
    assert_eq!(h.worker("w-1").await.status, WorkerStatus::Idle);

    // Worker失效同样不会把任务放回队列
    h.scheduler.handle_worker_failure("w-2").await.unwrap();
    assert_eq!(h.task(&second.id).await.status, TaskStatus::Canceled);
    assert!(h.repos().tasks.find_queued(EXPERIMENT_ID).await.unwrap().is_empty());

    h.publisher.flush().await;
    assert_eq!(
        h.recorder.task_transitions(&first.id).last(),
        Some(&(TaskStatus::Running, TaskStatus::Canceled))
    );
}
