//! 任务调度核心
//!
//! 所有状态写入都是"读取、校验转换、版本校验写入"的循环：版本冲突时重新读取并带抖动退避，
//! 超过配置的重试次数后返回 `ConcurrentModification`。不同任务的写入只在各自记录上竞争。
//! 任务认领只尝试一次，冲突意味着任务已被其他Worker认领，直接换下一个候选。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::{counter, histogram};
use scheduler_core::{config::SchedulerConfig, SchedulerError, SchedulerResult};
use scheduler_domain::entities::{
    ConnectionState, Experiment, ExperimentStatus, SchedulingPlan, Task, TaskStatus, Worker,
    WorkerDistribution, WorkerMetrics, WorkerStatus,
};
use scheduler_domain::events::{
    ExperimentStateChange, StateChangeEvent, TaskStateChange, WorkerStateChange,
};
use scheduler_domain::ports::{ExperimentOrchestrator, ResourceRegistry};
use scheduler_domain::repositories::Repositories;
use scheduler_domain::state_machine::{
    advance_task, validate_experiment_transition, validate_worker_transition, Hop,
};
use tracing::{debug, info, instrument, warn};

use crate::distribution::{DistributionOptimizer, DistributionRequest};
use crate::hook_registry::HookPublisher;
use crate::retry_policy::{
    apply_failure, cancel_on_failure, ConflictBackoff, FailureOutcome, WORKER_FAILURE_MESSAGE,
};

const TASK_ASSIGNMENTS: &str = "scheduler_task_assignments_total";
const EMPTY_POLLS: &str = "scheduler_empty_polls_total";
const TASK_DURATION: &str = "scheduler_task_duration_seconds";
const CAS_CONFLICTS: &str = "scheduler_cas_conflicts_total";

/// `reconcile_worker_failure` 的结果
#[derive(Debug, Clone)]
pub struct WorkerFailureReport {
    pub worker: Worker,
    /// 终止标记由本次调用写入
    pub terminated_now: bool,
    pub affected: Vec<Task>,
}

pub struct TaskScheduler {
    repos: Repositories,
    registry: Arc<dyn ResourceRegistry>,
    hooks: HookPublisher,
    optimizer: DistributionOptimizer,
    config: SchedulerConfig,
    backoff: ConflictBackoff,
    orchestrator: Option<Arc<dyn ExperimentOrchestrator>>,
}

impl TaskScheduler {
    pub fn new(
        repos: Repositories,
        registry: Arc<dyn ResourceRegistry>,
        hooks: HookPublisher,
        optimizer: DistributionOptimizer,
        config: SchedulerConfig,
    ) -> Self {
        let backoff = ConflictBackoff::with_base(Duration::from_millis(config.cas_backoff_millis));
        Self {
            repos,
            registry,
            hooks,
            optimizer,
            config,
            backoff,
            orchestrator: None,
        }
    }

    pub fn with_orchestrator(mut self, orchestrator: Arc<dyn ExperimentOrchestrator>) -> Self {
        self.orchestrator = Some(orchestrator);
        self
    }

    pub fn repositories(&self) -> &Repositories {
        &self.repos
    }

    pub fn registry(&self) -> &Arc<dyn ResourceRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn hooks(&self) -> &HookPublisher {
        &self.hooks
    }

    /// 实验的单任务预计时长，未声明时使用配置默认值
    pub fn estimated_task_duration(&self, experiment: &Experiment) -> Duration {
        experiment
            .requirements
            .estimated_task_duration
            .unwrap_or_else(|| self.config.default_task_duration())
    }

    #[instrument(skip(self))]
    pub async fn calculate_optimal_distribution(
        &self,
        experiment_id: &str,
    ) -> SchedulerResult<WorkerDistribution> {
        let experiment = self.load_experiment(experiment_id).await?;
        let tasks = self.repos.tasks.list_by_experiment(experiment_id).await?;
        let unfinished = tasks.iter().filter(|t| !t.status.is_final()).count();
        let resources = self.registry.list_compute_resources().await?;

        self.optimizer.optimize(&DistributionRequest {
            task_count: unfinished,
            avg_task_duration: self.estimated_task_duration(&experiment),
            constraints: &experiment.constraints,
            resources: &resources,
            now: Utc::now(),
        })
    }

    /// 计算分布并开始执行实验，CREATED 的任务全部入队
    #[instrument(skip(self))]
    pub async fn schedule_experiment(&self, experiment_id: &str) -> SchedulerResult<SchedulingPlan> {
        let distribution = self.calculate_optimal_distribution(experiment_id).await?;

        let now = Utc::now();
        let experiment = self
            .update_experiment(experiment_id, Some("开始执行"), |e| {
                validate_experiment_transition(e.status, ExperimentStatus::Executing)?;
                e.status = ExperimentStatus::Executing;
                e.started_at = Some(now);
                e.updated_at = now;
                Ok(true)
            })
            .await?;

        let tasks = self.repos.tasks.list_by_experiment(experiment_id).await?;
        let mut queued = 0usize;
        for task in tasks.iter().filter(|t| t.status == TaskStatus::Created) {
            let (_, hops) = self
                .update_task(&task.id, Some("实验开始执行"), |t| {
                    if t.status != TaskStatus::Created {
                        return Ok(Vec::new());
                    }
                    let hops = advance_task(t, &[TaskStatus::Queued])?;
                    t.updated_at = Utc::now();
                    Ok(hops)
                })
                .await?;
            if !hops.is_empty() {
                queued += 1;
            }
        }

        info!(
            "实验 {} 开始执行: {} 个任务入队，计划 {} 个Worker",
            experiment_id, queued, distribution.total_workers
        );

        Ok(SchedulingPlan {
            experiment_id: experiment.id,
            task_count: tasks.iter().filter(|t| !t.status.is_final()).count(),
            distribution,
            constraints: experiment.constraints,
            created_at: now,
        })
    }

    /// 通过编排器生成任务后调度实验
    #[instrument(skip(self))]
    pub async fn submit_experiment(&self, experiment_id: &str) -> SchedulerResult<SchedulingPlan> {
        let orchestrator = self
            .orchestrator
            .as_ref()
            .ok_or_else(|| SchedulerError::Internal("未配置实验编排器".to_string()))?;
        self.load_experiment(experiment_id).await?;

        let generated = orchestrator.generate_tasks(experiment_id).await?;
        let existing: HashSet<String> = self
            .repos
            .tasks
            .list_by_experiment(experiment_id)
            .await?
            .into_iter()
            .map(|t| t.id)
            .collect();

        let mut created = 0usize;
        for task in generated.iter().filter(|t| !existing.contains(&t.id)) {
            if task.experiment_id != experiment_id {
                return Err(SchedulerError::Internal(format!(
                    "编排器为实验 {} 生成了属于实验 {} 的任务 {}",
                    experiment_id, task.experiment_id, task.id
                )));
            }
            self.repos.tasks.create(task).await?;
            created += 1;
        }
        info!("实验 {} 新增 {} 个任务", experiment_id, created);

        self.schedule_experiment(experiment_id).await
    }

    /// Worker拉取任务
    ///
    /// 返回 `Ok(None)` 表示本次没有可分配的任务，这是正常的空轮询结果。
    #[instrument(skip(self))]
    pub async fn assign_task(&self, worker_id: &str) -> SchedulerResult<Option<Task>> {
        let worker = self.load_worker(worker_id).await?;
        ensure_worker_idle(&worker)?;

        let experiment = self.load_experiment(&worker.experiment_id).await?;
        if !experiment.accepts_work() {
            debug!(
                "实验 {} 状态为 {}，不再向Worker {} 分配任务",
                experiment.id, experiment.status, worker_id
            );
            record_empty_poll("experiment_inactive");
            return Ok(None);
        }

        let estimated = self.estimated_task_duration(&experiment);
        let (fits, remaining) = worker.walltime_fits(estimated, Utc::now());
        if !fits {
            debug!(
                "Worker {} 剩余walltime {:?} 不足以容纳预计时长 {:?}",
                worker_id, remaining, estimated
            );
            record_empty_poll("walltime");
            return Ok(None);
        }

        let candidates = self.eligible_tasks(&worker).await?;
        let Some(first) = candidates.first() else {
            record_empty_poll("queue_empty");
            return Ok(None);
        };

        let first_id = first.id.clone();
        self.update_worker(worker_id, Some("认领任务"), |w| {
            ensure_worker_idle(w)?;
            w.status = WorkerStatus::Busy;
            w.current_task_id = Some(first_id.clone());
            w.updated_at = Utc::now();
            Ok(true)
        })
        .await?;

        for (index, candidate) in candidates.iter().enumerate() {
            if index > 0 {
                let next_id = candidate.id.clone();
                self.update_worker(worker_id, None, |w| {
                    if w.is_terminated() {
                        return Err(SchedulerError::WorkerTerminated { id: w.id.clone() });
                    }
                    w.current_task_id = Some(next_id.clone());
                    w.updated_at = Utc::now();
                    Ok(true)
                })
                .await?;
            }

            match self.try_claim_task(candidate, &worker).await {
                Ok(Some(task)) => {
                    // 认领期间Worker可能已被判定失效，失效处理看不到这个任务时由这里收回
                    let holder = self.load_worker(worker_id).await?;
                    if holder.is_terminated()
                        || holder.current_task_id.as_deref() != Some(task.id.as_str())
                    {
                        warn!("Worker {} 在认领任务 {} 期间已终止，收回任务", worker_id, task.id);
                        self.reclaim_task(&task.id, worker_id).await?;
                        record_empty_poll("worker_terminated");
                        return Ok(None);
                    }
                    counter!(TASK_ASSIGNMENTS).increment(1);
                    info!(
                        "任务 {} 分配给Worker {} (资源 {}，状态 {})",
                        task.id, worker_id, worker.compute_resource_id, task.status
                    );
                    return Ok(Some(task));
                }
                Ok(None) => {
                    debug!("任务 {} 已被其他Worker认领，尝试下一个", candidate.id);
                }
                Err(e) => {
                    self.release_worker(worker_id, &candidate.id, "任务认领失败")
                        .await?;
                    return Err(e);
                }
            }
        }

        let last = candidates
            .last()
            .map(|t| t.id.clone())
            .unwrap_or_default();
        self.release_worker(worker_id, &last, "候选任务均已被认领")
            .await?;
        record_empty_poll("contention");
        Ok(None)
    }

    #[instrument(skip(self))]
    pub async fn on_staging_complete(&self, task_id: &str) -> SchedulerResult<Task> {
        let now = Utc::now();
        let (task, hops) = self
            .update_task(task_id, Some("输入暂存完成"), |t| {
                if matches!(t.status, TaskStatus::EnvSetup | TaskStatus::Running) {
                    return Ok(Vec::new());
                }
                ensure_not_final(t)?;
                let hops = advance_task(t, &[TaskStatus::EnvSetup, TaskStatus::Running])?;
                t.staging_completed_at = Some(now);
                t.updated_at = now;
                Ok(hops)
            })
            .await?;

        if hops.is_empty() {
            debug!("任务 {} 已完成输入暂存，忽略重复信号", task_id);
        }
        Ok(task)
    }

    /// 输入暂存失败，按失败规则处理任务
    #[instrument(skip(self))]
    pub async fn on_staging_failed(&self, task_id: &str, error: &str) -> SchedulerResult<Task> {
        let task = self.load_task(task_id).await?;
        let worker_id = task.worker_id.clone().ok_or_else(|| SchedulerError::TaskNotAssigned {
            task_id: task_id.to_string(),
            worker_id: String::new(),
        })?;
        self.fail_task(task_id, &worker_id, error).await
    }

    #[instrument(skip(self, result))]
    pub async fn complete_task(
        &self,
        task_id: &str,
        worker_id: &str,
        result: Option<String>,
    ) -> SchedulerResult<Task> {
        self.load_task(task_id).await?;
        self.load_worker(worker_id).await?;

        let now = Utc::now();
        let (task, _) = self
            .update_task(task_id, Some("任务执行完成"), |t| {
                ensure_not_final(t)?;
                ensure_assigned(t, worker_id)?;
                let path: &[TaskStatus] = if t.output_files.is_empty() {
                    &[TaskStatus::OutputStaging, TaskStatus::Completed]
                } else {
                    &[TaskStatus::OutputStaging]
                };
                let hops = advance_task(t, path)?;
                t.duration = t.started_at.and_then(|s| (now - s).to_std().ok());
                t.result = result.clone();
                if t.status == TaskStatus::Completed {
                    t.completed_at = Some(now);
                }
                t.updated_at = now;
                Ok(hops)
            })
            .await?;

        self.release_worker(worker_id, task_id, "任务执行完成").await?;
        if let Some(duration) = task.duration {
            histogram!(TASK_DURATION).record(duration.as_secs_f64());
        }
        self.record_outcome(worker_id, true, task.duration).await;
        info!("任务 {} 在Worker {} 上执行完成，状态 {}", task_id, worker_id, task.status);

        if task.status == TaskStatus::Completed {
            self.check_experiment_completion(&task.experiment_id).await?;
        }
        Ok(task)
    }

    /// 输出回传完成
    #[instrument(skip(self))]
    pub async fn on_output_staging_complete(&self, task_id: &str) -> SchedulerResult<Task> {
        let now = Utc::now();
        let (task, hops) = self
            .update_task(task_id, Some("输出回传完成"), |t| {
                if t.status == TaskStatus::Completed {
                    return Ok(Vec::new());
                }
                ensure_not_final(t)?;
                let hops = advance_task(t, &[TaskStatus::Completed])?;
                t.completed_at = Some(now);
                t.updated_at = now;
                Ok(hops)
            })
            .await?;

        if !hops.is_empty() {
            self.check_experiment_completion(&task.experiment_id).await?;
        }
        Ok(task)
    }

    /// 重试控制
    ///
    /// 业务上的失败不作为错误返回，任务的新状态（QUEUED、FAILED 或 CANCELED）就是结果。
    #[instrument(skip(self))]
    pub async fn fail_task(
        &self,
        task_id: &str,
        worker_id: &str,
        error_message: &str,
    ) -> SchedulerResult<Task> {
        self.load_task(task_id).await?;
        self.load_worker(worker_id).await?;

        let (task, outcome) = self
            .fail_assigned_task(task_id, worker_id, error_message)
            .await?;
        self.release_worker(worker_id, task_id, error_message).await?;
        self.record_outcome(worker_id, false, None).await;

        if outcome.is_final() {
            self.check_experiment_completion(&task.experiment_id).await?;
        }
        Ok(task)
    }

    /// Worker失效处理，可重复调用
    #[instrument(skip(self))]
    pub async fn handle_worker_failure(&self, worker_id: &str) -> SchedulerResult<Vec<Task>> {
        Ok(self.reconcile_worker_failure(worker_id).await?.affected)
    }

    /// 先将Worker标记为终止，再对它持有的任务和仍绑定在它上面的任务应用失败规则
    ///
    /// 终止标记写入后 `assign_task` 不会再把任务交给这个Worker；已终止的Worker再次调用时
    /// 只收回残留的任务。
    pub async fn reconcile_worker_failure(
        &self,
        worker_id: &str,
    ) -> SchedulerResult<WorkerFailureReport> {
        let now = Utc::now();
        let mut held: Option<String> = None;
        let mut terminated_now = false;
        let worker = self
            .update_worker(worker_id, Some(WORKER_FAILURE_MESSAGE), |w| {
                held = None;
                terminated_now = false;
                if w.is_terminated() {
                    return Ok(false);
                }
                held = w.current_task_id.take();
                if w.status == WorkerStatus::Busy {
                    w.status = WorkerStatus::Idle;
                }
                w.connection_state = ConnectionState::Terminated;
                w.terminated_at = Some(now);
                w.walltime_remaining = Duration::ZERO;
                w.updated_at = now;
                terminated_now = true;
                Ok(true)
            })
            .await?;

        let mut task_ids: Vec<String> = held.into_iter().collect();
        for task in self.repos.tasks.list_active_by_worker(worker_id).await? {
            if !task_ids.contains(&task.id) {
                task_ids.push(task.id);
            }
        }

        let mut affected = Vec::new();
        let mut finished_experiments = HashSet::new();
        for task_id in &task_ids {
            match self
                .fail_assigned_task(task_id, worker_id, WORKER_FAILURE_MESSAGE)
                .await
            {
                Ok((task, outcome)) => {
                    self.record_outcome(worker_id, false, None).await;
                    if outcome.is_final() {
                        finished_experiments.insert(task.experiment_id.clone());
                    }
                    affected.push(task);
                }
                Err(
                    e @ (SchedulerError::TaskAlreadyFinal { .. }
                    | SchedulerError::TaskNotAssigned { .. }
                    | SchedulerError::TaskNotFound { .. }),
                ) => {
                    debug!("Worker {} 失效时跳过任务 {}: {}", worker_id, task_id, e);
                }
                Err(e) => return Err(e),
            }
        }

        if terminated_now {
            warn!(
                "Worker {} 已标记为终止，处理了 {} 个任务",
                worker_id,
                affected.len()
            );
        } else if affected.is_empty() {
            debug!("Worker {} 已终止，忽略失效处理", worker_id);
        } else {
            warn!(
                "已终止的Worker {} 上仍有 {} 个任务，已收回",
                worker_id,
                affected.len()
            );
        }

        for experiment_id in finished_experiments {
            self.check_experiment_completion(&experiment_id).await?;
        }
        Ok(WorkerFailureReport {
            worker,
            terminated_now,
            affected,
        })
    }

    /// 取消实验，尚未开始的任务全部取消，处理中的任务由各自的信号收尾
    #[instrument(skip(self))]
    pub async fn cancel_experiment(&self, experiment_id: &str) -> SchedulerResult<Experiment> {
        let now = Utc::now();
        let experiment = self
            .update_experiment(experiment_id, Some("实验被取消"), |e| {
                if e.status == ExperimentStatus::Canceled {
                    return Ok(false);
                }
                validate_experiment_transition(e.status, ExperimentStatus::Canceled)?;
                e.status = ExperimentStatus::Canceled;
                e.completed_at = Some(now);
                e.updated_at = now;
                Ok(true)
            })
            .await?;

        let tasks = self.repos.tasks.list_by_experiment(experiment_id).await?;
        let mut canceled = 0usize;
        for task in tasks
            .iter()
            .filter(|t| matches!(t.status, TaskStatus::Created | TaskStatus::Queued))
        {
            if self.cancel_pending_task(&task.id, "实验被取消").await?.is_some() {
                canceled += 1;
            }
        }

        info!("实验 {} 已取消，取消了 {} 个未开始的任务", experiment_id, canceled);
        Ok(experiment)
    }

    /// 所有任务进入最终状态后结束实验，存在失败任务时实验记为取消
    pub async fn check_experiment_completion(&self, experiment_id: &str) -> SchedulerResult<()> {
        let tasks = self.repos.tasks.list_by_experiment(experiment_id).await?;
        if tasks.is_empty() || !tasks.iter().all(|t| t.status.is_final()) {
            return Ok(());
        }
        let failed = tasks
            .iter()
            .filter(|t| t.status != TaskStatus::Completed)
            .count();
        let target = if failed == 0 {
            ExperimentStatus::Completed
        } else {
            ExperimentStatus::Canceled
        };

        let now = Utc::now();
        let message = format!("{} 个任务全部结束，{} 个失败", tasks.len(), failed);
        let experiment = self
            .update_experiment(experiment_id, Some(message.as_str()), |e| {
                if e.status != ExperimentStatus::Executing {
                    return Ok(false);
                }
                validate_experiment_transition(e.status, target)?;
                e.status = target;
                e.completed_at = Some(now);
                e.updated_at = now;
                Ok(true)
            })
            .await?;

        if experiment.status == target {
            info!("实验 {} 结束: {} ({})", experiment_id, target, message);
        }
        Ok(())
    }

    pub async fn get_worker_metrics(&self, worker_id: &str) -> SchedulerResult<WorkerMetrics> {
        self.load_worker(worker_id).await?;
        Ok(self
            .repos
            .metrics
            .get(worker_id)
            .await?
            .unwrap_or_else(|| WorkerMetrics::new(worker_id)))
    }

    /// 版本校验更新Worker，冲突时重新读取重试
    ///
    /// 闭包返回 `false` 表示无需写入；状态变化会经过状态机校验并发布事件。
    pub async fn update_worker<F>(
        &self,
        worker_id: &str,
        message: Option<&str>,
        mut mutate: F,
    ) -> SchedulerResult<Worker>
    where
        F: FnMut(&mut Worker) -> SchedulerResult<bool> + Send,
    {
        let mut attempt = 0;
        loop {
            let mut worker = self.load_worker(worker_id).await?;
            let before = worker.status;
            if !mutate(&mut worker)? {
                return Ok(worker);
            }
            if before != worker.status {
                validate_worker_transition(before, worker.status)?;
            }

            match self.repos.workers.update(&worker).await {
                Ok(saved) => {
                    if before != saved.status {
                        self.publish_worker_hop(&saved, (before, saved.status), message);
                    }
                    return Ok(saved);
                }
                Err(e) => self.on_conflict("worker", worker_id, &mut attempt, e).await?,
            }
        }
    }

    async fn update_task<F>(
        &self,
        task_id: &str,
        message: Option<&str>,
        mut mutate: F,
    ) -> SchedulerResult<(Task, Vec<Hop<TaskStatus>>)>
    where
        F: FnMut(&mut Task) -> SchedulerResult<Vec<Hop<TaskStatus>>> + Send,
    {
        let mut attempt = 0;
        loop {
            let mut task = self.load_task(task_id).await?;
            let hops = mutate(&mut task)?;
            if hops.is_empty() {
                return Ok((task, hops));
            }

            match self.repos.tasks.update(&task).await {
                Ok(saved) => {
                    self.publish_task_hops(&saved, &hops, message);
                    return Ok((saved, hops));
                }
                Err(e) => self.on_conflict("task", task_id, &mut attempt, e).await?,
            }
        }
    }

    async fn update_experiment<F>(
        &self,
        experiment_id: &str,
        message: Option<&str>,
        mut mutate: F,
    ) -> SchedulerResult<Experiment>
    where
        F: FnMut(&mut Experiment) -> SchedulerResult<bool> + Send,
    {
        let mut attempt = 0;
        loop {
            let mut experiment = self.load_experiment(experiment_id).await?;
            let before = experiment.status;
            if !mutate(&mut experiment)? {
                return Ok(experiment);
            }

            match self.repos.experiments.update(&experiment).await {
                Ok(saved) => {
                    if before != saved.status {
                        self.hooks.publish(StateChangeEvent::Experiment(ExperimentStateChange {
                            experiment_id: saved.id.clone(),
                            from: before,
                            to: saved.status,
                            timestamp: saved.updated_at,
                            message: message.map(str::to_string),
                        }));
                    }
                    return Ok(saved);
                }
                Err(e) => {
                    self.on_conflict("experiment", experiment_id, &mut attempt, e)
                        .await?
                }
            }
        }
    }

    async fn on_conflict(
        &self,
        entity: &'static str,
        id: &str,
        attempt: &mut u32,
        error: SchedulerError,
    ) -> SchedulerResult<()> {
        if !matches!(error, SchedulerError::ConcurrentModification { .. })
            || *attempt + 1 >= self.config.max_cas_retries
        {
            return Err(error);
        }
        *attempt += 1;
        counter!(CAS_CONFLICTS, "entity" => entity).increment(1);
        debug!("{} {} 版本冲突，第 {} 次重试", entity, id, attempt);
        tokio::time::sleep(self.backoff.delay(*attempt)).await;
        Ok(())
    }

    /// 单次尝试认领任务，冲突返回 `None`
    async fn try_claim_task(
        &self,
        candidate: &Task,
        worker: &Worker,
    ) -> SchedulerResult<Option<Task>> {
        if candidate.status != TaskStatus::Queued || candidate.worker_id.is_some() {
            return Ok(None);
        }

        let now = Utc::now();
        let mut task = candidate.clone();
        let path: &[TaskStatus] = if task.input_files.is_empty() {
            &[TaskStatus::DataStaging, TaskStatus::EnvSetup, TaskStatus::Running]
        } else {
            &[TaskStatus::DataStaging]
        };
        let hops = advance_task(&mut task, path)?;
        task.worker_id = Some(worker.id.clone());
        task.compute_resource_id = Some(worker.compute_resource_id.clone());
        task.started_at = Some(now);
        task.staging_started_at = Some(now);
        if task.input_files.is_empty() {
            task.staging_completed_at = Some(now);
        }
        task.updated_at = now;

        match self.repos.tasks.update(&task).await {
            Ok(saved) => {
                let message = format!("分配给Worker {}", worker.id);
                self.publish_task_hops(&saved, &hops, Some(&message));
                Ok(Some(saved))
            }
            Err(SchedulerError::ConcurrentModification { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// 可分配给该Worker的排队任务，按创建时间排序
    async fn eligible_tasks(&self, worker: &Worker) -> SchedulerResult<Vec<Task>> {
        let queued: Vec<Task> = self
            .repos
            .tasks
            .find_queued(&worker.experiment_id)
            .await?
            .into_iter()
            .filter(|t| {
                t.worker_id.is_none()
                    && t.compute_resource_id
                        .as_deref()
                        .map_or(true, |r| r == worker.compute_resource_id)
            })
            .collect();

        if queued.iter().all(|t| t.dependencies.is_empty()) {
            return Ok(queued);
        }

        let mut statuses: HashMap<String, TaskStatus> = self
            .repos
            .tasks
            .list_by_experiment(&worker.experiment_id)
            .await?
            .into_iter()
            .map(|t| (t.id, t.status))
            .collect();

        let mut eligible = Vec::with_capacity(queued.len());
        for task in queued {
            let mut satisfied = true;
            for dependency in &task.dependencies {
                let status = match statuses.get(dependency) {
                    Some(status) => Some(*status),
                    None => {
                        let found = self.repos.tasks.get_by_id(dependency).await?;
                        found.map(|d| {
                            statuses.insert(d.id.clone(), d.status);
                            d.status
                        })
                    }
                };
                if status != Some(TaskStatus::Completed) {
                    satisfied = false;
                    break;
                }
            }
            if satisfied {
                eligible.push(task);
            } else {
                debug!("任务 {} 的依赖尚未完成", task.id);
            }
        }
        Ok(eligible)
    }

    /// 对绑定在该Worker上的任务应用失败规则
    ///
    /// 实验已停止接收任务时任务直接取消。重新入队后才观察到实验被取消的，
    /// 补做一次取消，避免任务停留在队列中。
    async fn fail_assigned_task(
        &self,
        task_id: &str,
        worker_id: &str,
        message: &str,
    ) -> SchedulerResult<(Task, FailureOutcome)> {
        let now = Utc::now();
        let current = self.load_task(task_id).await?;
        let accepting = self.experiment_accepts_work(&current.experiment_id).await?;

        let mut outcome = FailureOutcome::PermanentlyFailed;
        let (mut task, _) = self
            .update_task(task_id, Some(message), |t| {
                if !t.status.is_final() {
                    ensure_assigned(t, worker_id)?;
                }
                let (decided, hops) = if accepting {
                    apply_failure(t, message, now)?
                } else {
                    cancel_on_failure(t, message, now)?
                };
                outcome = decided;
                Ok(hops)
            })
            .await?;

        if matches!(outcome, FailureOutcome::Requeued { .. })
            && !self.experiment_accepts_work(&task.experiment_id).await?
        {
            if let Some(canceled) = self.cancel_pending_task(task_id, "实验已不再执行").await? {
                task = canceled;
                outcome = FailureOutcome::Canceled;
            }
        }

        match outcome {
            FailureOutcome::Requeued { retry_count } => info!(
                "任务 {} 失败后重新入队 ({}/{}): {}",
                task_id, retry_count, task.max_retries, message
            ),
            FailureOutcome::PermanentlyFailed => warn!(
                "任务 {} 重试次数耗尽，永久失败 ({}/{}): {}",
                task_id, task.retry_count, task.max_retries, message
            ),
            FailureOutcome::Canceled => info!(
                "任务 {} 失败时实验已不再执行，任务取消: {}",
                task_id, message
            ),
        }
        Ok((task, outcome))
    }

    /// 认领成功后发现Worker已终止，任务按Worker失效规则退回
    async fn reclaim_task(&self, task_id: &str, worker_id: &str) -> SchedulerResult<()> {
        match self
            .fail_assigned_task(task_id, worker_id, WORKER_FAILURE_MESSAGE)
            .await
        {
            Ok((task, outcome)) => {
                self.record_outcome(worker_id, false, None).await;
                if outcome.is_final() {
                    self.check_experiment_completion(&task.experiment_id).await?;
                }
                Ok(())
            }
            // 失效处理已经收回了这个任务
            Err(
                SchedulerError::TaskAlreadyFinal { .. } | SchedulerError::TaskNotAssigned { .. },
            ) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// 取消仍处于 CREATED 或 QUEUED 的任务，状态已变化时返回 `None`
    async fn cancel_pending_task(&self, task_id: &str, message: &str) -> SchedulerResult<Option<Task>> {
        let now = Utc::now();
        let (task, hops) = self
            .update_task(task_id, Some(message), |t| {
                if !matches!(t.status, TaskStatus::Created | TaskStatus::Queued)
                    || t.worker_id.is_some()
                {
                    return Ok(Vec::new());
                }
                let hops = advance_task(t, &[TaskStatus::Canceled])?;
                t.completed_at = Some(now);
                t.updated_at = now;
                Ok(hops)
            })
            .await?;
        Ok((!hops.is_empty()).then_some(task))
    }

    async fn experiment_accepts_work(&self, experiment_id: &str) -> SchedulerResult<bool> {
        Ok(self.load_experiment(experiment_id).await?.accepts_work())
    }

    /// Worker仍持有该任务时释放为 IDLE
    async fn release_worker(&self, worker_id: &str, task_id: &str, reason: &str) -> SchedulerResult<()> {
        let result = self
            .update_worker(worker_id, Some(reason), |w| {
                if w.status != WorkerStatus::Busy || w.current_task_id.as_deref() != Some(task_id) {
                    return Ok(false);
                }
                w.status = WorkerStatus::Idle;
                w.current_task_id = None;
                w.updated_at = Utc::now();
                Ok(true)
            })
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(SchedulerError::WorkerNotFound { .. }) => {
                debug!("释放时Worker {} 已不存在", worker_id);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn record_outcome(&self, worker_id: &str, succeeded: bool, duration: Option<Duration>) {
        if let Err(e) = self
            .repos
            .metrics
            .record_task_outcome(worker_id, succeeded, duration)
            .await
        {
            warn!("更新Worker {} 指标失败: {}", worker_id, e);
        }
    }

    fn publish_task_hops(&self, task: &Task, hops: &[Hop<TaskStatus>], message: Option<&str>) {
        for (from, to) in hops {
            self.hooks.publish(StateChangeEvent::Task(TaskStateChange {
                task_id: task.id.clone(),
                experiment_id: task.experiment_id.clone(),
                from: *from,
                to: *to,
                timestamp: task.updated_at,
                message: message.map(str::to_string),
            }));
        }
    }

    fn publish_worker_hop(&self, worker: &Worker, hop: Hop<WorkerStatus>, message: Option<&str>) {
        self.hooks.publish(StateChangeEvent::Worker(WorkerStateChange {
            worker_id: worker.id.clone(),
            experiment_id: worker.experiment_id.clone(),
            from: hop.0,
            to: hop.1,
            timestamp: worker.updated_at,
            message: message.map(str::to_string),
        }));
    }

    async fn load_task(&self, task_id: &str) -> SchedulerResult<Task> {
        self.repos
            .tasks
            .get_by_id(task_id)
            .await?
            .ok_or_else(|| SchedulerError::task_not_found(task_id))
    }

    pub(crate) async fn load_worker(&self, worker_id: &str) -> SchedulerResult<Worker> {
        self.repos
            .workers
            .get_by_id(worker_id)
            .await?
            .ok_or_else(|| SchedulerError::worker_not_found(worker_id))
    }

    async fn load_experiment(&self, experiment_id: &str) -> SchedulerResult<Experiment> {
        self.repos
            .experiments
            .get_by_id(experiment_id)
            .await?
            .ok_or_else(|| SchedulerError::experiment_not_found(experiment_id))
    }
}

fn ensure_worker_idle(worker: &Worker) -> SchedulerResult<()> {
    if worker.is_terminated() {
        return Err(SchedulerError::WorkerTerminated {
            id: worker.id.clone(),
        });
    }
    if worker.status == WorkerStatus::Busy {
        return Err(SchedulerError::invalid_worker_state(
            &worker.id,
            format!(
                "正在执行任务 {}",
                worker.current_task_id.as_deref().unwrap_or("-")
            ),
        ));
    }
    Ok(())
}

fn ensure_not_final(task: &Task) -> SchedulerResult<()> {
    if task.status.is_final() {
        return Err(SchedulerError::TaskAlreadyFinal {
            id: task.id.clone(),
            status: task.status.to_string(),
        });
    }
    Ok(())
}

fn ensure_assigned(task: &Task, worker_id: &str) -> SchedulerResult<()> {
    if !task.is_assigned_to(worker_id) {
        return Err(SchedulerError::TaskNotAssigned {
            task_id: task.id.clone(),
            worker_id: worker_id.to_string(),
        });
    }
    Ok(())
}

fn record_empty_poll(reason: &'static str) {
    counter!(EMPTY_POLLS, "reason" => reason).increment(1);
}

