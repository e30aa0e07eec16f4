//! Worker生命周期
//!
//! Worker记录在启动提交时创建（连接状态 PENDING），注册后进入 CONNECTED，
//! walltime 从注册时刻开始计算。终止统一经由调度器的失效处理，保证Worker上的任务
//! 按失败规则重新入队或永久失败。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use metrics::counter;
use scheduler_core::{config::LifecycleConfig, SchedulerError, SchedulerResult};
use scheduler_dispatcher::{
    StagingCoordinator, TaskScheduler, WorkerFailureReport, WorkerTerminator,
};
use scheduler_domain::entities::{
    ComputeResource, ConnectionState, Experiment, Resource, SchedulingPlan, Task, TaskStatus,
    Worker, WorkerMetrics, WorkerStatus,
};
use scheduler_domain::ports::SpawnContext;
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::spawners::SpawnerRegistry;

const WORKERS_SPAWNED: &str = "scheduler_workers_spawned_total";
const WORKERS_TERMINATED: &str = "scheduler_workers_terminated_total";
const EXPERIMENT_FINISHED_REASON: &str = "实验已结束";

/// Worker启动后的注册请求
#[derive(Debug, Clone)]
pub struct WorkerRegistration {
    pub worker_id: String,
    pub experiment_id: String,
    pub compute_resource_id: String,
    pub user_id: String,
    /// 未知的Worker首次注册时使用，默认取配置值
    pub walltime: Option<Duration>,
}

pub struct WorkerLifecycle {
    scheduler: Arc<TaskScheduler>,
    staging: Arc<StagingCoordinator>,
    spawners: SpawnerRegistry,
    config: LifecycleConfig,
    running: Arc<RwLock<bool>>,
}

impl WorkerLifecycle {
    pub fn new(
        scheduler: Arc<TaskScheduler>,
        staging: Arc<StagingCoordinator>,
        spawners: SpawnerRegistry,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            scheduler,
            staging,
            spawners,
            config,
            running: Arc::new(RwLock::new(false)),
        }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// 在计算资源上启动一个新Worker
    #[instrument(skip(self))]
    pub async fn spawn_worker(
        &self,
        experiment_id: &str,
        compute_resource_id: &str,
        walltime: Option<Duration>,
    ) -> SchedulerResult<Worker> {
        let experiment = self.load_experiment(experiment_id).await?;
        if experiment.status.is_final() {
            return Err(SchedulerError::ExperimentNotActive {
                id: experiment.id.clone(),
                status: experiment.status.to_string(),
            });
        }

        let resource = self.compute_resource(compute_resource_id).await?;
        if !resource.is_active() || resource.available_capacity() == 0 {
            return Err(SchedulerError::ResourceUnavailable {
                id: resource.id.clone(),
            });
        }

        let mut walltime = walltime.unwrap_or_else(|| self.config.default_walltime());
        if let Some(limit) = experiment.requirements.walltime {
            walltime = walltime.min(limit);
        }

        let spawner = self.spawners.get(resource.resource_type)?;
        let worker_id = format!("worker-{}", Uuid::new_v4());
        let ctx = SpawnContext {
            worker_id: worker_id.clone(),
            experiment_id: experiment.id.clone(),
            user_id: experiment.owner_id.clone(),
            resource: resource.clone(),
            walltime,
            requirements: experiment.requirements.clone(),
            worker_binary: self.config.worker_binary.clone(),
            server_address: self.config.server_address.clone(),
            working_dir: self.config.working_dir.clone(),
        };

        let script = spawner.generate_worker_spawn_script(&ctx)?;
        let job_id = spawner.submit(&ctx, &script).await.map_err(|e| {
            error!("在资源 {} 上启动Worker {} 失败: {}", resource.id, worker_id, e);
            e
        })?;

        let mut worker = Worker::new(
            &worker_id,
            &experiment.id,
            &resource.id,
            &experiment.owner_id,
            walltime,
        );
        worker.spawn_job_id = Some(job_id.clone());
        worker.metadata = serde_json::json!({ "resource_type": resource.resource_type.as_str() });

        let worker = match self.scheduler.repositories().workers.create(&worker).await {
            Ok(saved) => saved,
            Err(e) => {
                if let Err(cancel_err) = spawner.cancel(&job_id).await {
                    warn!("回收作业 {} 失败: {}", job_id, cancel_err);
                }
                return Err(e);
            }
        };

        self.adjust_worker_count(&resource.id, 1).await;
        counter!(WORKERS_SPAWNED, "resource_type" => resource.resource_type.as_str()).increment(1);
        info!(
            "Worker {} 已提交到资源 {} (作业 {}，walltime {:?})",
            worker.id, resource.id, job_id, walltime
        );
        Ok(worker)
    }

    /// 按分布方案批量启动Worker，单个资源失败不影响其他资源
    pub async fn provision_workers(&self, plan: &SchedulingPlan) -> SchedulerResult<Vec<Worker>> {
        let mut spawned = Vec::new();
        for (resource_id, count) in &plan.distribution.allocations {
            for _ in 0..*count {
                match self
                    .spawn_worker(&plan.experiment_id, resource_id, None)
                    .await
                {
                    Ok(worker) => spawned.push(worker),
                    Err(e) => {
                        warn!("资源 {} 上的Worker启动中止: {}", resource_id, e);
                        break;
                    }
                }
            }
        }

        if spawned.is_empty() && plan.distribution.total_workers > 0 {
            return Err(SchedulerError::SchedulingFailed(format!(
                "实验 {} 没有成功启动任何Worker",
                plan.experiment_id
            )));
        }
        info!(
            "实验 {} 启动了 {}/{} 个Worker",
            plan.experiment_id,
            spawned.len(),
            plan.distribution.total_workers
        );
        Ok(spawned)
    }

    #[instrument(skip(self, registration), fields(worker_id = %registration.worker_id))]
    pub async fn register_worker(&self, registration: WorkerRegistration) -> SchedulerResult<Worker> {
        let existing = self
            .scheduler
            .repositories()
            .workers
            .get_by_id(&registration.worker_id)
            .await?;

        let Some(existing) = existing else {
            return self.register_unknown_worker(registration).await;
        };

        if existing.is_terminated() {
            return Err(SchedulerError::WorkerTerminated {
                id: existing.id.clone(),
            });
        }
        if existing.experiment_id != registration.experiment_id
            || existing.compute_resource_id != registration.compute_resource_id
        {
            return Err(SchedulerError::invalid_worker_state(
                &existing.id,
                format!(
                    "注册信息不匹配: 实验 {} 资源 {}",
                    registration.experiment_id, registration.compute_resource_id
                ),
            ));
        }

        let now = Utc::now();
        let worker = self
            .scheduler
            .update_worker(&registration.worker_id, Some("Worker注册"), |w| {
                if w.is_terminated() {
                    return Err(SchedulerError::WorkerTerminated { id: w.id.clone() });
                }
                // 首次注册时开始计算walltime
                if w.connection_state == ConnectionState::Pending {
                    w.registered_at = now;
                    w.walltime_remaining = w.walltime;
                }
                w.connection_state = ConnectionState::Connected;
                w.last_heartbeat = Some(now);
                w.updated_at = now;
                Ok(true)
            })
            .await?;

        info!("Worker {} 已注册", worker.id);
        Ok(worker)
    }

    async fn register_unknown_worker(&self, registration: WorkerRegistration) -> SchedulerResult<Worker> {
        let experiment = self.load_experiment(&registration.experiment_id).await?;
        let resource = self.compute_resource(&registration.compute_resource_id).await?;

        let mut walltime = registration
            .walltime
            .unwrap_or_else(|| self.config.default_walltime());
        if let Some(limit) = experiment.requirements.walltime {
            walltime = walltime.min(limit);
        }

        let mut worker = Worker::new(
            &registration.worker_id,
            &experiment.id,
            &resource.id,
            &registration.user_id,
            walltime,
        );
        worker.connection_state = ConnectionState::Connected;
        worker.last_heartbeat = Some(worker.registered_at);

        let worker = self.scheduler.repositories().workers.create(&worker).await?;
        self.adjust_worker_count(&resource.id, 1).await;
        info!("外部启动的Worker {} 已注册到资源 {}", worker.id, resource.id);
        Ok(worker)
    }

    /// 记录心跳，刷新剩余walltime并保存上报的指标
    pub async fn send_heartbeat(
        &self,
        worker_id: &str,
        metrics: Option<WorkerMetrics>,
    ) -> SchedulerResult<Worker> {
        let now = Utc::now();
        let worker = self
            .scheduler
            .update_worker(worker_id, None, |w| {
                if w.is_terminated() {
                    return Err(SchedulerError::WorkerTerminated { id: w.id.clone() });
                }
                if w.connection_state == ConnectionState::Pending {
                    w.registered_at = now;
                }
                w.connection_state = ConnectionState::Connected;
                w.last_heartbeat = Some(now);
                w.walltime_remaining = w.walltime_remaining_at(now);
                w.updated_at = now;
                Ok(true)
            })
            .await?;

        if let Some(mut reported) = metrics {
            reported.worker_id = worker.id.clone();
            self.scheduler
                .repositories()
                .metrics
                .record_report(&reported)
                .await?;
        }

        debug!(
            "Worker {} 心跳，剩余walltime {:?}",
            worker.id, worker.walltime_remaining
        );
        Ok(worker)
    }

    /// 剩余walltime能否容纳预计时长
    pub async fn check_walltime_remaining(
        &self,
        worker_id: &str,
        estimated: Duration,
    ) -> SchedulerResult<(bool, Duration)> {
        let worker = self.load_worker(worker_id).await?;
        Ok(worker.walltime_fits(estimated, Utc::now()))
    }

    /// 空闲Worker直接拉取下一个任务
    ///
    /// walltime 耗尽或实验已结束时Worker被终止，返回 `None`。
    #[instrument(skip(self))]
    pub async fn reuse_worker(&self, worker_id: &str) -> SchedulerResult<Option<Task>> {
        let worker = self.load_worker(worker_id).await?;
        if worker.is_terminated() {
            return Err(SchedulerError::WorkerTerminated {
                id: worker.id.clone(),
            });
        }
        if worker.status == WorkerStatus::Busy {
            return Err(SchedulerError::invalid_worker_state(
                &worker.id,
                "仍在执行任务，不能复用",
            ));
        }

        if worker.walltime_remaining_at(Utc::now()).is_zero() {
            self.terminate_worker(worker_id, "walltime已耗尽").await?;
            return Ok(None);
        }

        let experiment = self.load_experiment(&worker.experiment_id).await?;
        if !experiment.accepts_work() {
            self.terminate_worker(worker_id, EXPERIMENT_FINISHED_REASON).await?;
            return Ok(None);
        }

        let Some(task) = self.scheduler.assign_task(worker_id).await? else {
            debug!("Worker {} 暂无可执行的任务", worker_id);
            return Ok(None);
        };

        if task.status == TaskStatus::DataStaging {
            return self.staging.stage_inputs(&task).await.map(Some);
        }
        Ok(Some(task))
    }

    /// 终止Worker，取消资源侧作业并按失效规则处理其任务
    #[instrument(skip(self))]
    pub async fn terminate_worker(&self, worker_id: &str, reason: &str) -> SchedulerResult<Vec<Task>> {
        Ok(self.shut_down(worker_id, reason).await?.affected)
    }

    /// 实验结束后终止其空闲Worker，返回本次终止的数量
    ///
    /// 仍在执行任务的Worker在释放为 IDLE 时由 `retire_if_experiment_finished` 收尾。
    #[instrument(skip(self))]
    pub async fn shutdown_experiment_workers(&self, experiment_id: &str) -> SchedulerResult<usize> {
        let experiment = self.load_experiment(experiment_id).await?;
        if experiment.accepts_work() {
            debug!("实验 {} 仍在执行，保留其Worker", experiment_id);
            return Ok(0);
        }

        let workers = self
            .scheduler
            .repositories()
            .workers
            .list_by_experiment(experiment_id)
            .await?;
        let mut terminated = 0;
        for worker in workers
            .iter()
            .filter(|w| !w.is_terminated() && w.status == WorkerStatus::Idle)
        {
            match self.shut_down(&worker.id, EXPERIMENT_FINISHED_REASON).await {
                Ok(report) if report.terminated_now => terminated += 1,
                Ok(_) => {}
                Err(e) => error!("终止Worker {} 时出错: {}", worker.id, e),
            }
        }
        info!(
            "实验 {} 已{}，终止了 {} 个Worker",
            experiment_id, experiment.status, terminated
        );
        Ok(terminated)
    }

    /// 空闲Worker所属实验已结束时终止它，返回是否终止
    pub async fn retire_if_experiment_finished(&self, worker_id: &str) -> SchedulerResult<bool> {
        let worker = self.load_worker(worker_id).await?;
        if worker.is_terminated() || worker.status != WorkerStatus::Idle {
            return Ok(false);
        }
        if self.load_experiment(&worker.experiment_id).await?.accepts_work() {
            return Ok(false);
        }
        let report = self.shut_down(worker_id, EXPERIMENT_FINISHED_REASON).await?;
        Ok(report.terminated_now)
    }

    /// 先写终止标记，只有写入成功的调用才回收作业并扣减资源计数
    async fn shut_down(&self, worker_id: &str, reason: &str) -> SchedulerResult<WorkerFailureReport> {
        let report = self.scheduler.reconcile_worker_failure(worker_id).await?;
        if !report.terminated_now {
            debug!("Worker {} 已终止", worker_id);
            return Ok(report);
        }

        let worker = &report.worker;
        if let Some(job_id) = &worker.spawn_job_id {
            self.cancel_job(worker, job_id).await;
        }
        self.adjust_worker_count(&worker.compute_resource_id, -1).await;
        counter!(WORKERS_TERMINATED).increment(1);
        info!(
            "Worker {} 已终止 ({})，重新处理了 {} 个任务",
            worker_id,
            reason,
            report.affected.len()
        );
        Ok(report)
    }

    /// 终止walltime已耗尽的空闲Worker，返回终止数量
    pub async fn sweep_expired_walltime(&self) -> SchedulerResult<usize> {
        let now = Utc::now();
        let workers = self.scheduler.repositories().workers.list().await?;
        let mut terminated = 0;
        for worker in workers.iter().filter(|w| {
            !w.is_terminated()
                && w.status == WorkerStatus::Idle
                && w.walltime_remaining_at(now).is_zero()
        }) {
            match self.shut_down(&worker.id, "walltime已耗尽").await {
                Ok(report) if report.terminated_now => terminated += 1,
                Ok(_) => {}
                Err(e) => error!("终止Worker {} 时出错: {}", worker.id, e),
            }
        }
        if terminated > 0 {
            info!("walltime巡检终止了 {} 个Worker", terminated);
        }
        Ok(terminated)
    }

    /// 周期性执行walltime巡检，直到 `stop_sweep` 被调用
    pub async fn start_sweep(&self) -> SchedulerResult<()> {
        info!("启动walltime巡检");
        *self.running.write().await = true;

        let interval = Duration::from_secs(self.config.walltime_sweep_interval_seconds);
        loop {
            if !*self.running.read().await {
                info!("收到停止信号，退出walltime巡检");
                break;
            }
            if let Err(e) = self.sweep_expired_walltime().await {
                error!("walltime巡检出错: {}", e);
            }
            tokio::time::sleep(interval).await;
        }
        Ok(())
    }

    pub async fn stop_sweep(&self) {
        *self.running.write().await = false;
    }

    /// 各资源上仍在运行的Worker数量
    pub async fn active_worker_counts(&self, experiment_id: &str) -> SchedulerResult<HashMap<String, u32>> {
        let mut counts = HashMap::new();
        for worker in self
            .scheduler
            .repositories()
            .workers
            .list_by_experiment(experiment_id)
            .await?
            .into_iter()
            .filter(|w| !w.is_terminated())
        {
            *counts.entry(worker.compute_resource_id).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn cancel_job(&self, worker: &Worker, job_id: &str) {
        let spawner = match self.compute_resource(&worker.compute_resource_id).await {
            Ok(resource) => self.spawners.get(resource.resource_type),
            Err(e) => Err(e),
        };
        match spawner {
            Ok(spawner) => {
                if let Err(e) = spawner.cancel(job_id).await {
                    warn!("取消Worker {} 的作业 {} 失败: {}", worker.id, job_id, e);
                }
            }
            Err(e) => warn!("无法取消Worker {} 的作业 {}: {}", worker.id, job_id, e),
        }
    }

    async fn adjust_worker_count(&self, resource_id: &str, delta: i32) {
        if let Err(e) = self
            .scheduler
            .registry()
            .adjust_worker_count(resource_id, delta)
            .await
        {
            warn!("更新资源 {} 的Worker计数失败: {}", resource_id, e);
        }
    }

    async fn compute_resource(&self, resource_id: &str) -> SchedulerResult<ComputeResource> {
        match self.scheduler.registry().get_resource(resource_id).await? {
            Some(Resource::Compute(resource)) => Ok(resource),
            Some(Resource::Storage(_)) => Err(SchedulerError::ResourceTypeMismatch {
                id: resource_id.to_string(),
                expected: "compute".to_string(),
            }),
            None => Err(SchedulerError::ResourceNotFound {
                id: resource_id.to_string(),
            }),
        }
    }

    async fn load_worker(&self, worker_id: &str) -> SchedulerResult<Worker> {
        self.scheduler
            .repositories()
            .workers
            .get_by_id(worker_id)
            .await?
            .ok_or_else(|| SchedulerError::worker_not_found(worker_id))
    }

    async fn load_experiment(&self, experiment_id: &str) -> SchedulerResult<Experiment> {
        self.scheduler
            .repositories()
            .experiments
            .get_by_id(experiment_id)
            .await?
            .ok_or_else(|| SchedulerError::experiment_not_found(experiment_id))
    }
}

#[async_trait]
impl WorkerTerminator for WorkerLifecycle {
    async fn terminate(&self, worker_id: &str, reason: &str) -> SchedulerResult<bool> {
        Ok(self.shut_down(worker_id, reason).await?.terminated_now)
    }
}
