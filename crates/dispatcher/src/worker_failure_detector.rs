use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use scheduler_core::{config::LifecycleConfig, SchedulerResult};
use scheduler_domain::entities::{ConnectionState, Worker};

use crate::scheduler::TaskScheduler;

const HEARTBEAT_TIMEOUT_REASON: &str = "心跳超时";

/// Worker失效检测配置
#[derive(Debug, Clone)]
pub struct WorkerFailureDetectorConfig {
    /// 心跳超时时间（秒）
    pub heartbeat_timeout_seconds: i64,
    /// 检测间隔（秒）
    pub detection_interval_seconds: u64,
}

impl Default for WorkerFailureDetectorConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_seconds: 120,
            detection_interval_seconds: 30,
        }
    }
}

impl From<&LifecycleConfig> for WorkerFailureDetectorConfig {
    fn from(config: &LifecycleConfig) -> Self {
        Self {
            heartbeat_timeout_seconds: config.heartbeat_timeout_seconds,
            detection_interval_seconds: config.detection_interval_seconds,
        }
    }
}

/// Worker失效检测服务接口
#[async_trait]
pub trait WorkerFailureDetectorService: Send + Sync {
    /// 启动失效检测
    async fn start_detection(&self) -> SchedulerResult<()>;

    /// 停止失效检测
    async fn stop_detection(&self) -> SchedulerResult<()>;

    /// 检测失效的Worker
    async fn detect_failed_workers(&self) -> SchedulerResult<Vec<Worker>>;

    /// 处理失效的Worker
    async fn handle_failed_worker(&self, worker: &Worker) -> SchedulerResult<()>;
}

/// 终止失效Worker的执行方
///
/// 生命周期管理实现它以便同时回收资源侧作业；未设置时检测器直接调用调度器的失效处理。
#[async_trait]
pub trait WorkerTerminator: Send + Sync {
    /// 返回终止标记是否由本次调用写入
    async fn terminate(&self, worker_id: &str, reason: &str) -> SchedulerResult<bool>;
}

/// 心跳超时检测，超时的Worker交给调度器的失效处理
pub struct WorkerFailureDetector {
    scheduler: Arc<TaskScheduler>,
    config: WorkerFailureDetectorConfig,
    terminator: Option<Arc<dyn WorkerTerminator>>,
    running: Arc<tokio::sync::RwLock<bool>>,
}

impl WorkerFailureDetector {
    pub fn new(scheduler: Arc<TaskScheduler>, config: Option<WorkerFailureDetectorConfig>) -> Self {
        Self {
            scheduler,
            config: config.unwrap_or_default(),
            terminator: None,
            running: Arc::new(tokio::sync::RwLock::new(false)),
        }
    }

    pub fn with_terminator(mut self, terminator: Arc<dyn WorkerTerminator>) -> Self {
        self.terminator = Some(terminator);
        self
    }

    /// 尚未注册的Worker不参与心跳检测
    fn is_worker_failed(&self, worker: &Worker, now: DateTime<Utc>) -> bool {
        if worker.connection_state == ConnectionState::Pending {
            return false;
        }
        worker.is_heartbeat_expired(
            now,
            chrono::Duration::seconds(self.config.heartbeat_timeout_seconds),
        )
    }

    /// 执行一轮检测，返回处理的Worker数量
    pub async fn run_once(&self) -> SchedulerResult<usize> {
        let failed_workers = self.detect_failed_workers().await?;
        let mut handled = 0;
        for worker in &failed_workers {
            match self.handle_failed_worker(worker).await {
                Ok(()) => handled += 1,
                Err(e) => error!("处理失效Worker {} 时出错: {}", worker.id, e),
            }
        }
        Ok(handled)
    }

    async fn detection_loop(&self) -> SchedulerResult<()> {
        info!("启动Worker失效检测循环");

        let interval_duration = Duration::from_secs(self.config.detection_interval_seconds);

        loop {
            if !*self.running.read().await {
                info!("收到停止信号，退出Worker失效检测循环");
                break;
            }

            if let Err(e) = self.run_once().await {
                error!("Worker失效检测时出错: {}", e);
            }

            tokio::time::sleep(interval_duration).await;
        }

        Ok(())
    }
}

#[async_trait]
impl WorkerFailureDetectorService for WorkerFailureDetector {
    async fn start_detection(&self) -> SchedulerResult<()> {
        info!("启动Worker失效检测服务");

        {
            let mut running = self.running.write().await;
            *running = true;
        }

        self.detection_loop().await
    }

    async fn stop_detection(&self) -> SchedulerResult<()> {
        info!("停止Worker失效检测服务");

        let mut running = self.running.write().await;
        *running = false;

        Ok(())
    }

    async fn detect_failed_workers(&self) -> SchedulerResult<Vec<Worker>> {
        debug!("开始检测失效的Worker");

        let now = Utc::now();
        let all_workers = self.scheduler.repositories().workers.list().await?;
        let mut failed_workers = Vec::new();

        for worker in all_workers {
            if self.is_worker_failed(&worker, now) {
                warn!(
                    "检测到失效Worker: {} (上次心跳: {})",
                    worker.id,
                    worker.last_seen().format("%Y-%m-%d %H:%M:%S UTC")
                );
                failed_workers.push(worker);
            }
        }

        if !failed_workers.is_empty() {
            info!("检测到 {} 个失效Worker", failed_workers.len());
        }

        Ok(failed_workers)
    }

    async fn handle_failed_worker(&self, worker: &Worker) -> SchedulerResult<()> {
        info!("处理失效Worker: {}", worker.id);

        if let Some(terminator) = &self.terminator {
            terminator.terminate(&worker.id, HEARTBEAT_TIMEOUT_REASON).await?;
            return Ok(());
        }

        let report = self.scheduler.reconcile_worker_failure(&worker.id).await?;
        if report.affected.is_empty() {
            debug!("失效Worker {} 上没有需要处理的任务", worker.id);
        } else {
            info!(
                "失效Worker {} 上的 {} 个任务已重新处理",
                worker.id,
                report.affected.len()
            );
        }

        // 快照之后已被其他路径终止的Worker不再重复扣减
        if !report.terminated_now {
            return Ok(());
        }
        if let Err(e) = self
            .scheduler
            .registry()
            .adjust_worker_count(&worker.compute_resource_id, -1)
            .await
        {
            warn!("更新资源 {} 的Worker计数失败: {}", worker.compute_resource_id, e);
        }

        Ok(())
    }
}
