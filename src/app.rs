use std::sync::Arc;

use anyhow::{Context, Result};
use scheduler_core::config::{AppConfig, DatabaseBackend};
use scheduler_dispatcher::{
    DistributionOptimizer, HookPublisher, StagingCoordinator, StateChangeHookRegistry,
    TaskScheduler, WorkerFailureDetector, WorkerFailureDetectorService,
};
use scheduler_domain::Repositories;
use scheduler_infrastructure::{
    in_memory_repositories, install_prometheus_exporter, AuditLogHook, DatabaseManager,
    InMemoryResourceRegistry, MetricsHook, SharedFilesystemDataMover,
};
use scheduler_worker::{ExperimentWorkerReaper, SpawnerRegistry, WorkerLifecycle};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info};

/// 主应用程序
///
/// 组装仓储、资源注册表、钩子分发、调度器和Worker生命周期，并运行后台巡检。
pub struct Application {
    config: AppConfig,
    scheduler: Arc<TaskScheduler>,
    staging: Arc<StagingCoordinator>,
    lifecycle: Arc<WorkerLifecycle>,
    detector: Arc<WorkerFailureDetector>,
    hooks: HookPublisher,
    hook_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Application {
    /// 创建新的应用实例
    pub async fn new(config: AppConfig) -> Result<Self> {
        info!("初始化应用程序，存储后端: {:?}", config.database.backend);

        let repos = create_repositories(&config).await?;

        let registry = Arc::new(
            InMemoryResourceRegistry::from_seeds(&config.resources)
                .await
                .context("加载计算资源失败")?,
        );

        let mut hook_registry = StateChangeHookRegistry::new();
        let metrics_hook = Arc::new(MetricsHook::new());
        hook_registry.register_task_hook(metrics_hook.clone());
        hook_registry.register_worker_hook(metrics_hook.clone());
        hook_registry.register_experiment_hook(metrics_hook);
        if config.observability.audit_log_enabled {
            let audit_hook = Arc::new(AuditLogHook::new());
            hook_registry.register_task_hook(audit_hook.clone());
            hook_registry.register_worker_hook(audit_hook.clone());
            hook_registry.register_experiment_hook(audit_hook);
        }
        let reaper = Arc::new(ExperimentWorkerReaper::new());
        hook_registry.register_experiment_hook(reaper.clone());
        hook_registry.register_worker_hook(reaper.clone());
        let (hooks, hook_handle) = hook_registry.start(config.scheduler.hook_channel_capacity);

        let scheduler = Arc::new(TaskScheduler::new(
            repos,
            registry,
            hooks.clone(),
            DistributionOptimizer::from_config(&config.optimizer),
            config.scheduler.clone(),
        ));

        let staging = Arc::new(StagingCoordinator::new(
            scheduler.clone(),
            Arc::new(SharedFilesystemDataMover::new()),
        ));

        let lifecycle = Arc::new(WorkerLifecycle::new(
            scheduler.clone(),
            staging.clone(),
            SpawnerRegistry::with_defaults(),
            config.lifecycle.clone(),
        ));
        reaper.bind(&lifecycle);

        let detector = Arc::new(
            WorkerFailureDetector::new(scheduler.clone(), Some((&config.lifecycle).into()))
                .with_terminator(lifecycle.clone()),
        );

        if config.observability.metrics_enabled {
            install_prometheus_exporter(&config.observability.metrics_bind_address)
                .context("启动指标导出失败")?;
        }

        Ok(Self {
            config,
            scheduler,
            staging,
            lifecycle,
            detector,
            hooks,
            hook_handle: Mutex::new(Some(hook_handle)),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &Arc<TaskScheduler> {
        &self.scheduler
    }

    pub fn staging(&self) -> &Arc<StagingCoordinator> {
        &self.staging
    }

    pub fn lifecycle(&self) -> &Arc<WorkerLifecycle> {
        &self.lifecycle
    }

    pub fn hooks(&self) -> &HookPublisher {
        &self.hooks
    }

    /// 运行后台巡检直到收到关闭信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!("启动Worker失效检测和walltime巡检");

        let detector_handle = {
            let detector = Arc::clone(&self.detector);
            tokio::spawn(async move {
                if let Err(e) = detector.start_detection().await {
                    error!("Worker失效检测运行失败: {}", e);
                }
            })
        };

        let sweep_handle = {
            let lifecycle = Arc::clone(&self.lifecycle);
            tokio::spawn(async move {
                if let Err(e) = lifecycle.start_sweep().await {
                    error!("walltime巡检运行失败: {}", e);
                }
            })
        };

        let _ = shutdown_rx.recv().await;
        info!("应用收到关闭信号");

        self.detector.stop_detection().await?;
        self.lifecycle.stop_sweep().await;
        // 巡检循环可能停在间隔等待上，直接结束
        detector_handle.abort();
        sweep_handle.abort();

        self.shutdown().await;
        info!("后台巡检已停止");
        Ok(())
    }

    /// 等待已发布的状态变更事件分发完毕
    pub async fn shutdown(&self) {
        self.hooks.flush().await;
        if let Some(handle) = self.hook_handle.lock().await.take() {
            // 发布端仍被调度器持有，分发任务不会自行退出
            handle.abort();
        }
    }
}

/// 按配置的后端创建仓储
async fn create_repositories(config: &AppConfig) -> Result<Repositories> {
    match config.database.backend {
        DatabaseBackend::Memory => {
            info!("使用进程内存储");
            Ok(in_memory_repositories())
        }
        DatabaseBackend::Postgres => {
            info!("连接数据库: {}", mask_database_url(&config.database.url));
            let manager = DatabaseManager::new(&config.database)
                .await
                .context("连接数据库失败")?;
            info!("数据库连接成功");
            Ok(manager.repositories())
        }
    }
}

/// 屏蔽数据库URL中的敏感信息
fn mask_database_url(url: &str) -> String {
    if let Some(at_pos) = url.find('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            let mut masked = url.to_string();
            masked.replace_range(colon_pos + 1..at_pos, "***");
            return masked;
        }
    }
    url.to_string()
}
