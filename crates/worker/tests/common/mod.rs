#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use scheduler_core::config::{LifecycleConfig, SchedulerConfig};
use scheduler_dispatcher::{
    DistributionOptimizer, HookPublisher, StagingCoordinator, StateChangeHookRegistry,
    TaskScheduler,
};
use scheduler_domain::entities::{ComputeResourceType, Experiment, Resource, Worker};
use scheduler_domain::ports::WorkerSpawner;
use scheduler_domain::repositories::Repositories;
use scheduler_infrastructure::{in_memory_repositories, InMemoryResourceRegistry};
use scheduler_testing_utils::{
    ComputeResourceBuilder, ExperimentBuilder, RecordingDataMover, RecordingHook,
    RecordingSpawner, TestEnv,
};
use scheduler_worker::{ExperimentWorkerReaper, SpawnerRegistry, WorkerLifecycle};

pub const RESOURCE_ID: &str = "resource-1";

pub struct LifecycleHarness {
    pub lifecycle: Arc<WorkerLifecycle>,
    /// 已注册为钩子，`bind` 之后生效
    pub reaper: Arc<ExperimentWorkerReaper>,
    pub scheduler: Arc<TaskScheduler>,
    pub registry: Arc<InMemoryResourceRegistry>,
    pub data_mover: Arc<RecordingDataMover>,
    pub recorder: Arc<RecordingHook>,
    pub publisher: HookPublisher,
}

impl LifecycleHarness {
    /// 使用记录型SLURM适配器，资源容量为 `max_workers`
    pub async fn new(max_workers: u32) -> (Self, RecordingSpawner) {
        let spawner = RecordingSpawner::new(ComputeResourceType::Slurm);
        let harness = Self::with_spawner(max_workers, Arc::new(spawner.clone())).await;
        (harness, spawner)
    }

    pub async fn with_spawner(max_workers: u32, spawner: Arc<dyn WorkerSpawner>) -> Self {
        let recorder = Arc::new(RecordingHook::new());
        let reaper = Arc::new(ExperimentWorkerReaper::new());
        let (publisher, _handle) = StateChangeHookRegistry::new()
            .with_task_hook(recorder.clone())
            .with_worker_hook(recorder.clone())
            .with_experiment_hook(recorder.clone())
            .with_worker_hook(reaper.clone())
            .with_experiment_hook(reaper.clone())
            .start(256);

        let registry = Arc::new(InMemoryResourceRegistry::new());
        registry
            .register(Resource::Compute(
                ComputeResourceBuilder::new(RESOURCE_ID)
                    .with_max_workers(max_workers)
                    .build(),
            ))
            .await;

        let scheduler = Arc::new(TaskScheduler::new(
            in_memory_repositories(),
            registry.clone(),
            publisher.clone(),
            DistributionOptimizer::default(),
            SchedulerConfig::default(),
        ));
        let data_mover = Arc::new(RecordingDataMover::new());
        let staging = Arc::new(StagingCoordinator::new(scheduler.clone(), data_mover.clone()));

        let config = LifecycleConfig {
            default_walltime_seconds: 3600,
            ..LifecycleConfig::default()
        };
        let lifecycle = Arc::new(WorkerLifecycle::new(
            scheduler.clone(),
            staging,
            SpawnerRegistry::new().with_spawner(spawner),
            config,
        ));

        Self {
            lifecycle,
            reaper,
            scheduler,
            registry,
            data_mover,
            recorder,
            publisher,
        }
    }

    pub fn repos(&self) -> &Repositories {
        self.scheduler.repositories()
    }

    pub async fn create_experiment(&self, experiment: Experiment) -> Experiment {
        self.repos().experiments.create(&experiment).await.unwrap()
    }

    pub async fn executing_experiment(&self) -> Experiment {
        self.create_experiment(
            ExperimentBuilder::new()
                .executing()
                .with_task_duration(Duration::from_secs(60))
                .build(),
        )
        .await
    }

    /// 实验结束后由回收钩子终止Worker
    pub fn enable_reaper(&self) {
        self.reaper.bind(&self.lifecycle);
    }

    /// 等待Worker被终止
    pub async fn wait_terminated(&self, id: &str) -> bool {
        let repos = self.repos().clone();
        let id = id.to_string();
        TestEnv::wait_for(
            || {
                let repos = repos.clone();
                let id = id.clone();
                async move {
                    repos
                        .workers
                        .get_by_id(&id)
                        .await
                        .ok()
                        .flatten()
                        .is_some_and(|w| w.is_terminated())
                }
            },
            Duration::from_secs(5),
        )
        .await
    }

    pub async fn wait_current_workers(&self, expected: u32) -> bool {
        let this = self;
        TestEnv::wait_for(
            move || async move { this.current_workers().await == expected },
            Duration::from_secs(5),
        )
        .await
    }

    pub async fn worker(&self, id: &str) -> Worker {
        self.repos().workers.get_by_id(id).await.unwrap().unwrap()
    }

    pub async fn current_workers(&self) -> u32 {
        use scheduler_domain::ports::ResourceRegistry;
        self.registry
            .get_resource(RESOURCE_ID)
            .await
            .unwrap()
            .and_then(|r| r.as_compute().map(|c| c.current_workers))
            .unwrap()
    }
}
