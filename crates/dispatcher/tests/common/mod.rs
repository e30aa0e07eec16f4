#![allow(dead_code)]

use std::sync::Arc;

use chrono::{Duration, Utc};
use scheduler_core::config::SchedulerConfig;
use scheduler_dispatcher::{
    DistributionOptimizer, HookPublisher, StateChangeHookRegistry, TaskScheduler,
};
use scheduler_domain::entities::{Experiment, Resource, Task, Worker};
use scheduler_domain::repositories::Repositories;
use scheduler_infrastructure::{in_memory_repositories, InMemoryResourceRegistry};
use scheduler_testing_utils::{
    ComputeResourceBuilder, ExperimentBuilder, RecordingHook, TaskBuilder, WorkerBuilder,
};

pub const EXPERIMENT_ID: &str = "exp-1";
pub const RESOURCE_ID: &str = "resource-1";

pub struct Harness {
    pub scheduler: Arc<TaskScheduler>,
    pub registry: Arc<InMemoryResourceRegistry>,
    pub recorder: Arc<RecordingHook>,
    pub publisher: HookPublisher,
}

impl Harness {
    pub async fn new() -> Self {
        Self::build(in_memory_repositories(), SchedulerConfig::default()).await
    }

    pub async fn with_config(config: SchedulerConfig) -> Self {
        Self::build(in_memory_repositories(), config).await
    }

    pub async fn build(repos: Repositories, config: SchedulerConfig) -> Self {
        let recorder = Arc::new(RecordingHook::new());
        let (publisher, _handle) = StateChangeHookRegistry::new()
            .with_task_hook(recorder.clone())
            .with_worker_hook(recorder.clone())
            .with_experiment_hook(recorder.clone())
            .start(1024);

        let registry = Arc::new(InMemoryResourceRegistry::new());
        registry
            .register(Resource::Compute(
                ComputeResourceBuilder::new(RESOURCE_ID).with_max_workers(8).build(),
            ))
            .await;

        let scheduler = TaskScheduler::new(
            repos,
            registry.clone(),
            publisher.clone(),
            DistributionOptimizer::default(),
            config,
        );

        Self {
            scheduler: Arc::new(scheduler),
            registry,
            recorder,
            publisher,
        }
    }

    pub fn repos(&self) -> &Repositories {
        self.scheduler.repositories()
    }

    pub async fn executing_experiment(&self) -> Experiment {
        self.repos()
            .experiments
            .create(&ExperimentBuilder::new().executing().build())
            .await
            .unwrap()
    }

    /// 按创建顺序排列的排队任务
    pub async fn queued_tasks(&self, count: usize, max_retries: u32) -> Vec<Task> {
        let base = Utc::now() - Duration::minutes(10);
        let mut tasks = Vec::with_capacity(count);
        for i in 0..count {
            let task = TaskBuilder::new()
                .queued()
                .with_command(&format!("echo {i}"))
                .with_max_retries(max_retries)
                .created_at(base + Duration::seconds(i as i64))
                .build();
            tasks.push(self.repos().tasks.create(&task).await.unwrap());
        }
        tasks
    }

    pub async fn create_task(&self, task: Task) -> Task {
        self.repos().tasks.create(&task).await.unwrap()
    }

    pub async fn idle_worker(&self, id: &str) -> Worker {
        self.repos()
            .workers
            .create(&WorkerBuilder::new().with_id(id).build())
            .await
            .unwrap()
    }

    pub async fn task(&self, id: &str) -> Task {
        self.repos().tasks.get_by_id(id).await.unwrap().unwrap()
    }

    pub async fn worker(&self, id: &str) -> Worker {
        self.repos().workers.get_by_id(id).await.unwrap().unwrap()
    }

    pub async fn experiment(&self) -> Experiment {
        self.repos()
            .experiments
            .get_by_id(EXPERIMENT_ID)
            .await
            .unwrap()
            .unwrap()
    }
}
