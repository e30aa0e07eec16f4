use std::sync::Arc;

use scheduler_core::config::SchedulerConfig;
use scheduler_infrastructure::{in_memory_repositories, InMemoryResourceRegistry};
use scheduler_testing_utils::RecordingHook;

use crate::distribution::DistributionOptimizer;
use crate::hook_registry::{HookPublisher, StateChangeHookRegistry};
use crate::scheduler::TaskScheduler;

pub struct SchedulerFixture {
    pub scheduler: Arc<TaskScheduler>,
    pub registry: Arc<InMemoryResourceRegistry>,
    pub recorder: Arc<RecordingHook>,
    pub publisher: HookPublisher,
}

/// 内存仓储上的调度器，所有钩子事件记录到 `recorder`
pub async fn scheduler_fixture() -> SchedulerFixture {
    let recorder = Arc::new(RecordingHook::new());
    let (publisher, _handle) = StateChangeHookRegistry::new()
        .with_task_hook(recorder.clone())
        .with_worker_hook(recorder.clone())
        .with_experiment_hook(recorder.clone())
        .start(256);
    let registry = Arc::new(InMemoryResourceRegistry::new());

    let scheduler = TaskScheduler::new(
        in_memory_repositories(),
        registry.clone(),
        publisher.clone(),
        DistributionOptimizer::default(),
        SchedulerConfig::default(),
    );

    SchedulerFixture {
        scheduler: Arc::new(scheduler),
        registry,
        recorder,
        publisher,
    }
}
