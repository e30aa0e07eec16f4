//! 调度引擎
//!
//! 任务分配、完成与失败处理、分布优化、数据暂存协调以及Worker失效检测。

pub mod distribution;
pub mod hook_registry;
pub mod retry_policy;
pub mod scheduler;
pub mod staging;
pub mod worker_failure_detector;

#[cfg(test)]
pub mod test_utils;

pub use distribution::{DistributionOptimizer, DistributionRequest};
pub use hook_registry::{HookPublisher, StateChangeHookRegistry};
pub use retry_policy::{apply_failure, cancel_on_failure, FailureOutcome, WORKER_FAILURE_MESSAGE};
pub use scheduler::{TaskScheduler, WorkerFailureReport};
pub use staging::StagingCoordinator;
pub use worker_failure_detector::{
    WorkerFailureDetector, WorkerFailureDetectorConfig, WorkerFailureDetectorService,
    WorkerTerminator,
};
