//! 外部协作方接口
//!
//! 调度引擎只依赖这些抽象，具体实现由基础设施层或部署方提供。

mod collaborators;
mod hooks;
mod spawner;

pub use collaborators::{DataMover, ExperimentOrchestrator, ResourceRegistry};
pub use hooks::{ExperimentStateChangeHook, TaskStateChangeHook, WorkerStateChangeHook};
pub use spawner::{SpawnContext, WorkerSpawner};
