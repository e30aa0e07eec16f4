//! Worker生命周期管理
//!
//! 按资源类型启动Worker、注册与心跳、walltime跟踪、空闲复用以及终止。
//! 实验结束后由回收钩子终止其Worker。

pub mod lifecycle;
pub mod reaper;
pub mod spawners;

pub use lifecycle::{WorkerLifecycle, WorkerRegistration};
pub use reaper::ExperimentWorkerReaper;
pub use spawners::{BareMetalSpawner, KubernetesSpawner, SlurmSpawner, SpawnerRegistry};
