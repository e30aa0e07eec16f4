//! 实验任务调度与Worker生命周期引擎
//!
//! 进程入口负责组装各crate并运行后台巡检，调度逻辑位于 `scheduler-dispatcher`，
//! Worker启动与回收位于 `scheduler-worker`。

pub mod app;
pub mod shutdown;

pub use app::Application;
pub use shutdown::ShutdownManager;
