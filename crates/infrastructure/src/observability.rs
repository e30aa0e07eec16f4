//! 可观测性：状态转换审计日志、指标钩子和 Prometheus 导出

mod audit_hook;
mod metrics_hook;
mod prometheus;

pub use audit_hook::AuditLogHook;
pub use metrics_hook::{MetricsHook, SchedulerMetrics};
pub use prometheus::install_prometheus_exporter;
