use metrics_exporter_prometheus::PrometheusBuilder;
use scheduler_core::{SchedulerError, SchedulerResult};
use std::net::SocketAddr;
use tracing::info;

/// 安装全局 Prometheus 导出器并在指定地址提供 /metrics
pub fn install_prometheus_exporter(bind_address: &str) -> SchedulerResult<()> {
    let addr: SocketAddr = bind_address
        .parse()
        .map_err(|e| SchedulerError::Configuration(format!("指标监听地址无效 {bind_address}: {e}")))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| SchedulerError::Internal(format!("安装Prometheus导出器失败: {e}")))?;

    info!("Prometheus指标导出已启动: {}", addr);
    Ok(())
}
