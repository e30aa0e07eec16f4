use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub log_format: String,
    pub metrics_enabled: bool,
    pub metrics_bind_address: String,
    /// 是否记录每一次状态转换的审计日志
    pub audit_log_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_bind_address: "0.0.0.0:9090".to_string(),
            audit_log_enabled: true,
        }
    }
}

impl ObservabilityConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.as_str()) {
            return Err(anyhow::anyhow!(
                "无效的日志级别: {}，支持的级别: {:?}",
                self.log_level,
                valid_levels
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.log_format.as_str()) {
            return Err(anyhow::anyhow!("无效的日志格式: {}", self.log_format));
        }

        if self.metrics_enabled && self.metrics_bind_address.parse::<std::net::SocketAddr>().is_err()
        {
            return Err(anyhow::anyhow!(
                "指标监听地址格式无效: {}",
                self.metrics_bind_address
            ));
        }

        Ok(())
    }
}
