use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use super::{
    database::DatabaseConfig,
    engine::{LifecycleConfig, OptimizerConfig, SchedulerConfig},
    observability::ObservabilityConfig,
    resources::ComputeResourceSeed,
};

/// System configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub scheduler: SchedulerConfig,
    pub optimizer: OptimizerConfig,
    pub lifecycle: LifecycleConfig,
    pub observability: ObservabilityConfig,
    pub resources: Vec<ComputeResourceSeed>,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// `config_path` 为空时依次尝试默认路径，都不存在则只使用默认值和环境变量。
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = [
                "config/scheduler.toml",
                "scheduler.toml",
                "/etc/experiment-scheduler/config.toml",
            ];

            if let Some(path) = default_paths.iter().find(|p| Path::new(p).exists()) {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("SCHEDULER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    pub fn validate(&self) -> Result<()> {
        self.database.validate().context("数据库配置验证失败")?;
        self.scheduler.validate().context("调度器配置验证失败")?;
        self.optimizer.validate().context("优化器配置验证失败")?;
        self.lifecycle
            .validate()
            .context("Worker生命周期配置验证失败")?;
        self.observability
            .validate()
            .context("可观测性配置验证失败")?;

        let mut seen = HashSet::new();
        for resource in &self.resources {
            resource.validate().context("计算资源配置验证失败")?;
            if !seen.insert(resource.id.as_str()) {
                return Err(anyhow::anyhow!("计算资源ID重复: {}", resource.id));
            }
        }

        Ok(())
    }
}
