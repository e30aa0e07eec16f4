use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 任务调度器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// 实验未声明预计时长时使用的单任务时长（秒）
    pub default_task_duration_seconds: u64,
    /// 乐观锁冲突时的最大重试次数
    pub max_cas_retries: u32,
    /// 冲突重试的基础退避（毫秒），实际值带随机抖动
    pub cas_backoff_millis: u64,
    /// 状态变更钩子通道容量
    pub hook_channel_capacity: usize,
    /// 单次数据搬运的最长等待（秒），超时按暂存失败处理
    pub staging_timeout_seconds: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_task_duration_seconds: 600,
            max_cas_retries: 16,
            cas_backoff_millis: 2,
            hook_channel_capacity: 1024,
            staging_timeout_seconds: 3600,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.default_task_duration_seconds == 0 {
            return Err(anyhow::anyhow!("默认任务时长必须大于0"));
        }

        if self.max_cas_retries == 0 {
            return Err(anyhow::anyhow!("并发冲突重试次数必须大于0"));
        }

        if self.hook_channel_capacity == 0 {
            return Err(anyhow::anyhow!("钩子通道容量必须大于0"));
        }

        if self.staging_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("数据暂存超时时间必须大于0"));
        }

        Ok(())
    }

    pub fn default_task_duration(&self) -> Duration {
        Duration::from_secs(self.default_task_duration_seconds)
    }

    pub fn staging_timeout(&self) -> Duration {
        Duration::from_secs(self.staging_timeout_seconds)
    }
}

/// 分布优化器权重
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub time_weight: f64,
    pub cost_weight: f64,
    pub reliability_weight: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            time_weight: 0.5,
            cost_weight: 0.3,
            reliability_weight: 0.2,
        }
    }
}

impl OptimizerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, value) in [
            ("time_weight", self.time_weight),
            ("cost_weight", self.cost_weight),
            ("reliability_weight", self.reliability_weight),
        ] {
            if !value.is_finite() {
                return Err(anyhow::anyhow!("优化器权重 {name} 必须是有限数值"));
            }
            if value < 0.0 {
                return Err(anyhow::anyhow!("优化器权重 {name} 不能为负数: {value}"));
            }
        }

        Ok(())
    }
}

/// Worker生命周期配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    pub default_walltime_seconds: u64,
    pub heartbeat_timeout_seconds: i64,
    pub detection_interval_seconds: u64,
    pub walltime_sweep_interval_seconds: u64,
    /// 启动脚本中执行的Worker程序
    pub worker_binary: String,
    /// Worker回连的调度服务地址
    pub server_address: String,
    /// Worker工作目录
    pub working_dir: String,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            default_walltime_seconds: 4 * 3600,
            heartbeat_timeout_seconds: 120,
            detection_interval_seconds: 30,
            walltime_sweep_interval_seconds: 60,
            worker_binary: "experiment-worker".to_string(),
            server_address: "localhost:50051".to_string(),
            working_dir: "/tmp/experiment-worker".to_string(),
        }
    }
}

impl LifecycleConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.default_walltime_seconds == 0 {
            return Err(anyhow::anyhow!("默认walltime必须大于0"));
        }

        if self.heartbeat_timeout_seconds <= 0 {
            return Err(anyhow::anyhow!("心跳超时时间必须大于0"));
        }

        if self.detection_interval_seconds == 0 {
            return Err(anyhow::anyhow!("失效检测间隔必须大于0"));
        }

        if self.walltime_sweep_interval_seconds == 0 {
            return Err(anyhow::anyhow!("walltime巡检间隔必须大于0"));
        }

        if self.worker_binary.is_empty() {
            return Err(anyhow::anyhow!("Worker程序路径不能为空"));
        }

        if self.server_address.is_empty() {
            return Err(anyhow::anyhow!("调度服务地址不能为空"));
        }

        Ok(())
    }

    pub fn default_walltime(&self) -> Duration {
        Duration::from_secs(self.default_walltime_seconds)
    }
}
