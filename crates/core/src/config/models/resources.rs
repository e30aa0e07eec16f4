use serde::{Deserialize, Serialize};

/// 启动时登记到资源注册表的计算资源
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputeResourceSeed {
    pub id: String,
    pub name: String,
    /// slurm / kubernetes / bare_metal
    pub resource_type: String,
    pub endpoint: String,
    #[serde(default)]
    pub owner_id: String,
    pub cost_per_hour: f64,
    pub max_workers: u32,
    #[serde(default = "default_reliability")]
    pub reliability: f64,
}

fn default_reliability() -> f64 {
    0.95
}

impl ComputeResourceSeed {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.id.is_empty() {
            return Err(anyhow::anyhow!("资源ID不能为空"));
        }

        let valid_types = ["slurm", "kubernetes", "bare_metal"];
        if !valid_types.contains(&self.resource_type.as_str()) {
            return Err(anyhow::anyhow!(
                "资源 {} 的类型无效: {}，支持的类型: {:?}",
                self.id,
                self.resource_type,
                valid_types
            ));
        }

        if !self.cost_per_hour.is_finite() || self.cost_per_hour < 0.0 {
            return Err(anyhow::anyhow!("资源 {} 的单价无效", self.id));
        }

        if !(0.0..=1.0).contains(&self.reliability) {
            return Err(anyhow::anyhow!("资源 {} 的可靠性必须在0到1之间", self.id));
        }

        Ok(())
    }
}
