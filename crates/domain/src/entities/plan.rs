use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::value_objects::{duration_nanos, ExperimentConstraints};

/// 分布优化的目标权重
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CostWeights {
    pub time: f64,
    pub cost: f64,
    pub reliability: f64,
}

impl Default for CostWeights {
    fn default() -> Self {
        Self {
            time: 0.5,
            cost: 0.3,
            reliability: 0.2,
        }
    }
}

impl CostWeights {
    pub fn new(time: f64, cost: f64, reliability: f64) -> Self {
        Self {
            time,
            cost,
            reliability,
        }
    }

    /// 每项截断到 [0,1] 后按总和归一化，全为零时三项等权
    pub fn normalized(&self) -> Self {
        let clamp = |v: f64| if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 };
        let (time, cost, reliability) = (clamp(self.time), clamp(self.cost), clamp(self.reliability));
        let sum = time + cost + reliability;
        if sum <= f64::EPSILON {
            return Self::new(1.0 / 3.0, 1.0 / 3.0, 1.0 / 3.0);
        }
        Self::new(time / sum, cost / sum, reliability / sum)
    }
}

/// 各计算资源上的Worker数量分配
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerDistribution {
    /// 资源ID -> Worker数量
    pub allocations: BTreeMap<String, u32>,
    pub total_workers: u32,
    pub estimated_cost: f64,
    #[serde(with = "duration_nanos")]
    pub estimated_duration: Duration,
    pub weights: CostWeights,
}

impl WorkerDistribution {
    pub fn empty(weights: CostWeights) -> Self {
        Self {
            allocations: BTreeMap::new(),
            total_workers: 0,
            estimated_cost: 0.0,
            estimated_duration: Duration::ZERO,
            weights,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.total_workers == 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchedulingPlan {
    pub experiment_id: String,
    pub task_count: usize,
    pub distribution: WorkerDistribution,
    pub constraints: ExperimentConstraints,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weights_normalized() {
        let w = CostWeights::new(2.0, 1.0, 1.0).normalized();
        // 2.0 先截断为 1.0
        assert!((w.time - 1.0 / 3.0).abs() < 1e-9);
        assert!((w.cost - 1.0 / 3.0).abs() < 1e-9);

        let w = CostWeights::new(0.5, 0.3, 0.2).normalized();
        assert!((w.time + w.cost + w.reliability - 1.0).abs() < 1e-9);
        assert!((w.time - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_all_zero_weights_become_equal() {
        let w = CostWeights::new(0.0, -1.0, f64::NAN).normalized();
        assert!((w.time - w.cost).abs() < 1e-9);
        assert!((w.cost - w.reliability).abs() < 1e-9);
    }
}
