//! 多资源Worker分布优化
//!
//! 对每个候选计算资源估算时长、成本和可靠性并按权重打分，再按排名贪心分配Worker。
//! 结果只作为建议，资源上的Worker计数允许略微过期。

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use scheduler_core::{config::OptimizerConfig, SchedulerError, SchedulerResult};
use scheduler_domain::entities::{ComputeResource, CostWeights, WorkerDistribution};
use scheduler_domain::value_objects::ExperimentConstraints;
use tracing::debug;

/// 一次分布计算的输入
#[derive(Debug, Clone)]
pub struct DistributionRequest<'a> {
    pub task_count: usize,
    pub avg_task_duration: Duration,
    pub constraints: &'a ExperimentConstraints,
    pub resources: &'a [ComputeResource],
    pub now: DateTime<Utc>,
}

#[derive(Debug)]
struct Candidate<'a> {
    resource: &'a ComputeResource,
    workers: u32,
    cost: f64,
    score: f64,
    preferred: bool,
}

#[derive(Debug, Clone)]
pub struct DistributionOptimizer {
    weights: CostWeights,
}

impl DistributionOptimizer {
    pub fn new(weights: CostWeights) -> Self {
        Self {
            weights: weights.normalized(),
        }
    }

    pub fn from_config(config: &OptimizerConfig) -> Self {
        Self::new(CostWeights::new(
            config.time_weight,
            config.cost_weight,
            config.reliability_weight,
        ))
    }

    pub fn weights(&self) -> CostWeights {
        self.weights
    }

    pub fn optimize(&self, request: &DistributionRequest<'_>) -> SchedulerResult<WorkerDistribution> {
        if request.task_count == 0 {
            return Ok(WorkerDistribution::empty(self.weights));
        }

        let task_count = u32::try_from(request.task_count).unwrap_or(u32::MAX);
        let hours = request.avg_task_duration.as_secs_f64() / 3600.0;
        let candidates = self.rank_candidates(request, task_count, hours)?;

        let mut allocations: BTreeMap<String, u32> = BTreeMap::new();
        let mut accepted: Vec<(f64, u32)> = Vec::new();
        let mut remaining = task_count;

        for candidate in &candidates {
            if remaining == 0 {
                break;
            }
            let take = candidate.workers.min(remaining);
            let mut tentative = accepted.clone();
            tentative.push((candidate.resource.cost_per_hour, take));
            let cost = total_cost(&tentative, task_count, hours);

            if let Some(max_cost) = request.constraints.max_cost {
                if cost > max_cost {
                    debug!(
                        "资源 {} 加入后预计成本 {:.2} 超过上限 {:.2}，跳过",
                        candidate.resource.id, cost, max_cost
                    );
                    continue;
                }
            }

            accepted = tentative;
            allocations.insert(candidate.resource.id.clone(), take);
            remaining -= take;
        }

        if allocations.is_empty() {
            return Err(SchedulerError::ResourceConstraintsViolated(format!(
                "所有候选资源的预计成本都超过上限 {:.2}",
                request.constraints.max_cost.unwrap_or_default()
            )));
        }

        let total_workers: u32 = allocations.values().sum();
        let estimated_duration = request.avg_task_duration * waves(task_count, total_workers);
        let estimated_cost = total_cost(&accepted, task_count, hours);

        if let Some(deadline) = request.constraints.deadline {
            let finish = chrono::Duration::from_std(estimated_duration)
                .ok()
                .and_then(|d| request.now.checked_add_signed(d));
            match finish {
                Some(finish) if finish <= deadline => {}
                _ => {
                    return Err(SchedulerError::ResourceConstraintsViolated(format!(
                        "预计时长 {estimated_duration:?} 无法在截止时间 {deadline} 前完成"
                    )));
                }
            }
        }

        debug!(
            "分布计算完成: {} 个Worker，{} 个资源，预计成本 {:.2}，预计时长 {:?}",
            total_workers,
            allocations.len(),
            estimated_cost,
            estimated_duration
        );

        Ok(WorkerDistribution {
            allocations,
            total_workers,
            estimated_cost,
            estimated_duration,
            weights: self.weights,
        })
    }

    fn rank_candidates<'a>(
        &self,
        request: &DistributionRequest<'a>,
        task_count: u32,
        hours: f64,
    ) -> SchedulerResult<Vec<Candidate<'a>>> {
        let mut candidates: Vec<(Candidate<'a>, f64)> = request
            .resources
            .iter()
            .filter(|r| {
                r.is_active()
                    && r.available_capacity() > 0
                    && !request.constraints.is_excluded(&r.id)
            })
            .map(|resource| {
                let workers = resource.available_capacity().min(task_count);
                let w = waves(task_count, workers);
                let duration = f64::from(w) * hours;
                let cost = resource.cost_per_hour * f64::from(workers) * f64::from(w) * hours;
                let candidate = Candidate {
                    resource,
                    workers,
                    cost,
                    score: 0.0,
                    preferred: request.constraints.is_preferred(&resource.id),
                };
                (candidate, duration)
            })
            .collect();

        if candidates.is_empty() {
            return Err(SchedulerError::SchedulingFailed(
                "排除约束后没有可用的计算资源".to_string(),
            ));
        }

        let max_duration = candidates.iter().map(|(_, d)| *d).fold(0.0, f64::max);
        let max_cost = candidates.iter().map(|(c, _)| c.cost).fold(0.0, f64::max);
        for (candidate, duration) in &mut candidates {
            let reliability = candidate.resource.reliability.clamp(0.0, 1.0);
            candidate.score = self.weights.time * ratio(*duration, max_duration)
                + self.weights.cost * ratio(candidate.cost, max_cost)
                + self.weights.reliability * (1.0 - reliability);
        }

        let mut ranked: Vec<Candidate<'a>> = candidates.into_iter().map(|(c, _)| c).collect();
        ranked.sort_by(|a, b| {
            b.preferred
                .cmp(&a.preferred)
                .then_with(|| a.score.total_cmp(&b.score))
                .then_with(|| a.cost.partial_cmp(&b.cost).unwrap_or(Ordering::Equal))
                .then_with(|| a.resource.id.cmp(&b.resource.id))
        });
        Ok(ranked)
    }
}

impl Default for DistributionOptimizer {
    fn default() -> Self {
        Self::new(CostWeights::default())
    }
}

fn waves(task_count: u32, workers: u32) -> u32 {
    if workers == 0 {
        return 0;
    }
    task_count.div_ceil(workers)
}

fn ratio(value: f64, max: f64) -> f64 {
    if max > 0.0 {
        value / max
    } else {
        0.0
    }
}

/// 全部已接受资源一起运行时的总成本
fn total_cost(accepted: &[(f64, u32)], task_count: u32, hours: f64) -> f64 {
    let total_workers: u32 = accepted.iter().map(|(_, w)| *w).sum();
    let w = f64::from(waves(task_count, total_workers));
    accepted
        .iter()
        .map(|(rate, workers)| rate * f64::from(*workers) * w * hours)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use scheduler_testing_utils::ComputeResourceBuilder;

    const HOUR: Duration = Duration::from_secs(3600);

    fn request<'a>(
        task_count: usize,
        constraints: &'a ExperimentConstraints,
        resources: &'a [ComputeResource],
    ) -> DistributionRequest<'a> {
        DistributionRequest {
            task_count,
            avg_task_duration: HOUR,
            constraints,
            resources,
            now: Utc::now(),
        }
    }

    fn cost_only() -> DistributionOptimizer {
        DistributionOptimizer::new(CostWeights::new(0.0, 1.0, 0.0))
    }

    #[test]
    fn test_zero_tasks_gives_empty_distribution() {
        let constraints = ExperimentConstraints::default();
        let resources = vec![ComputeResourceBuilder::new("a").build()];
        let plan = DistributionOptimizer::default()
            .optimize(&request(0, &constraints, &resources))
            .unwrap();
        assert!(plan.is_empty());
        assert!(plan.allocations.is_empty());
    }

    #[test]
    fn test_no_eligible_resource_fails() {
        let constraints = ExperimentConstraints {
            excluded_resources: vec!["a".to_string()],
            ..Default::default()
        };
        let resources = vec![
            ComputeResourceBuilder::new("a").build(),
            ComputeResourceBuilder::new("b").inactive().build(),
            ComputeResourceBuilder::new("c")
                .with_max_workers(2)
                .with_current_workers(2)
                .build(),
        ];
        let err = DistributionOptimizer::default()
            .optimize(&request(5, &constraints, &resources))
            .unwrap_err();
        assert!(matches!(err, SchedulerError::SchedulingFailed(_)));
    }

    #[test]
    fn test_cheapest_resource_ranked_first() {
        let constraints = ExperimentConstraints::default();
        let resources = vec![
            ComputeResourceBuilder::new("expensive").with_cost(5.0).with_max_workers(4).build(),
            ComputeResourceBuilder::new("cheap").with_cost(1.0).with_max_workers(4).build(),
        ];
        let plan = cost_only().optimize(&request(4, &constraints, &resources)).unwrap();
        assert_eq!(plan.allocations.get("cheap"), Some(&4));
        assert!(!plan.allocations.contains_key("expensive"));
        assert_eq!(plan.total_workers, 4);
        assert_eq!(plan.estimated_duration, HOUR);
        assert!((plan.estimated_cost - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_preferred_resource_wins_over_score() {
        let constraints = ExperimentConstraints {
            preferred_resources: vec!["expensive".to_string()],
            ..Default::default()
        };
        let resources = vec![
            ComputeResourceBuilder::new("expensive").with_cost(5.0).with_max_workers(4).build(),
            ComputeResourceBuilder::new("cheap").with_cost(1.0).with_max_workers(4).build(),
        ];
        let plan = cost_only().optimize(&request(4, &constraints, &resources)).unwrap();
        assert_eq!(plan.allocations.get("expensive"), Some(&4));
    }

    #[test]
    fn test_spills_over_to_next_resource() {
        let constraints = ExperimentConstraints::default();
        let resources = vec![
            ComputeResourceBuilder::new("a").with_cost(1.0).with_max_workers(3).build(),
            ComputeResourceBuilder::new("b").with_cost(2.0).with_max_workers(10).build(),
        ];
        let plan = cost_only().optimize(&request(8, &constraints, &resources)).unwrap();
        assert_eq!(plan.allocations.get("a"), Some(&3));
        assert_eq!(plan.allocations.get("b"), Some(&5));
        assert_eq!(plan.total_workers, 8);
    }

    #[test]
    fn test_max_cost_skips_resource() {
        let constraints = ExperimentConstraints {
            max_cost: Some(20.0),
            ..Default::default()
        };
        let resources = vec![
            ComputeResourceBuilder::new("a").with_cost(1.0).with_max_workers(2).build(),
            ComputeResourceBuilder::new("b").with_cost(5.0).with_max_workers(10).build(),
        ];
        let plan = cost_only().optimize(&request(10, &constraints, &resources)).unwrap();
        assert_eq!(plan.allocations.len(), 1);
        assert_eq!(plan.allocations.get("a"), Some(&2));
        assert!((plan.estimated_cost - 10.0).abs() < 1e-9);
        assert_eq!(plan.estimated_duration, HOUR * 5);
    }

    #[test]
    fn test_every_allocation_over_budget() {
        let constraints = ExperimentConstraints {
            max_cost: Some(1.0),
            ..Default::default()
        };
        let resources = vec![ComputeResourceBuilder::new("a").with_cost(3.0).build()];
        let err = DistributionOptimizer::default()
            .optimize(&request(4, &constraints, &resources))
            .unwrap_err();
        assert!(matches!(err, SchedulerError::ResourceConstraintsViolated(_)));
    }

    #[test]
    fn test_deadline_violation() {
        let now = Utc::now();
        let constraints = ExperimentConstraints {
            deadline: Some(now + chrono::Duration::hours(1)),
            ..Default::default()
        };
        let resources = vec![ComputeResourceBuilder::new("a").with_max_workers(1).build()];
        let mut req = request(3, &constraints, &resources);
        req.now = now;
        let err = DistributionOptimizer::default().optimize(&req).unwrap_err();
        assert!(matches!(err, SchedulerError::ResourceConstraintsViolated(_)));
    }

    #[test]
    fn test_ties_broken_by_resource_id() {
        let constraints = ExperimentConstraints::default();
        let resources = vec![
            ComputeResourceBuilder::new("b").build(),
            ComputeResourceBuilder::new("a").build(),
        ];
        let plan = DistributionOptimizer::default()
            .optimize(&request(1, &constraints, &resources))
            .unwrap();
        assert_eq!(plan.allocations.keys().collect::<Vec<_>>(), vec!["a"]);
    }
}
