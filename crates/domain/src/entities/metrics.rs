use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::value_objects::duration_nanos;

/// Worker运行指标，心跳上报与任务结果共同维护
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerMetrics {
    pub worker_id: String,
    pub cpu_usage_percent: f64,
    pub memory_usage_percent: f64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    #[serde(with = "duration_nanos")]
    pub average_task_duration: Duration,
    #[serde(with = "duration_nanos")]
    pub last_task_duration: Duration,
    #[serde(with = "duration_nanos")]
    pub uptime: Duration,
    #[serde(default)]
    pub custom_metrics: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

impl WorkerMetrics {
    pub fn new(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            cpu_usage_percent: 0.0,
            memory_usage_percent: 0.0,
            tasks_completed: 0,
            tasks_failed: 0,
            average_task_duration: Duration::ZERO,
            last_task_duration: Duration::ZERO,
            uptime: Duration::ZERO,
            custom_metrics: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    /// 记录一次任务结果并更新滑动平均
    pub fn record_outcome(&mut self, succeeded: bool, duration: Option<Duration>) {
        if succeeded {
            self.tasks_completed += 1;
            if let Some(duration) = duration {
                let n = self.tasks_completed as u32;
                let total = self.average_task_duration * (n - 1) + duration;
                self.average_task_duration = total / n;
                self.last_task_duration = duration;
            }
        } else {
            self.tasks_failed += 1;
        }
        self.timestamp = Utc::now();
    }

    /// 合并心跳上报的资源占用，任务计数以服务端为准
    pub fn merge_reported(&mut self, reported: &WorkerMetrics) {
        self.cpu_usage_percent = reported.cpu_usage_percent;
        self.memory_usage_percent = reported.memory_usage_percent;
        self.uptime = reported.uptime;
        self.custom_metrics = reported.custom_metrics.clone();
        self.timestamp = reported.timestamp;
    }
}
