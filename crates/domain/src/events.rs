//! 状态变更事件
//!
//! 每一次通过状态机校验并持久化的转换都会产生一个事件，交给钩子处理。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entities::{ExperimentStatus, TaskStatus, WorkerStatus};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskStateChange {
    pub task_id: String,
    pub experiment_id: String,
    pub from: TaskStatus,
    pub to: TaskStatus,
    pub timestamp: DateTime<Utc>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerStateChange {
    pub worker_id: String,
    pub experiment_id: String,
    pub from: WorkerStatus,
    pub to: WorkerStatus,
    pub timestamp: DateTime<Utc>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExperimentStateChange {
    pub experiment_id: String,
    pub from: ExperimentStatus,
    pub to: ExperimentStatus,
    pub timestamp: DateTime<Utc>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "entity", rename_all = "snake_case")]
pub enum StateChangeEvent {
    Task(TaskStateChange),
    Worker(WorkerStateChange),
    Experiment(ExperimentStateChange),
}

impl StateChangeEvent {
    pub fn entity(&self) -> &'static str {
        match self {
            StateChangeEvent::Task(_) => "task",
            StateChangeEvent::Worker(_) => "worker",
            StateChangeEvent::Experiment(_) => "experiment",
        }
    }

    pub fn entity_id(&self) -> &str {
        match self {
            StateChangeEvent::Task(e) => &e.task_id,
            StateChangeEvent::Worker(e) => &e.worker_id,
            StateChangeEvent::Experiment(e) => &e.experiment_id,
        }
    }

    /// (from, to) 的字符串形式
    pub fn transition(&self) -> (&'static str, &'static str) {
        match self {
            StateChangeEvent::Task(e) => (e.from.as_str(), e.to.as_str()),
            StateChangeEvent::Worker(e) => (e.from.as_str(), e.to.as_str()),
            StateChangeEvent::Experiment(e) => (e.from.as_str(), e.to.as_str()),
        }
    }
}
