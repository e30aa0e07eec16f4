use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use super::ParseStatusError;
use crate::value_objects::{duration_nanos, FileMetadata};

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Created,
    Queued,
    DataStaging,
    EnvSetup,
    Running,
    OutputStaging,
    Completed,
    Failed,
    Canceled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 9] = [
        TaskStatus::Created,
        TaskStatus::Queued,
        TaskStatus::DataStaging,
        TaskStatus::EnvSetup,
        TaskStatus::Running,
        TaskStatus::OutputStaging,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Canceled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Created => "CREATED",
            TaskStatus::Queued => "QUEUED",
            TaskStatus::DataStaging => "DATA_STAGING",
            TaskStatus::EnvSetup => "ENV_SETUP",
            TaskStatus::Running => "RUNNING",
            TaskStatus::OutputStaging => "OUTPUT_STAGING",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Canceled => "CANCELED",
        }
    }

    /// 已绑定Worker、正在处理中的状态
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            TaskStatus::DataStaging
                | TaskStatus::EnvSetup
                | TaskStatus::Running
                | TaskStatus::OutputStaging
        )
    }

    /// 不再接受完成或失败信号的状态
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Canceled
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ParseStatusError {
                kind: "任务状态",
                value: s.to_string(),
            })
    }
}

/// 实验中的单个任务
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: String,
    pub experiment_id: String,
    pub status: TaskStatus,
    pub command: String,
    pub execution_script: Option<String>,
    #[serde(default)]
    pub input_files: Vec<FileMetadata>,
    #[serde(default)]
    pub output_files: Vec<FileMetadata>,
    /// 必须先完成的任务
    #[serde(default)]
    pub dependencies: Vec<String>,
    pub worker_id: Option<String>,
    pub compute_resource_id: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub staging_started_at: Option<DateTime<Utc>>,
    pub staging_completed_at: Option<DateTime<Utc>>,
    #[serde(default, with = "duration_nanos::option")]
    pub duration: Option<Duration>,
    pub error: Option<String>,
    pub result: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// 乐观锁版本号
    pub version: i64,
}

impl Task {
    pub fn new(experiment_id: impl Into<String>, command: impl Into<String>, max_retries: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            experiment_id: experiment_id.into(),
            status: TaskStatus::Created,
            command: command.into(),
            execution_script: None,
            input_files: Vec::new(),
            output_files: Vec::new(),
            dependencies: Vec::new(),
            worker_id: None,
            compute_resource_id: None,
            retry_count: 0,
            max_retries,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            staging_started_at: None,
            staging_completed_at: None,
            duration: None,
            error: None,
            result: None,
            metadata: serde_json::Value::Object(Default::default()),
            version: 0,
        }
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    pub fn is_assigned_to(&self, worker_id: &str) -> bool {
        self.worker_id.as_deref() == Some(worker_id)
    }

    /// 任务回到队列时清除分配信息
    pub fn clear_assignment(&mut self) {
        self.worker_id = None;
        self.compute_resource_id = None;
        self.started_at = None;
        self.staging_started_at = None;
        self.staging_completed_at = None;
        self.completed_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_string_roundtrip() {
        for status in TaskStatus::ALL {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
        assert!("PENDING".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_status_serde_uses_wire_names() {
        let json = serde_json::to_string(&TaskStatus::DataStaging).unwrap();
        assert_eq!(json, "\"DATA_STAGING\"");
    }

    #[test]
    fn test_clear_assignment() {
        let mut task = Task::new("exp-1", "echo 1", 3);
        task.worker_id = Some("w-1".into());
        task.compute_resource_id = Some("r-1".into());
        task.started_at = Some(Utc::now());

        task.clear_assignment();

        assert!(task.worker_id.is_none());
        assert!(task.compute_resource_id.is_none());
        assert!(task.started_at.is_none());
        assert!(!task.is_assigned_to("w-1"));
    }

    #[test]
    fn test_can_retry() {
        let mut task = Task::new("exp-1", "echo 1", 1);
        assert!(task.can_retry());
        task.retry_count = 1;
        assert!(!task.can_retry());
        assert!(!Task::new("exp-1", "echo 1", 0).can_retry());
    }
}
