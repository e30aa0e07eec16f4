use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::ParseStatusError;
use crate::value_objects::{ExperimentConstraints, ResourceRequirements};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExperimentStatus {
    Created,
    Executing,
    Completed,
    Canceled,
}

impl ExperimentStatus {
    pub const ALL: [ExperimentStatus; 4] = [
        ExperimentStatus::Created,
        ExperimentStatus::Executing,
        ExperimentStatus::Completed,
        ExperimentStatus::Canceled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExperimentStatus::Created => "CREATED",
            ExperimentStatus::Executing => "EXECUTING",
            ExperimentStatus::Completed => "COMPLETED",
            ExperimentStatus::Canceled => "CANCELED",
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, ExperimentStatus::Completed | ExperimentStatus::Canceled)
    }
}

impl fmt::Display for ExperimentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExperimentStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ExperimentStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ParseStatusError {
                kind: "实验状态",
                value: s.to_string(),
            })
    }
}

/// 参数化实验
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Experiment {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub project_id: String,
    pub owner_id: String,
    pub status: ExperimentStatus,
    pub command_template: String,
    #[serde(default)]
    pub requirements: ResourceRequirements,
    #[serde(default)]
    pub constraints: ExperimentConstraints,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub version: i64,
}

impl Experiment {
    pub fn new(
        name: impl Into<String>,
        owner_id: impl Into<String>,
        command_template: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            description: None,
            project_id: String::new(),
            owner_id: owner_id.into(),
            status: ExperimentStatus::Created,
            command_template: command_template.into(),
            requirements: ResourceRequirements::default(),
            constraints: ExperimentConstraints::default(),
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            metadata: serde_json::Value::Object(Default::default()),
            version: 0,
        }
    }

    /// 只有执行中的实验会向Worker派发任务
    pub fn accepts_work(&self) -> bool {
        self.status == ExperimentStatus::Executing
    }
}
