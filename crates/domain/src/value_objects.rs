use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 任务输入输出文件描述
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileMetadata {
    pub path: String,
    pub size: u64,
    pub checksum: Option<String>,
    #[serde(rename = "type")]
    pub file_type: Option<String>,
}

impl FileMetadata {
    pub fn new(path: impl Into<String>, size: u64) -> Self {
        Self {
            path: path.into(),
            size,
            checksum: None,
            file_type: None,
        }
    }
}

/// 实验对单个Worker的资源需求
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ResourceRequirements {
    pub cpu_cores: u32,
    pub memory_mb: u64,
    pub gpus: u32,
    #[serde(default, with = "duration_nanos::option")]
    pub walltime: Option<Duration>,
    /// 单个任务的预计执行时长
    #[serde(default, with = "duration_nanos::option")]
    pub estimated_task_duration: Option<Duration>,
}

/// 实验的调度约束
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ExperimentConstraints {
    pub max_cost: Option<f64>,
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub preferred_resources: Vec<String>,
    #[serde(default)]
    pub excluded_resources: Vec<String>,
}

impl ExperimentConstraints {
    pub fn is_excluded(&self, resource_id: &str) -> bool {
        self.excluded_resources.iter().any(|id| id == resource_id)
    }

    pub fn is_preferred(&self, resource_id: &str) -> bool {
        self.preferred_resources.iter().any(|id| id == resource_id)
    }
}

/// 时长按有符号64位纳秒序列化
pub mod duration_nanos {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn to_nanos(duration: Duration) -> i64 {
        i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX)
    }

    pub fn from_nanos(nanos: i64) -> Duration {
        Duration::from_nanos(nanos.max(0) as u64)
    }

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(to_nanos(*duration))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        i64::deserialize(deserializer).map(from_nanos)
    }

    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};
        use std::time::Duration;

        pub fn serialize<S: Serializer>(
            duration: &Option<Duration>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match duration {
                Some(d) => serializer.serialize_some(&super::to_nanos(*d)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error> {
            Option::<i64>::deserialize(deserializer).map(|n| n.map(super::from_nanos))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requirements_serialize_durations_as_nanos() {
        let req = ResourceRequirements {
            cpu_cores: 4,
            memory_mb: 8192,
            gpus: 0,
            walltime: Some(Duration::from_secs(2)),
            estimated_task_duration: None,
        };

        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["walltime"], serde_json::json!(2_000_000_000i64));
        assert!(json["estimated_task_duration"].is_null());

        let parsed: ResourceRequirements = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, req);
    }

    #[test]
    fn test_negative_nanos_clamped_to_zero() {
        assert_eq!(duration_nanos::from_nanos(-5), Duration::ZERO);
    }

    #[test]
    fn test_constraint_lookup() {
        let constraints = ExperimentConstraints {
            preferred_resources: vec!["a".into()],
            excluded_resources: vec!["b".into()],
            ..Default::default()
        };
        assert!(constraints.is_preferred("a"));
        assert!(constraints.is_excluded("b"));
        assert!(!constraints.is_excluded("a"));
    }
}
