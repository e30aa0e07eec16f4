use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::ParseStatusError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComputeResourceType {
    Slurm,
    Kubernetes,
    BareMetal,
}

impl ComputeResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComputeResourceType::Slurm => "SLURM",
            ComputeResourceType::Kubernetes => "KUBERNETES",
            ComputeResourceType::BareMetal => "BARE_METAL",
        }
    }
}

impl fmt::Display for ComputeResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComputeResourceType {
    type Err = ParseStatusError;

    /// 同时接受大写常量名和配置文件里的小写写法
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SLURM" => Ok(ComputeResourceType::Slurm),
            "KUBERNETES" => Ok(ComputeResourceType::Kubernetes),
            "BARE_METAL" => Ok(ComputeResourceType::BareMetal),
            _ => Err(ParseStatusError {
                kind: "计算资源类型",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StorageResourceType {
    S3,
    Sftp,
    Nfs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceStatus {
    Active,
    Inactive,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComputeResource {
    pub id: String,
    pub name: String,
    pub resource_type: ComputeResourceType,
    pub endpoint: String,
    pub owner_id: String,
    pub status: ResourceStatus,
    pub cost_per_hour: f64,
    pub max_workers: u32,
    pub current_workers: u32,
    /// 历史可靠性评分，取值0到1
    pub reliability: f64,
    #[serde(default)]
    pub capabilities: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ComputeResource {
    pub fn new(
        id: impl Into<String>,
        resource_type: ComputeResourceType,
        cost_per_hour: f64,
        max_workers: u32,
    ) -> Self {
        let id = id.into();
        let now = Utc::now();
        Self {
            name: id.clone(),
            id,
            resource_type,
            endpoint: String::new(),
            owner_id: String::new(),
            status: ResourceStatus::Active,
            cost_per_hour,
            max_workers,
            current_workers: 0,
            reliability: 1.0,
            capabilities: serde_json::Value::Object(Default::default()),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn available_capacity(&self) -> u32 {
        self.max_workers.saturating_sub(self.current_workers)
    }

    pub fn is_active(&self) -> bool {
        self.status == ResourceStatus::Active
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageResource {
    pub id: String,
    pub name: String,
    pub resource_type: StorageResourceType,
    pub endpoint: String,
    pub owner_id: String,
    pub status: ResourceStatus,
    pub total_capacity_bytes: Option<u64>,
    pub used_capacity_bytes: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 注册表中的资源，按种类区分
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Resource {
    Compute(ComputeResource),
    Storage(StorageResource),
}

impl Resource {
    pub fn id(&self) -> &str {
        match self {
            Resource::Compute(r) => &r.id,
            Resource::Storage(r) => &r.id,
        }
    }

    pub fn as_compute(&self) -> Option<&ComputeResource> {
        match self {
            Resource::Compute(r) => Some(r),
            Resource::Storage(_) => None,
        }
    }

    pub fn into_compute(self) -> Option<ComputeResource> {
        match self {
            Resource::Compute(r) => Some(r),
            Resource::Storage(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_type_parse_accepts_config_spelling() {
        assert_eq!(
            "bare_metal".parse::<ComputeResourceType>().unwrap(),
            ComputeResourceType::BareMetal
        );
        assert_eq!(
            "SLURM".parse::<ComputeResourceType>().unwrap(),
            ComputeResourceType::Slurm
        );
        assert!("mainframe".parse::<ComputeResourceType>().is_err());
    }

    #[test]
    fn test_resource_variants() {
        let mut compute = ComputeResource::new("r-1", ComputeResourceType::Slurm, 1.5, 10);
        compute.current_workers = 12;
        assert_eq!(compute.available_capacity(), 0);

        let resource = Resource::Compute(compute);
        assert_eq!(resource.id(), "r-1");
        assert!(resource.as_compute().is_some());

        let json = serde_json::to_value(&resource).unwrap();
        assert_eq!(json["kind"], "compute");
    }
}
