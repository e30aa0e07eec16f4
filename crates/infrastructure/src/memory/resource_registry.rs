use async_trait::async_trait;
use chrono::Utc;
use scheduler_core::{config::ComputeResourceSeed, SchedulerError, SchedulerResult};
use scheduler_domain::entities::{ComputeResource, ComputeResourceType, Resource};
use scheduler_domain::ports::ResourceRegistry;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::info;

/// 内存资源注册表
pub struct InMemoryResourceRegistry {
    resources: RwLock<HashMap<String, Resource>>,
}

impl InMemoryResourceRegistry {
    pub fn new() -> Self {
        Self {
            resources: RwLock::new(HashMap::new()),
        }
    }

    /// 从配置中的资源定义构建
    pub async fn from_seeds(seeds: &[ComputeResourceSeed]) -> SchedulerResult<Self> {
        let registry = Self::new();
        for seed in seeds {
            let resource_type: ComputeResourceType = seed
                .resource_type
                .parse()
                .map_err(|e| SchedulerError::Configuration(format!("{e}")))?;

            let mut resource =
                ComputeResource::new(&seed.id, resource_type, seed.cost_per_hour, seed.max_workers);
            resource.name = seed.name.clone();
            resource.endpoint = seed.endpoint.clone();
            resource.owner_id = seed.owner_id.clone();
            resource.reliability = seed.reliability;

            registry.register(Resource::Compute(resource)).await;
        }
        info!("资源注册表已加载 {} 个计算资源", seeds.len());
        Ok(registry)
    }

    pub async fn register(&self, resource: Resource) {
        self.resources
            .write()
            .await
            .insert(resource.id().to_string(), resource);
    }
}

impl Default for InMemoryResourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceRegistry for InMemoryResourceRegistry {
    async fn get_resource(&self, id: &str) -> SchedulerResult<Option<Resource>> {
        Ok(self.resources.read().await.get(id).cloned())
    }

    async fn list_compute_resources(&self) -> SchedulerResult<Vec<ComputeResource>> {
        let mut resources: Vec<ComputeResource> = self
            .resources
            .read()
            .await
            .values()
            .filter_map(|r| r.as_compute().cloned())
            .collect();
        resources.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(resources)
    }

    async fn adjust_worker_count(&self, resource_id: &str, delta: i32) -> SchedulerResult<()> {
        let mut resources = self.resources.write().await;
        match resources.get_mut(resource_id) {
            Some(Resource::Compute(resource)) => {
                resource.current_workers = resource.current_workers.saturating_add_signed(delta);
                resource.updated_at = Utc::now();
                Ok(())
            }
            Some(Resource::Storage(_)) => Err(SchedulerError::ResourceTypeMismatch {
                id: resource_id.to_string(),
                expected: "计算资源".to_string(),
            }),
            None => Err(SchedulerError::resource_not_found(resource_id)),
        }
    }
}
