use async_trait::async_trait;
use scheduler_core::SchedulerResult;
use scheduler_domain::entities::Experiment;
use scheduler_domain::repositories::ExperimentRepository;

use super::arena::Arena;

pub struct InMemoryExperimentRepository {
    arena: Arena<Experiment>,
}

impl InMemoryExperimentRepository {
    pub fn new() -> Self {
        Self {
            arena: Arena::new(),
        }
    }
}

impl Default for InMemoryExperimentRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExperimentRepository for InMemoryExperimentRepository {
    async fn create(&self, experiment: &Experiment) -> SchedulerResult<Experiment> {
        self.arena.insert(experiment).await
    }

    async fn get_by_id(&self, id: &str) -> SchedulerResult<Option<Experiment>> {
        Ok(self.arena.get(id).await)
    }

    async fn update(&self, experiment: &Experiment) -> SchedulerResult<Experiment> {
        self.arena.compare_and_swap(experiment).await
    }
}
