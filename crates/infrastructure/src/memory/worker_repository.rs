use async_trait::async_trait;
use scheduler_core::SchedulerResult;
use scheduler_domain::entities::Worker;
use scheduler_domain::repositories::WorkerRepository;

use super::arena::Arena;

pub struct InMemoryWorkerRepository {
    arena: Arena<Worker>,
}

impl InMemoryWorkerRepository {
    pub fn new() -> Self {
        Self {
            arena: Arena::new(),
        }
    }
}

impl Default for InMemoryWorkerRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkerRepository for InMemoryWorkerRepository {
    async fn create(&self, worker: &Worker) -> SchedulerResult<Worker> {
        self.arena.insert(worker).await
    }

    async fn get_by_id(&self, id: &str) -> SchedulerResult<Option<Worker>> {
        Ok(self.arena.get(id).await)
    }

    async fn list(&self) -> SchedulerResult<Vec<Worker>> {
        let mut workers = self.arena.snapshot().await;
        workers.sort_by(|a, b| a.registered_at.cmp(&b.registered_at));
        Ok(workers)
    }

    async fn list_by_experiment(&self, experiment_id: &str) -> SchedulerResult<Vec<Worker>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|w| w.experiment_id == experiment_id)
            .collect())
    }

    async fn update(&self, worker: &Worker) -> SchedulerResult<Worker> {
        self.arena.compare_and_swap(worker).await
    }
}
