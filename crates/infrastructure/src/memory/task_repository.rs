use async_trait::async_trait;
use scheduler_core::SchedulerResult;
use scheduler_domain::entities::{Task, TaskStatus};
use scheduler_domain::repositories::TaskRepository;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

use super::arena::Arena;

pub struct InMemoryTaskRepository {
    arena: Arena<Task>,
    /// 实验ID -> 任务ID，按插入顺序
    by_experiment: RwLock<HashMap<String, Vec<String>>>,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self {
            arena: Arena::new(),
            by_experiment: RwLock::new(HashMap::new()),
        }
    }

    async fn experiment_task_ids(&self, experiment_id: &str) -> Vec<String> {
        self.by_experiment
            .read()
            .await
            .get(experiment_id)
            .cloned()
            .unwrap_or_default()
    }
}

impl Default for InMemoryTaskRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn create(&self, task: &Task) -> SchedulerResult<Task> {
        let created = self.arena.insert(task).await?;
        self.by_experiment
            .write()
            .await
            .entry(created.experiment_id.clone())
            .or_default()
            .push(created.id.clone());
        debug!("创建任务: {} (实验 {})", created.id, created.experiment_id);
        Ok(created)
    }

    async fn get_by_id(&self, id: &str) -> SchedulerResult<Option<Task>> {
        Ok(self.arena.get(id).await)
    }

    async fn list_by_experiment(&self, experiment_id: &str) -> SchedulerResult<Vec<Task>> {
        let ids = self.experiment_task_ids(experiment_id).await;
        Ok(self.arena.get_many(&ids).await)
    }

    async fn find_queued(&self, experiment_id: &str) -> SchedulerResult<Vec<Task>> {
        let ids = self.experiment_task_ids(experiment_id).await;
        let mut queued: Vec<Task> = self
            .arena
            .get_many(&ids)
            .await
            .into_iter()
            .filter(|t| t.status == TaskStatus::Queued)
            .collect();
        queued.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(queued)
    }

    async fn list_active_by_worker(&self, worker_id: &str) -> SchedulerResult<Vec<Task>> {
        Ok(self
            .arena
            .snapshot()
            .await
            .into_iter()
            .filter(|t| t.status.is_active() && t.is_assigned_to(worker_id))
            .collect())
    }

    async fn update(&self, task: &Task) -> SchedulerResult<Task> {
        self.arena.compare_and_swap(task).await
    }
}
