use async_trait::async_trait;
use scheduler_core::SchedulerResult;
use scheduler_domain::entities::WorkerMetrics;
use scheduler_domain::repositories::WorkerMetricsRepository;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

pub struct InMemoryWorkerMetricsRepository {
    metrics: RwLock<HashMap<String, WorkerMetrics>>,
}

impl InMemoryWorkerMetricsRepository {
    pub fn new() -> Self {
        Self {
            metrics: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryWorkerMetricsRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkerMetricsRepository for InMemoryWorkerMetricsRepository {
    async fn get(&self, worker_id: &str) -> SchedulerResult<Option<WorkerMetrics>> {
        Ok(self.metrics.read().await.get(worker_id).cloned())
    }

    async fn record_report(&self, reported: &WorkerMetrics) -> SchedulerResult<()> {
        self.metrics
            .write()
            .await
            .entry(reported.worker_id.clone())
            .or_insert_with(|| WorkerMetrics::new(&reported.worker_id))
            .merge_reported(reported);
        Ok(())
    }

    async fn record_task_outcome(
        &self,
        worker_id: &str,
        succeeded: bool,
        duration: Option<Duration>,
    ) -> SchedulerResult<()> {
        self.metrics
            .write()
            .await
            .entry(worker_id.to_string())
            .or_insert_with(|| WorkerMetrics::new(worker_id))
            .record_outcome(succeeded, duration);
        Ok(())
    }
}
