use scheduler_core::{SchedulerError, SchedulerResult};
use scheduler_domain::entities::{Experiment, Task, Worker};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// 带乐观锁版本号的实体
pub(crate) trait Versioned: Clone + Send + Sync + 'static {
    const ENTITY: &'static str;

    fn key(&self) -> &str;
    fn version(&self) -> i64;
    fn set_version(&mut self, version: i64);
    fn not_found(id: &str) -> SchedulerError;
}

impl Versioned for Task {
    const ENTITY: &'static str = "任务";

    fn key(&self) -> &str {
        &self.id
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn set_version(&mut self, version: i64) {
        self.version = version;
    }

    fn not_found(id: &str) -> SchedulerError {
        SchedulerError::task_not_found(id)
    }
}

impl Versioned for Worker {
    const ENTITY: &'static str = "Worker";

    fn key(&self) -> &str {
        &self.id
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn set_version(&mut self, version: i64) {
        self.version = version;
    }

    fn not_found(id: &str) -> SchedulerError {
        SchedulerError::worker_not_found(id)
    }
}

impl Versioned for Experiment {
    const ENTITY: &'static str = "实验";

    fn key(&self) -> &str {
        &self.id
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn set_version(&mut self, version: i64) {
        self.version = version;
    }

    fn not_found(id: &str) -> SchedulerError {
        SchedulerError::experiment_not_found(id)
    }
}

/// 记录表：ID 索引 + 每条记录一把锁
pub(crate) struct Arena<T> {
    records: RwLock<HashMap<String, Arc<Mutex<T>>>>,
}

impl<T: Versioned> Arena<T> {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    pub async fn insert(&self, value: &T) -> SchedulerResult<T> {
        let mut records = self.records.write().await;
        if records.contains_key(value.key()) {
            return Err(SchedulerError::DatabaseOperation(format!(
                "{} {} 已存在",
                T::ENTITY,
                value.key()
            )));
        }
        records.insert(value.key().to_string(), Arc::new(Mutex::new(value.clone())));
        Ok(value.clone())
    }

    async fn slot(&self, id: &str) -> Option<Arc<Mutex<T>>> {
        self.records.read().await.get(id).cloned()
    }

    pub async fn get(&self, id: &str) -> Option<T> {
        let slot = self.slot(id).await?;
        let value = slot.lock().await.clone();
        Some(value)
    }

    pub async fn get_many(&self, ids: &[String]) -> Vec<T> {
        let slots: Vec<_> = {
            let records = self.records.read().await;
            ids.iter().filter_map(|id| records.get(id).cloned()).collect()
        };

        let mut values = Vec::with_capacity(slots.len());
        for slot in slots {
            values.push(slot.lock().await.clone());
        }
        values
    }

    pub async fn snapshot(&self) -> Vec<T> {
        let slots: Vec<_> = self.records.read().await.values().cloned().collect();

        let mut values = Vec::with_capacity(slots.len());
        for slot in slots {
            values.push(slot.lock().await.clone());
        }
        values
    }

    /// 版本一致时写入并递增版本
    pub async fn compare_and_swap(&self, value: &T) -> SchedulerResult<T> {
        let slot = self
            .slot(value.key())
            .await
            .ok_or_else(|| T::not_found(value.key()))?;

        let mut current = slot.lock().await;
        if current.version() != value.version() {
            return Err(SchedulerError::concurrent_modification(
                T::ENTITY,
                value.key(),
            ));
        }

        let mut next = value.clone();
        next.set_version(value.version() + 1);
        *current = next.clone();
        Ok(next)
    }
}
