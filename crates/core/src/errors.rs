use thiserror::Error;

/// 错误类别，调用方据此决定是重试、忽略还是上报
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidState,
    Unavailable,
    ConstraintViolation,
    Conflict,
    Internal,
}

/// 调度器错误类型定义
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("任务未找到: {id}")]
    TaskNotFound { id: String },

    #[error("Worker未找到: {id}")]
    WorkerNotFound { id: String },

    #[error("实验未找到: {id}")]
    ExperimentNotFound { id: String },

    #[error("资源未找到: {id}")]
    ResourceNotFound { id: String },

    #[error("无效的{entity}状态转换: {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    #[error("Worker {id} 状态无效: {reason}")]
    InvalidWorkerState { id: String, reason: String },

    #[error("Worker已终止: {id}")]
    WorkerTerminated { id: String },

    #[error("任务 {task_id} 未分配给Worker {worker_id}")]
    TaskNotAssigned { task_id: String, worker_id: String },

    #[error("任务 {id} 已处于最终状态 {status}")]
    TaskAlreadyFinal { id: String, status: String },

    #[error("实验 {id} 当前状态 {status} 不接受该操作")]
    ExperimentNotActive { id: String, status: String },

    #[error("资源 {id} 类型不匹配，期望 {expected}")]
    ResourceTypeMismatch { id: String, expected: String },

    #[error("资源不可用: {id}")]
    ResourceUnavailable { id: String },

    #[error("调度失败: {0}")]
    SchedulingFailed(String),

    #[error("资源约束无法满足: {0}")]
    ResourceConstraintsViolated(String),

    #[error("并发修改冲突: {entity} {id}")]
    ConcurrentModification { entity: &'static str, id: String },

    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("Worker启动失败: {0}")]
    SpawnFailed(String),

    #[error("数据暂存失败: {0}")]
    Staging(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 统一的Result类型
pub type Result<T> = std::result::Result<T, SchedulerError>;

impl SchedulerError {
    pub fn task_not_found(id: impl Into<String>) -> Self {
        Self::TaskNotFound { id: id.into() }
    }

    pub fn worker_not_found(id: impl Into<String>) -> Self {
        Self::WorkerNotFound { id: id.into() }
    }

    pub fn experiment_not_found(id: impl Into<String>) -> Self {
        Self::ExperimentNotFound { id: id.into() }
    }

    pub fn resource_not_found(id: impl Into<String>) -> Self {
        Self::ResourceNotFound { id: id.into() }
    }

    pub fn invalid_transition(
        entity: &'static str,
        from: impl std::fmt::Display,
        to: impl std::fmt::Display,
    ) -> Self {
        Self::InvalidTransition {
            entity,
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    pub fn invalid_worker_state(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidWorkerState {
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub fn concurrent_modification(entity: &'static str, id: impl Into<String>) -> Self {
        Self::ConcurrentModification {
            entity,
            id: id.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TaskNotFound { .. }
            | Self::WorkerNotFound { .. }
            | Self::ExperimentNotFound { .. }
            | Self::ResourceNotFound { .. } => ErrorKind::NotFound,
            Self::InvalidTransition { .. }
            | Self::InvalidWorkerState { .. }
            | Self::WorkerTerminated { .. }
            | Self::TaskNotAssigned { .. }
            | Self::TaskAlreadyFinal { .. }
            | Self::ExperimentNotActive { .. }
            | Self::ResourceTypeMismatch { .. } => ErrorKind::InvalidState,
            Self::ResourceUnavailable { .. } | Self::SchedulingFailed(_) => ErrorKind::Unavailable,
            Self::ResourceConstraintsViolated(_) => ErrorKind::ConstraintViolation,
            Self::ConcurrentModification { .. } => ErrorKind::Conflict,
            Self::Database(_)
            | Self::DatabaseOperation(_)
            | Self::Serialization(_)
            | Self::Configuration(_)
            | Self::SpawnFailed(_)
            | Self::Staging(_)
            | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// 调用方可以原样重试的错误
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConcurrentModification { .. }
                | Self::Database(_)
                | Self::DatabaseOperation(_)
                | Self::SpawnFailed(_)
                | Self::Staging(_)
        )
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for SchedulerError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(format!("{err:#}"))
    }
}
