use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use super::ParseStatusError;
use crate::value_objects::duration_nanos;

/// Worker调度状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerStatus {
    Idle,
    Busy,
}

impl WorkerStatus {
    pub const ALL: [WorkerStatus; 2] = [WorkerStatus::Idle, WorkerStatus::Busy];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Idle => "IDLE",
            WorkerStatus::Busy => "BUSY",
        }
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkerStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IDLE" => Ok(WorkerStatus::Idle),
            "BUSY" => Ok(WorkerStatus::Busy),
            _ => Err(ParseStatusError {
                kind: "Worker状态",
                value: s.to_string(),
            }),
        }
    }
}

/// Worker连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    /// 已提交启动，尚未注册
    Pending,
    Connected,
    Disconnected,
    Terminated,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Pending => "PENDING",
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::Disconnected => "DISCONNECTED",
            ConnectionState::Terminated => "TERMINATED",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionState {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(ConnectionState::Pending),
            "CONNECTED" => Ok(ConnectionState::Connected),
            "DISCONNECTED" => Ok(ConnectionState::Disconnected),
            "TERMINATED" => Ok(ConnectionState::Terminated),
            _ => Err(ParseStatusError {
                kind: "连接状态",
                value: s.to_string(),
            }),
        }
    }
}

/// 计算资源上的一个Worker进程
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Worker {
    pub id: String,
    pub compute_resource_id: String,
    pub experiment_id: String,
    pub user_id: String,
    pub status: WorkerStatus,
    /// 仅在 BUSY 时非空
    pub current_task_id: Option<String>,
    pub connection_state: ConnectionState,
    #[serde(with = "duration_nanos")]
    pub walltime: Duration,
    #[serde(with = "duration_nanos")]
    pub walltime_remaining: Duration,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub registered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub terminated_at: Option<DateTime<Utc>>,
    /// 资源适配器返回的作业标识
    pub spawn_job_id: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub version: i64,
}

impl Worker {
    pub fn new(
        id: impl Into<String>,
        experiment_id: impl Into<String>,
        compute_resource_id: impl Into<String>,
        user_id: impl Into<String>,
        walltime: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            compute_resource_id: compute_resource_id.into(),
            experiment_id: experiment_id.into(),
            user_id: user_id.into(),
            status: WorkerStatus::Idle,
            current_task_id: None,
            connection_state: ConnectionState::Pending,
            walltime,
            walltime_remaining: walltime,
            last_heartbeat: None,
            registered_at: now,
            updated_at: now,
            terminated_at: None,
            spawn_job_id: None,
            metadata: serde_json::Value::Object(Default::default()),
            version: 0,
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.connection_state == ConnectionState::Terminated || self.terminated_at.is_some()
    }

    /// walltime 从注册时刻开始计算
    pub fn walltime_remaining_at(&self, now: DateTime<Utc>) -> Duration {
        if self.is_terminated() {
            return Duration::ZERO;
        }
        let elapsed = (now - self.registered_at).to_std().unwrap_or_default();
        self.walltime.saturating_sub(elapsed)
    }

    /// 剩余walltime能否容纳预计时长，同时返回剩余时长
    pub fn walltime_fits(&self, estimated: Duration, now: DateTime<Utc>) -> (bool, Duration) {
        let remaining = self.walltime_remaining_at(now);
        (!self.is_terminated() && remaining >= estimated, remaining)
    }

    /// 最近一次存活信号，未发送过心跳时以注册时间为准
    pub fn last_seen(&self) -> DateTime<Utc> {
        self.last_heartbeat.unwrap_or(self.registered_at)
    }

    pub fn is_heartbeat_expired(&self, now: DateTime<Utc>, timeout: chrono::Duration) -> bool {
        !self.is_terminated() && now - self.last_seen() > timeout
    }
}
