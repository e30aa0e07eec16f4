//! 各类计算资源的Worker启动适配器

mod bare_metal;
mod kubernetes;
mod slurm;

pub use bare_metal::BareMetalSpawner;
pub use kubernetes::KubernetesSpawner;
pub use slurm::SlurmSpawner;

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use scheduler_core::{SchedulerError, SchedulerResult};
use scheduler_domain::entities::{ComputeResource, ComputeResourceType};
use scheduler_domain::ports::{SpawnContext, WorkerSpawner};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// 资源类型到启动适配器的映射
#[derive(Clone, Default)]
pub struct SpawnerRegistry {
    spawners: HashMap<ComputeResourceType, Arc<dyn WorkerSpawner>>,
}

impl SpawnerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// SLURM、Kubernetes、裸机三种默认适配器
    pub fn with_defaults() -> Self {
        Self::new()
            .with_spawner(Arc::new(SlurmSpawner::default()))
            .with_spawner(Arc::new(KubernetesSpawner::default()))
            .with_spawner(Arc::new(BareMetalSpawner::default()))
    }

    /// 同类型的适配器会被替换
    pub fn register(&mut self, spawner: Arc<dyn WorkerSpawner>) {
        debug!("注册Worker启动适配器: {}", spawner.resource_type());
        self.spawners.insert(spawner.resource_type(), spawner);
    }

    pub fn with_spawner(mut self, spawner: Arc<dyn WorkerSpawner>) -> Self {
        self.register(spawner);
        self
    }

    pub fn get(&self, resource_type: ComputeResourceType) -> SchedulerResult<Arc<dyn WorkerSpawner>> {
        self.spawners.get(&resource_type).cloned().ok_or_else(|| {
            SchedulerError::Configuration(format!("没有 {resource_type} 类型资源的Worker启动适配器"))
        })
    }

    pub fn len(&self) -> usize {
        self.spawners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spawners.is_empty()
    }
}

/// 格式化为 `HH:MM:SS`，小时数不设上限
pub(crate) fn format_walltime(walltime: Duration) -> String {
    let total = walltime.as_secs();
    format!("{:02}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

pub(crate) fn capability_str<'a>(resource: &'a ComputeResource, key: &str) -> Option<&'a str> {
    resource
        .capabilities
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
}

/// Worker进程的启动命令行
pub(crate) fn worker_command_line(ctx: &SpawnContext, work_dir: &str) -> String {
    format!(
        "{} --server-address={} --worker-id={} --experiment-id={} --compute-resource-id={} --working-dir={}",
        ctx.worker_binary,
        ctx.server_address,
        ctx.worker_id,
        ctx.experiment_id,
        ctx.resource.id,
        work_dir
    )
}

/// 执行外部命令并返回标准输出，`stdin` 非空时写入子进程标准输入
pub(crate) async fn run_command(
    program: &str,
    args: &[&str],
    stdin: Option<&str>,
) -> SchedulerResult<String> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = cmd
        .spawn()
        .map_err(|e| SchedulerError::SpawnFailed(format!("启动命令 {program} 失败: {e}")))?;

    if let Some(input) = stdin {
        let mut pipe = child
            .stdin
            .take()
            .ok_or_else(|| SchedulerError::SpawnFailed(format!("无法获取 {program} 的标准输入")))?;
        pipe.write_all(input.as_bytes())
            .await
            .map_err(|e| SchedulerError::SpawnFailed(format!("写入 {program} 标准输入失败: {e}")))?;
        drop(pipe);
    }

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| SchedulerError::SpawnFailed(format!("等待命令 {program} 结束失败: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(SchedulerError::SpawnFailed(format!(
            "{program} 退出码 {:?}: {}",
            output.status.code(),
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::time::Duration;

    use scheduler_domain::entities::{ComputeResource, ComputeResourceType};
    use scheduler_domain::ports::SpawnContext;
    use scheduler_domain::value_objects::ResourceRequirements;

    pub fn context(resource_type: ComputeResourceType) -> SpawnContext {
        SpawnContext {
            worker_id: "worker-abc".to_string(),
            experiment_id: "exp-1".to_string(),
            user_id: "user-1".to_string(),
            resource: ComputeResource::new("resource-1", resource_type, 1.0, 4),
            walltime: Duration::from_secs(2 * 3600 + 90),
            requirements: ResourceRequirements {
                cpu_cores: 4,
                memory_mb: 8192,
                gpus: 1,
                ..Default::default()
            },
            worker_binary: "/opt/bin/experiment-worker".to_string(),
            server_address: "scheduler.internal:50051".to_string(),
            working_dir: "/scratch/workers".to_string(),
        }
    }
}
