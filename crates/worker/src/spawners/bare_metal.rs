use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use scheduler_core::{SchedulerError, SchedulerResult};
use scheduler_domain::entities::ComputeResourceType;
use scheduler_domain::ports::{SpawnContext, WorkerSpawner};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::worker_command_line;

/// 在本机以子进程方式运行Worker
pub struct BareMetalSpawner {
    shell: String,
    /// 作业ID -> 子进程
    children: Arc<Mutex<HashMap<String, Child>>>,
}

impl Default for BareMetalSpawner {
    fn default() -> Self {
        Self::new("sh")
    }
}

impl BareMetalSpawner {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
            children: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn running_jobs(&self) -> Vec<String> {
        self.children.lock().await.keys().cloned().collect()
    }

    fn script_path(ctx: &SpawnContext) -> PathBuf {
        PathBuf::from(&ctx.working_dir).join(format!("{}.sh", ctx.worker_id))
    }
}

#[async_trait]
impl WorkerSpawner for BareMetalSpawner {
    fn resource_type(&self) -> ComputeResourceType {
        ComputeResourceType::BareMetal
    }

    fn generate_worker_spawn_script(&self, ctx: &SpawnContext) -> SchedulerResult<String> {
        let work_dir = format!("{}/{}", ctx.working_dir, ctx.worker_id);
        Ok(format!(
            "#!/bin/sh\nset -eu\nmkdir -p \"{work_dir}\"\ncd \"{work_dir}\"\nexec timeout {} {}\n",
            ctx.walltime.as_secs().max(1),
            worker_command_line(ctx, &work_dir)
        ))
    }

    async fn submit(&self, ctx: &SpawnContext, script: &str) -> SchedulerResult<String> {
        tokio::fs::create_dir_all(&ctx.working_dir)
            .await
            .map_err(|e| SchedulerError::SpawnFailed(format!("创建工作目录 {} 失败: {e}", ctx.working_dir)))?;

        let path = Self::script_path(ctx);
        tokio::fs::write(&path, script)
            .await
            .map_err(|e| SchedulerError::SpawnFailed(format!("写入启动脚本 {} 失败: {e}", path.display())))?;

        let child = Command::new(&self.shell)
            .arg(&path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| SchedulerError::SpawnFailed(format!("启动Worker {} 进程失败: {e}", ctx.worker_id)))?;

        let job_id = match child.id() {
            Some(pid) => format!("local-{pid}"),
            None => format!("local-{}", ctx.worker_id),
        };
        self.children.lock().await.insert(job_id.clone(), child);

        info!("Worker {} 已在本机启动，作业 {}", ctx.worker_id, job_id);
        Ok(job_id)
    }

    async fn cancel(&self, job_id: &str) -> SchedulerResult<()> {
        let Some(mut child) = self.children.lock().await.remove(job_id) else {
            debug!("本机作业 {} 不存在或已结束", job_id);
            return Ok(());
        };

        if let Ok(Some(status)) = child.try_wait() {
            debug!("本机作业 {} 已退出: {}", job_id, status);
            return Ok(());
        }
        if let Err(e) = child.kill().await {
            warn!("终止本机作业 {} 失败: {}", job_id, e);
        } else {
            info!("已终止本机作业 {}", job_id);
        }
        Ok(())
    }
}
