use std::fmt::Write;

use async_trait::async_trait;
use chrono::Utc;
use scheduler_core::{SchedulerError, SchedulerResult};
use scheduler_domain::entities::ComputeResourceType;
use scheduler_domain::ports::{SpawnContext, WorkerSpawner};
use tracing::{debug, info};

use super::{capability_str, format_walltime, run_command, worker_command_line};

/// 通过 `sbatch` 提交Worker作业
#[derive(Debug, Clone)]
pub struct SlurmSpawner {
    sbatch: String,
    scancel: String,
}

impl Default for SlurmSpawner {
    fn default() -> Self {
        Self::new("sbatch", "scancel")
    }
}

impl SlurmSpawner {
    pub fn new(sbatch: impl Into<String>, scancel: impl Into<String>) -> Self {
        Self {
            sbatch: sbatch.into(),
            scancel: scancel.into(),
        }
    }

    /// `--parsable` 输出形如 `12345` 或 `12345;cluster`
    fn parse_job_id(output: &str) -> SchedulerResult<String> {
        let job_id = output
            .lines()
            .last()
            .and_then(|line| line.split(';').next())
            .map(str::trim)
            .unwrap_or_default();
        if job_id.is_empty() || !job_id.chars().all(|c| c.is_ascii_digit() || c == '_') {
            return Err(SchedulerError::SpawnFailed(format!(
                "无法解析sbatch输出的作业ID: {output:?}"
            )));
        }
        Ok(job_id.to_string())
    }
}

#[async_trait]
impl WorkerSpawner for SlurmSpawner {
    fn resource_type(&self) -> ComputeResourceType {
        ComputeResourceType::Slurm
    }

    fn generate_worker_spawn_script(&self, ctx: &SpawnContext) -> SchedulerResult<String> {
        let req = &ctx.requirements;
        let work_dir = format!("{}/{}", ctx.working_dir, ctx.worker_id);
        let memory_mb = if req.memory_mb == 0 { 1024 } else { req.memory_mb };

        let mut script = String::new();
        let _ = writeln!(script, "#!/bin/bash");
        let _ = writeln!(script, "#SBATCH --job-name=worker_{}", ctx.worker_id);
        let _ = writeln!(script, "#SBATCH --output={}/%j.out", ctx.working_dir);
        let _ = writeln!(script, "#SBATCH --error={}/%j.err", ctx.working_dir);
        let _ = writeln!(script, "#SBATCH --time={}", format_walltime(ctx.walltime));
        let _ = writeln!(script, "#SBATCH --nodes=1");
        let _ = writeln!(script, "#SBATCH --ntasks=1");
        let _ = writeln!(script, "#SBATCH --cpus-per-task={}", req.cpu_cores.max(1));
        let _ = writeln!(script, "#SBATCH --mem={memory_mb}M");
        if req.gpus > 0 {
            let _ = writeln!(script, "#SBATCH --gres=gpu:{}", req.gpus);
        }
        if let Some(partition) = capability_str(&ctx.resource, "partition")
            .or_else(|| capability_str(&ctx.resource, "queue"))
        {
            let _ = writeln!(script, "#SBATCH --partition={partition}");
        }
        if let Some(account) = capability_str(&ctx.resource, "account") {
            let _ = writeln!(script, "#SBATCH --account={account}");
        }
        if let Some(qos) = capability_str(&ctx.resource, "qos") {
            let _ = writeln!(script, "#SBATCH --qos={qos}");
        }
        let _ = writeln!(script);
        let _ = writeln!(script, "# generated at {}", Utc::now().to_rfc3339());
        let _ = writeln!(script, "set -euo pipefail");
        let _ = writeln!(script, "mkdir -p \"{work_dir}\"");
        let _ = writeln!(script, "cd \"{work_dir}\"");
        let _ = writeln!(script, "exec {}", worker_command_line(ctx, &work_dir));

        Ok(script)
    }

    async fn submit(&self, ctx: &SpawnContext, script: &str) -> SchedulerResult<String> {
        debug!("向SLURM资源 {} 提交Worker {}", ctx.resource.id, ctx.worker_id);
        let output = run_command(&self.sbatch, &["--parsable"], Some(script)).await?;
        let job_id = Self::parse_job_id(&output)?;
        info!("Worker {} 已提交为SLURM作业 {}", ctx.worker_id, job_id);
        Ok(job_id)
    }

    async fn cancel(&self, job_id: &str) -> SchedulerResult<()> {
        run_command(&self.scancel, &[job_id], None).await?;
        info!("已取消SLURM作业 {}", job_id);
        Ok(())
    }
}
