use std::fmt::Write;

use async_trait::async_trait;
use scheduler_core::SchedulerResult;
use scheduler_domain::entities::ComputeResourceType;
use scheduler_domain::ports::{SpawnContext, WorkerSpawner};
use tracing::{debug, info};

use super::{capability_str, run_command, worker_command_line};

const DEFAULT_IMAGE: &str = "ubuntu:22.04";

/// 以Pod形式运行Worker，通过 `kubectl` 提交
#[derive(Debug, Clone)]
pub struct KubernetesSpawner {
    kubectl: String,
    namespace: Option<String>,
}

impl Default for KubernetesSpawner {
    fn default() -> Self {
        Self::new("kubectl", None)
    }
}

impl KubernetesSpawner {
    pub fn new(kubectl: impl Into<String>, namespace: Option<String>) -> Self {
        Self {
            kubectl: kubectl.into(),
            namespace,
        }
    }

    /// Pod名只允许小写字母、数字和连字符，最长63个字符
    pub fn pod_name(worker_id: &str) -> String {
        let mut name: String = format!("worker-{worker_id}")
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_lowercase()
                } else {
                    '-'
                }
            })
            .collect();
        name.truncate(63);
        name.trim_end_matches('-').to_string()
    }

    fn namespace_args(&self) -> Vec<&str> {
        match &self.namespace {
            Some(ns) => vec!["-n", ns.as_str()],
            None => Vec::new(),
        }
    }
}

#[async_trait]
impl WorkerSpawner for KubernetesSpawner {
    fn resource_type(&self) -> ComputeResourceType {
        ComputeResourceType::Kubernetes
    }

    fn generate_worker_spawn_script(&self, ctx: &SpawnContext) -> SchedulerResult<String> {
        let req = &ctx.requirements;
        let work_dir = format!("{}/{}", ctx.working_dir, ctx.worker_id);
        let image = capability_str(&ctx.resource, "image").unwrap_or(DEFAULT_IMAGE);
        let memory_mb = if req.memory_mb == 0 { 1024 } else { req.memory_mb };

        let mut manifest = String::new();
        let _ = writeln!(manifest, "apiVersion: v1");
        let _ = writeln!(manifest, "kind: Pod");
        let _ = writeln!(manifest, "metadata:");
        let _ = writeln!(manifest, "  name: {}", Self::pod_name(&ctx.worker_id));
        let _ = writeln!(manifest, "  labels:");
        let _ = writeln!(manifest, "    app: experiment-worker");
        let _ = writeln!(manifest, "    worker-id: \"{}\"", ctx.worker_id);
        let _ = writeln!(manifest, "    experiment-id: \"{}\"", ctx.experiment_id);
        let _ = writeln!(manifest, "    compute-resource-id: \"{}\"", ctx.resource.id);
        let _ = writeln!(manifest, "spec:");
        let _ = writeln!(manifest, "  restartPolicy: Never");
        let _ = writeln!(manifest, "  activeDeadlineSeconds: {}", ctx.walltime.as_secs().max(1));
        let _ = writeln!(manifest, "  containers:");
        let _ = writeln!(manifest, "  - name: worker");
        let _ = writeln!(manifest, "    image: {image}");
        let _ = writeln!(manifest, "    command: [\"/bin/sh\", \"-c\"]");
        let _ = writeln!(manifest, "    args:");
        let _ = writeln!(manifest, "    - |");
        let _ = writeln!(manifest, "      mkdir -p \"{work_dir}\" && cd \"{work_dir}\"");
        let _ = writeln!(manifest, "      exec {}", worker_command_line(ctx, &work_dir));
        let _ = writeln!(manifest, "    resources:");
        let _ = writeln!(manifest, "      requests:");
        let _ = writeln!(manifest, "        cpu: \"{}\"", req.cpu_cores.max(1));
        let _ = writeln!(manifest, "        memory: \"{memory_mb}Mi\"");
        let _ = writeln!(manifest, "      limits:");
        let _ = writeln!(manifest, "        cpu: \"{}\"", req.cpu_cores.max(1));
        let _ = writeln!(manifest, "        memory: \"{memory_mb}Mi\"");
        if req.gpus > 0 {
            let _ = writeln!(manifest, "        nvidia.com/gpu: {}", req.gpus);
        }

        Ok(manifest)
    }

    async fn submit(&self, ctx: &SpawnContext, script: &str) -> SchedulerResult<String> {
        debug!("向Kubernetes资源 {} 提交Worker {}", ctx.resource.id, ctx.worker_id);
        let mut args = vec!["apply", "-f", "-"];
        args.extend(self.namespace_args());
        run_command(&self.kubectl, &args, Some(script)).await?;

        let pod = Self::pod_name(&ctx.worker_id);
        info!("Worker {} 已创建为Pod {}", ctx.worker_id, pod);
        Ok(pod)
    }

    async fn cancel(&self, job_id: &str) -> SchedulerResult<()> {
        let mut args = vec!["delete", "pod", job_id, "--ignore-not-found"];
        args.extend(self.namespace_args());
        run_command(&self.kubectl, &args, None).await?;
        info!("已删除Pod {}", job_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spawners::test_support::context;

    #[test]
    fn test_pod_name_is_dns_safe() {
        assert_eq!(KubernetesSpawner::pod_name("abc_DEF.1"), "worker-abc-def-1");
        let long = "x".repeat(100);
        assert_eq!(KubernetesSpawner::pod_name(&long).len(), 63);
    }

    #[test]
    fn test_manifest_contents() {
        let mut ctx = context(ComputeResourceType::Kubernetes);
        ctx.resource.capabilities = serde_json::json!({"image": "registry.local/worker:2"});

        let manifest = KubernetesSpawner::default()
            .generate_worker_spawn_script(&ctx)
            .unwrap();

        assert!(manifest.contains("name: worker-worker-abc"));
        assert!(manifest.contains("activeDeadlineSeconds: 7290"));
        assert!(manifest.contains("image: registry.local/worker:2"));
        assert!(manifest.contains("memory: \"8192Mi\""));
        assert!(manifest.contains("nvidia.com/gpu: 1"));
        assert!(manifest.contains("--experiment-id=exp-1"));
        assert!(manifest.contains("experiment-id: \"exp-1\""));
    }

    #[test]
    fn test_manifest_uses_default_image() {
        let ctx = context(ComputeResourceType::Kubernetes);
        let manifest = KubernetesSpawner::default()
            .generate_worker_spawn_script(&ctx)
            .unwrap();
        assert!(manifest.contains(&format!("image: {DEFAULT_IMAGE}")));
    }
}
