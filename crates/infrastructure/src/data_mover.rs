use async_trait::async_trait;
use scheduler_core::SchedulerResult;
use scheduler_domain::entities::Task;
use scheduler_domain::ports::DataMover;
use tracing::debug;

/// 共享文件系统部署下的数据搬运
///
/// 计算节点与存储挂载同一文件系统时输入输出无需复制，只记录日志。
#[derive(Debug, Default, Clone)]
pub struct SharedFilesystemDataMover;

impl SharedFilesystemDataMover {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DataMover for SharedFilesystemDataMover {
    async fn stage_input_to_worker(
        &self,
        task: &Task,
        worker_id: &str,
        user_id: &str,
    ) -> SchedulerResult<()> {
        debug!(
            "共享文件系统，跳过输入暂存: 任务 {} -> Worker {} (用户 {}, {} 个文件)",
            task.id,
            worker_id,
            user_id,
            task.input_files.len()
        );
        Ok(())
    }

    async fn stage_output_from_worker(
        &self,
        task: &Task,
        worker_id: &str,
        user_id: &str,
    ) -> SchedulerResult<()> {
        debug!(
            "共享文件系统，跳过输出回传: 任务 {} <- Worker {} (用户 {}, {} 个文件)",
            task.id,
            worker_id,
            user_id,
            task.output_files.len()
        );
        Ok(())
    }
}
