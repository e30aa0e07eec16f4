//! 状态变更钩子注册表
//!
//! 钩子在启动组装阶段注册，注册表随后被移入独立的分发任务。调度路径只向有界通道
//! 投递事件，通道已满时丢弃事件并告警，钩子的失败和耗时都不会影响状态转换本身。

use std::future::Future;
use std::sync::Arc;

use scheduler_core::SchedulerResult;
use scheduler_domain::events::StateChangeEvent;
use scheduler_domain::ports::{
    ExperimentStateChangeHook, TaskStateChangeHook, WorkerStateChangeHook,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

enum Envelope {
    Event(StateChangeEvent),
    Flush(oneshot::Sender<()>),
}

#[derive(Default, Clone)]
pub struct StateChangeHookRegistry {
    task_hooks: Vec<Arc<dyn TaskStateChangeHook>>,
    worker_hooks: Vec<Arc<dyn WorkerStateChangeHook>>,
    experiment_hooks: Vec<Arc<dyn ExperimentStateChangeHook>>,
}

impl StateChangeHookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_task_hook(&mut self, hook: Arc<dyn TaskStateChangeHook>) {
        debug!("注册任务状态钩子: {}", hook.name());
        self.task_hooks.push(hook);
    }

    pub fn register_worker_hook(&mut self, hook: Arc<dyn WorkerStateChangeHook>) {
        debug!("注册Worker状态钩子: {}", hook.name());
        self.worker_hooks.push(hook);
    }

    pub fn register_experiment_hook(&mut self, hook: Arc<dyn ExperimentStateChangeHook>) {
        debug!("注册实验状态钩子: {}", hook.name());
        self.experiment_hooks.push(hook);
    }

    pub fn with_task_hook(mut self, hook: Arc<dyn TaskStateChangeHook>) -> Self {
        self.register_task_hook(hook);
        self
    }

    pub fn with_worker_hook(mut self, hook: Arc<dyn WorkerStateChangeHook>) -> Self {
        self.register_worker_hook(hook);
        self
    }

    pub fn with_experiment_hook(mut self, hook: Arc<dyn ExperimentStateChangeHook>) -> Self {
        self.register_experiment_hook(hook);
        self
    }

    pub fn hook_count(&self) -> usize {
        self.task_hooks.len() + self.worker_hooks.len() + self.experiment_hooks.len()
    }

    /// 按注册顺序依次调用对应实体的钩子，失败只记录日志
    ///
    /// 每次调用在独立的任务中执行，钩子 panic 只丢失这一次调用。
    pub async fn notify(&self, event: &StateChangeEvent) {
        match event {
            StateChangeEvent::Task(change) => {
                for hook in &self.task_hooks {
                    let (hook_ref, owned) = (hook.clone(), change.clone());
                    let call = async move { hook_ref.on_task_state_change(&owned).await };
                    if let Some(Err(e)) = run_isolated(hook.name(), call).await {
                        warn!(
                            "任务状态钩子 {} 处理失败 (任务 {} {} -> {}): {}",
                            hook.name(),
                            change.task_id,
                            change.from,
                            change.to,
                            e
                        );
                    }
                }
            }
            StateChangeEvent::Worker(change) => {
                for hook in &self.worker_hooks {
                    let (hook_ref, owned) = (hook.clone(), change.clone());
                    let call = async move { hook_ref.on_worker_state_change(&owned).await };
                    if let Some(Err(e)) = run_isolated(hook.name(), call).await {
                        warn!(
                            "Worker状态钩子 {} 处理失败 (Worker {} {} -> {}): {}",
                            hook.name(),
                            change.worker_id,
                            change.from,
                            change.to,
                            e
                        );
                    }
                }
            }
            StateChangeEvent::Experiment(change) => {
                for hook in &self.experiment_hooks {
                    let (hook_ref, owned) = (hook.clone(), change.clone());
                    let call = async move { hook_ref.on_experiment_state_change(&owned).await };
                    if let Some(Err(e)) = run_isolated(hook.name(), call).await {
                        warn!(
                            "实验状态钩子 {} 处理失败 (实验 {} {} -> {}): {}",
                            hook.name(),
                            change.experiment_id,
                            change.from,
                            change.to,
                            e
                        );
                    }
                }
            }
        }
    }

    /// 启动分发任务，返回发布端和任务句柄
    ///
    /// 所有发布端被丢弃后分发任务处理完剩余事件即退出。
    pub fn start(self, capacity: usize) -> (HookPublisher, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::channel::<Envelope>(capacity.max(1));
        info!(
            "启动状态变更钩子分发任务，已注册 {} 个钩子，通道容量 {}",
            self.hook_count(),
            capacity
        );

        let handle = tokio::spawn(async move {
            while let Some(envelope) = receiver.recv().await {
                match envelope {
                    Envelope::Event(event) => self.notify(&event).await,
                    Envelope::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
            info!("状态变更钩子分发任务已停止");
        });

        (
            HookPublisher {
                sender: Some(sender),
            },
            handle,
        )
    }
}

/// 在独立任务中执行一次钩子调用，panic 时返回 `None`
async fn run_isolated<F>(hook_name: &str, call: F) -> Option<SchedulerResult<()>>
where
    F: Future<Output = SchedulerResult<()>> + Send + 'static,
{
    match tokio::spawn(call).await {
        Ok(result) => Some(result),
        Err(e) => {
            error!("钩子 {} 异常退出: {}", hook_name, e);
            None
        }
    }
}

/// 状态变更事件的发布端
#[derive(Clone)]
pub struct HookPublisher {
    sender: Option<mpsc::Sender<Envelope>>,
}

impl HookPublisher {
    /// 不分发任何事件的发布端
    pub fn disabled() -> Self {
        Self { sender: None }
    }

    /// 非阻塞投递
    pub fn publish(&self, event: StateChangeEvent) {
        let Some(sender) = &self.sender else {
            return;
        };
        match sender.try_send(Envelope::Event(event)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(Envelope::Event(event))) => {
                let (from, to) = event.transition();
                warn!(
                    "钩子通道已满，丢弃{}状态变更事件: {} {} -> {}",
                    event.entity(),
                    event.entity_id(),
                    from,
                    to
                );
            }
            Err(mpsc::error::TrySendError::Full(Envelope::Flush(_))) => {}
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("钩子分发任务已停止，忽略状态变更事件");
            }
        }
    }

    /// 等待此前投递的事件全部分发完成
    pub async fn flush(&self) {
        let Some(sender) = &self.sender else {
            return;
        };
        let (done, wait) = oneshot::channel();
        if sender.send(Envelope::Flush(done)).await.is_ok() {
            let _ = wait.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use scheduler_domain::entities::{TaskStatus, WorkerStatus};
    use scheduler_domain::events::{TaskStateChange, WorkerStateChange};
    use scheduler_testing_utils::{FailingHook, RecordingHook};

    fn task_event(task_id: &str, from: TaskStatus, to: TaskStatus) -> StateChangeEvent {
        StateChangeEvent::Task(TaskStateChange {
            task_id: task_id.to_string(),
            experiment_id: "exp-1".to_string(),
            from,
            to,
            timestamp: Utc::now(),
            message: None,
        })
    }

    #[tokio::test]
    async fn test_events_reach_hooks_in_order() {
        let recorder = Arc::new(RecordingHook::new());
        let (publisher, _handle) = StateChangeHookRegistry::new()
            .with_task_hook(recorder.clone())
            .with_worker_hook(recorder.clone())
            .start(16);

        publisher.publish(task_event("t-1", TaskStatus::Created, TaskStatus::Queued));
        publisher.publish(task_event("t-1", TaskStatus::Queued, TaskStatus::DataStaging));
        publisher.publish(StateChangeEvent::Worker(WorkerStateChange {
            worker_id: "w-1".to_string(),
            experiment_id: "exp-1".to_string(),
            from: WorkerStatus::Idle,
            to: WorkerStatus::Busy,
            timestamp: Utc::now(),
            message: None,
        }));
        publisher.flush().await;

        assert_eq!(
            recorder.task_transitions("t-1"),
            vec![
                (TaskStatus::Created, TaskStatus::Queued),
                (TaskStatus::Queued, TaskStatus::DataStaging)
            ]
        );
        assert_eq!(recorder.worker_events().len(), 1);
    }

    #[tokio::test]
    async fn test_failing_hook_does_not_stop_others() {
        let failing = Arc::new(FailingHook::new());
        let recorder = Arc::new(RecordingHook::new());
        let (publisher, _handle) = StateChangeHookRegistry::new()
            .with_task_hook(failing.clone())
            .with_task_hook(recorder.clone())
            .start(16);

        publisher.publish(task_event("t-1", TaskStatus::Created, TaskStatus::Queued));
        publisher.publish(task_event("t-2", TaskStatus::Created, TaskStatus::Queued));
        publisher.flush().await;

        assert_eq!(failing.calls(), 2);
        assert_eq!(recorder.task_events().len(), 2);
    }

    struct PanickingHook;

    #[async_trait]
    impl TaskStateChangeHook for PanickingHook {
        fn name(&self) -> &str {
            "panicking"
        }

        async fn on_task_state_change(&self, event: &TaskStateChange) -> SchedulerResult<()> {
            if event.task_id == "t-panic" {
                panic!("钩子内部错误");
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_panicking_hook_keeps_dispatcher_alive() {
        let recorder = Arc::new(RecordingHook::new());
        let (publisher, handle) = StateChangeHookRegistry::new()
            .with_task_hook(Arc::new(PanickingHook))
            .with_task_hook(recorder.clone())
            .start(16);

        publisher.publish(task_event("t-panic", TaskStatus::Created, TaskStatus::Queued));
        publisher.publish(task_event("t-2", TaskStatus::Created, TaskStatus::Queued));
        publisher.flush().await;

        assert!(!handle.is_finished());
        assert_eq!(recorder.task_events().len(), 2);
        assert_eq!(
            recorder.task_transitions("t-2"),
            vec![(TaskStatus::Created, TaskStatus::Queued)]
        );
    }

    #[tokio::test]
    async fn test_disabled_publisher_is_noop() {
        let publisher = HookPublisher::disabled();
        publisher.publish(task_event("t-1", TaskStatus::Created, TaskStatus::Queued));
        publisher.flush().await;
    }

    #[tokio::test]
    async fn test_dispatcher_stops_when_publishers_dropped() {
        let (publisher, handle) = StateChangeHookRegistry::new().start(4);
        drop(publisher);
        handle.await.unwrap();
    }
}
