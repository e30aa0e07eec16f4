use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// 优雅关闭管理器
///
/// 关闭之后才订阅的接收端会立即收到信号。
#[derive(Clone)]
pub struct ShutdownManager {
    sender: broadcast::Sender<()>,
    triggered: Arc<AtomicBool>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(16);
        Self {
            sender,
            triggered: Arc::new(AtomicBool::new(false)),
        }
    }

    pub async fn subscribe(&self) -> broadcast::Receiver<()> {
        if !self.is_triggered() {
            return self.sender.subscribe();
        }
        let (late_tx, late_rx) = broadcast::channel(1);
        let _ = late_tx.send(());
        late_rx
    }

    /// 向所有订阅者广播关闭信号，只生效一次
    pub async fn shutdown(&self) {
        if self.triggered.swap(true, Ordering::SeqCst) {
            debug!("关闭信号已广播过");
            return;
        }

        let receivers = self.sender.receiver_count();
        // 没有订阅者时发送失败
        let _ = self.sender.send(());
        info!("关闭信号已广播给 {} 个组件", receivers);
    }

    pub async fn is_shutdown(&self) -> bool {
        self.is_triggered()
    }

    fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}
