//! Test helper utilities and common testing patterns

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Test environment setup utilities
pub struct TestEnv;

impl TestEnv {
    /// Wait for a condition to be true with timeout
    pub async fn wait_for<F, Fut>(mut condition: F, timeout: Duration) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        let start = std::time::Instant::now();

        while start.elapsed() < timeout {
            if condition().await {
                return true;
            }
            sleep(Duration::from_millis(10)).await;
        }

        condition().await
    }

    /// Generate unique ids for tests that share a store
    pub fn unique_id(prefix: &str) -> String {
        format!("{}-{}", prefix, uuid::Uuid::new_v4().simple())
    }
}
