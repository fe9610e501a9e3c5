use std::time::Duration;

use async_trait::async_trait;

/// Source of delays for retry and reconnect loops.
///
/// Production uses [`TokioTimer`]; tests substitute a timer that records the
/// requested durations instead of waiting.
#[async_trait]
pub trait Timer: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTimer;

#[async_trait]
impl Timer for TokioTimer {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
