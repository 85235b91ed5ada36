//! Sleeping between poll attempts

use async_trait::async_trait;
use std::time::Duration;

/// Injectable delay so polling loops run instantly under test
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
