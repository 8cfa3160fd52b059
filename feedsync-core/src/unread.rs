use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

/// Per-feed count of pushed articles the user has not looked at yet.
#[derive(Debug, Clone, Default)]
pub struct UnreadCounters {
    counts: Arc<RwLock<HashMap<i64, u64>>>,
}

impl UnreadCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn increment(&self, feed_id: i64, by: u64) -> u64 {
        let mut counts = self.counts.write().await;
        let count = counts.entry(feed_id).or_insert(0);
        *count += by;
        *count
    }

    pub async fn reset(&self, feed_id: i64) {
        self.counts.write().await.remove(&feed_id);
    }

    pub async fn reset_all(&self) {
        self.counts.write().await.clear();
    }

    pub async fn get(&self, feed_id: i64) -> u64 {
        self.counts.read().await.get(&feed_id).copied().unwrap_or(0)
    }

    pub async fn total(&self) -> u64 {
        self.counts.read().await.values().sum()
    }
}
