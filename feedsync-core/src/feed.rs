use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::api::FeedApi;
use crate::cache::{EntrySet, MergeMode};
use crate::coordinator::RequestCoordinator;
use crate::error::SyncError;
use crate::models::{Ack, Feed, FeedCreate};

pub type SharedFeedList = Arc<RwLock<EntrySet<Feed>>>;

/// Cache of the user's subscriptions.
#[derive(Clone)]
pub struct FeedStore {
    api: Arc<dyn FeedApi>,
    feeds: SharedFeedList,
    requests: Arc<RequestCoordinator<(), Vec<Feed>>>,
    freshness: Duration,
}

impl FeedStore {
    pub fn new(api: Arc<dyn FeedApi>, freshness: Duration) -> Self {
        Self {
            api,
            feeds: Arc::new(RwLock::new(EntrySet::default())),
            requests: Arc::new(RequestCoordinator::new()),
            freshness,
        }
    }

    /// Returns the subscription list, reaching the network only when it is stale or forced.
    pub async fn fetch(&self, force: bool) -> Result<Vec<Feed>, SyncError> {
        let started = {
            let feeds = self.feeds.read().await;
            if !force && !feeds.is_empty() && feeds.is_fresh(self.freshness) {
                debug!("serving feeds from cache");
                return Ok(feeds.items().to_vec());
            }
            feeds.generation()
        };

        let api = Arc::clone(&self.api);
        let store = Arc::clone(&self.feeds);
        self.requests
            .coalesce((), move || async move {
                let list = api.list_feeds().await.map_err(|e| {
                    warn!(error = %e, "failed to fetch feeds");
                    SyncError::from(e)
                })?;
                let mut feeds = store.write().await;
                feeds.store(list.clone(), MergeMode::Replace, started);
                debug!(count = list.len(), "stored feed list");
                Ok(list)
            })
            .await
    }

    /// Subscribes to a new feed.
    ///
    /// The server's answer has no subscription id yet, so the list is marked stale after the
    /// new entry is appended.
    pub async fn add(&self, feed: FeedCreate) -> Result<Feed, SyncError> {
        let created = self.api.add_feed(&feed).await?;
        info!(url = %created.feed_url, "subscribed to feed");
        let mut feeds = self.feeds.write().await;
        feeds.push(created.clone());
        feeds.invalidate();
        Ok(created)
    }

    pub async fn delete(&self, feed_id: i64) -> Result<(), SyncError> {
        self.api.delete_feed(feed_id).await?;
        self.feeds.write().await.remove(feed_id);
        info!(feed_id, "unsubscribed from feed");
        Ok(())
    }

    /// Asks the server to re-crawl one feed; completion arrives as a push event.
    pub async fn refresh(&self, feed_id: i64) -> Result<Ack, SyncError> {
        Ok(self.api.refresh_feed(feed_id).await?)
    }

    /// Asks the server to re-crawl every feed.
    pub async fn trigger_refresh_all(&self) -> Result<Ack, SyncError> {
        Ok(self.api.refresh_all_feeds().await?)
    }

    pub async fn get(&self, feed_id: i64) -> Option<Feed> {
        self.feeds.read().await.get(feed_id).cloned()
    }

    pub async fn feeds(&self) -> Vec<Feed> {
        self.feeds.read().await.items().to_vec()
    }

    pub async fn is_empty(&self) -> bool {
        self.feeds.read().await.is_empty()
    }

    pub async fn is_fresh(&self) -> bool {
        self.feeds.read().await.is_fresh(self.freshness)
    }

    pub async fn invalidate(&self) {
        self.feeds.write().await.invalidate();
    }
}
