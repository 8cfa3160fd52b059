//! Fan-out of push events to the caches they affect.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::article::{ArticleScope, ArticleStore};
use crate::error::SyncError;
use crate::event::PushEvent;
use crate::feed::FeedStore;
use crate::notice::{Notice, NoticeSink};
use crate::preferences::PreferencesStore;
use crate::unread::UnreadCounters;

const FALLBACK_FEED_TITLE: &str = "a subscribed feed";

#[derive(Clone)]
pub struct EventRouter {
    articles: ArticleStore,
    feeds: FeedStore,
    preferences: PreferencesStore,
    unread: UnreadCounters,
    notices: Arc<dyn NoticeSink>,
}

impl EventRouter {
    pub fn new(
        articles: ArticleStore,
        feeds: FeedStore,
        preferences: PreferencesStore,
        unread: UnreadCounters,
        notices: Arc<dyn NoticeSink>,
    ) -> Self {
        Self {
            articles,
            feeds,
            preferences,
            unread,
            notices,
        }
    }

    /// Applies one event. Cache updates finish before this returns; network follow-ups (the
    /// feed list reload after a processed feed, naming the source of new articles) run in
    /// the background.
    pub async fn dispatch(&self, event: PushEvent) {
        debug!(kind = event.kind(), "routing push event");
        match event {
            PushEvent::ConnectionEstablished { message } => {
                self.notices.notify(Notice::info(
                    message.unwrap_or_else(|| "Live updates connected".into()),
                ));
            }
            PushEvent::FeedProcessed { feed_id, message } => {
                self.feeds.invalidate().await;
                let feeds = self.feeds.clone();
                tokio::spawn(async move {
                    if let Err(e) = feeds.fetch(false).await {
                        warn!(error = %e, "feed list reload after processing failed");
                    }
                });
                self.articles.invalidate(ArticleScope::Feed(feed_id)).await;
                self.notices.notify(Notice::success(
                    message.unwrap_or_else(|| "Feed processed".into()),
                ));
            }
            PushEvent::NewArticles { feed_id, count, .. } => {
                if let Some(feed_id) = feed_id.filter(|_| count > 0) {
                    self.unread.increment(feed_id, count).await;
                }
                self.articles.invalidate_new_articles(feed_id).await;
                if self.preferences.current().notifications_enabled {
                    // Naming the source may load the feed list; later events do not wait for it.
                    let router = self.clone();
                    tokio::spawn(async move {
                        let title = router.feed_title(feed_id).await;
                        router
                            .notices
                            .notify(Notice::info(format!("\"{title}\" has {count} new articles")));
                    });
                }
            }
            PushEvent::Error { message } => {
                self.notices.notify(Notice::error(message));
            }
            PushEvent::Pong => {}
            PushEvent::Unknown { kind } => {
                debug!(%kind, "ignoring push event");
            }
        }
    }

    async fn feed_title(&self, feed_id: Option<i64>) -> String {
        let Some(feed_id) = feed_id else {
            return FALLBACK_FEED_TITLE.to_owned();
        };
        if self.feeds.is_empty().await {
            if let Err(e) = self.feeds.fetch(false).await {
                warn!(error = %e, "could not load feeds to name a notice");
            }
        }
        self.feeds
            .get(feed_id)
            .await
            .map(|feed| feed.display_title().to_owned())
            .unwrap_or_else(|| FALLBACK_FEED_TITLE.to_owned())
    }
}

pub struct RouterHandle {
    cancel_tx: broadcast::Sender<()>,
    join: JoinHandle<()>,
}

impl RouterHandle {
    pub async fn stop(self) -> Result<(), SyncError> {
        let _ = self.cancel_tx.send(());
        self.join.await.map_err(SyncError::from)
    }
}

/// Consumes push events in arrival order until stopped or until every sender is gone.
pub fn spawn_router(router: EventRouter, mut events: mpsc::UnboundedReceiver<PushEvent>) -> RouterHandle {
    let (cancel_tx, mut cancel_rx) = broadcast::channel(1);
    let join = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel_rx.recv() => {
                    info!("event router shutdown requested");
                    break;
                }
                event = events.recv() => match event {
                    Some(event) => router.dispatch(event).await,
                    None => {
                        debug!("push event stream ended");
                        break;
                    }
                },
            }
        }
    });

    RouterHandle { cancel_tx, join }
}
