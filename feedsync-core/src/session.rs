//! One signed-in session: the stores, the push channel and the tasks that keep them in step.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::api::{FeedApi, HttpApi};
use crate::article::{ArticleQuery, ArticleScope, ArticleStore};
use crate::auto_refresh::{spawn_auto_refresh, AutoRefreshHandle};
use crate::cache::MergeMode;
use crate::config::SyncConfig;
use crate::credentials::{CredentialProvider, TokenStore};
use crate::error::{ApiError, SyncError};
use crate::event::PushEvent;
use crate::feed::FeedStore;
use crate::models::{ArticlePage, MarkAllReadResponse};
use crate::notice::{Notice, NoticeSink};
use crate::preferences::PreferencesStore;
use crate::push::{PushChannel, PushOptions};
use crate::router::{spawn_router, EventRouter, RouterHandle};
use crate::unread::UnreadCounters;

pub struct Session {
    config: SyncConfig,
    credentials: Arc<TokenStore>,
    articles: ArticleStore,
    feeds: FeedStore,
    preferences: PreferencesStore,
    unread: UnreadCounters,
    push: PushChannel,
    notices: Arc<dyn NoticeSink>,
    router: EventRouter,
    events: Option<mpsc::UnboundedReceiver<PushEvent>>,
    router_task: Option<RouterHandle>,
    auto_refresh: Option<AutoRefreshHandle>,
}

impl Session {
    pub fn new(
        config: SyncConfig,
        credentials: Arc<TokenStore>,
        notices: Arc<dyn NoticeSink>,
    ) -> Result<Self, ApiError> {
        let provider: Arc<dyn CredentialProvider> = credentials.clone();
        let api = Arc::new(HttpApi::new(&config.api, provider)?);
        Ok(Self::with_api(config, credentials, api, notices))
    }

    pub fn with_api(
        config: SyncConfig,
        credentials: Arc<TokenStore>,
        api: Arc<dyn FeedApi>,
        notices: Arc<dyn NoticeSink>,
    ) -> Self {
        let provider: Arc<dyn CredentialProvider> = credentials.clone();
        let freshness = config.cache.freshness();

        let articles = ArticleStore::new(Arc::clone(&api), Arc::clone(&provider), freshness);
        let feeds = FeedStore::new(Arc::clone(&api), freshness);
        let preferences = PreferencesStore::new(api);
        let unread = UnreadCounters::new();

        let (events_tx, events) = mpsc::unbounded_channel();
        let push = PushChannel::new(PushOptions::from(&config.push), provider, events_tx);
        let router = EventRouter::new(
            articles.clone(),
            feeds.clone(),
            preferences.clone(),
            unread.clone(),
            Arc::clone(&notices),
        );

        Self {
            config,
            credentials,
            articles,
            feeds,
            preferences,
            unread,
            push,
            notices,
            router,
            events: Some(events),
            router_task: None,
            auto_refresh: None,
        }
    }

    /// Starts routing push events and, with a credential, loads preferences, arms the
    /// auto-refresh schedule once they are loaded and opens the push channel.
    ///
    /// Calling it again (as [`login`](Self::login) does) retries what failed before.
    pub async fn start(&mut self) -> Result<(), SyncError> {
        if let Some(events) = self.events.take() {
            self.router_task = Some(spawn_router(self.router.clone(), events));
        }
        if !self.credentials.has_token() {
            info!("no credential, session idle until login");
            return Ok(());
        }

        if let Err(e) = self.preferences.fetch(false).await {
            warn!(error = %e, "could not load preferences, using defaults");
            if e.is_unauthorized() {
                return Err(e);
            }
        }
        if !self.preferences.is_initialized() {
            info!("preferences unavailable, auto-refresh not armed");
        } else if self.auto_refresh.is_none() {
            self.auto_refresh = Some(spawn_auto_refresh(
                self.feeds.clone(),
                self.preferences.subscribe(),
                self.config.refresh.min_interval(),
                Arc::clone(&self.notices),
            ));
        }
        if let Err(e) = self.push.connect() {
            warn!(error = %e, "could not open push channel");
        }
        Ok(())
    }

    pub async fn login(&mut self, token: impl Into<String>) -> Result<(), SyncError> {
        self.credentials.set(token);
        self.start().await
    }

    /// Drops the credential and everything learned under it.
    pub async fn logout(&mut self) {
        self.push.disconnect();
        self.credentials.clear();
        if let Some(handle) = self.auto_refresh.take() {
            if let Err(e) = handle.stop().await {
                warn!(error = %e, "auto-refresh task ended abnormally");
            }
        }
        self.unread.reset_all().await;
        self.preferences.reset();
        self.articles.invalidate_all().await;
        self.feeds.invalidate().await;
        info!("session logged out");
    }

    pub async fn shutdown(mut self) {
        self.push.disconnect();
        if let Some(handle) = self.auto_refresh.take() {
            if let Err(e) = handle.stop().await {
                warn!(error = %e, "auto-refresh task ended abnormally");
            }
        }
        if let Some(handle) = self.router_task.take() {
            if let Err(e) = handle.stop().await {
                warn!(error = %e, "event router ended abnormally");
            }
        }
        debug!("session shut down");
    }

    /// Query for `scope` with the user's default sorting and, for the latest view, window.
    pub fn query(&self, scope: ArticleScope) -> ArticleQuery {
        let prefs = self.preferences.current();
        let query = ArticleQuery::new(scope).sorted(prefs.default_sorting);
        match scope {
            ArticleScope::Latest => query.within_days(prefs.latest_articles_days),
            _ => query,
        }
    }

    /// Loads a page of `scope`; later pages are merged into the cached list.
    pub async fn load_articles(
        &self,
        scope: ArticleScope,
        skip: u32,
        limit: u32,
        force: bool,
    ) -> Result<ArticlePage, SyncError> {
        let mode = if skip == 0 {
            MergeMode::Replace
        } else {
            MergeMode::Merge
        };
        let page = self
            .articles
            .fetch(self.query(scope).page(skip, limit), mode, force)
            .await?;
        if let (ArticleScope::Feed(feed_id), 0) = (scope, skip) {
            self.unread.reset(feed_id).await;
        }
        Ok(page)
    }

    pub async fn mark_all_read(
        &self,
        feed_id: Option<i64>,
    ) -> Result<MarkAllReadResponse, SyncError> {
        match self.articles.mark_all_read(feed_id).await {
            Ok(response) => {
                self.notices.notify(Notice::success(response.message.clone()));
                if let Some(feed_id) = feed_id {
                    self.unread.reset(feed_id).await;
                }
                Ok(response)
            }
            Err(e) => {
                self.notices
                    .notify(Notice::error(format!("Could not mark articles as read: {e}")));
                Err(e)
            }
        }
    }

    pub fn articles(&self) -> &ArticleStore {
        &self.articles
    }

    pub fn feeds(&self) -> &FeedStore {
        &self.feeds
    }

    pub fn preferences(&self) -> &PreferencesStore {
        &self.preferences
    }

    pub fn unread(&self) -> &UnreadCounters {
        &self.unread
    }

    pub fn push(&self) -> &PushChannel {
        &self.push
    }

    pub fn credentials(&self) -> &Arc<TokenStore> {
        &self.credentials
    }
}
