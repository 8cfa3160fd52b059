//! Article cache.
//!
//! Articles are cached per [`ArticleScope`]. A first-page read that finds a fresh scope is
//! answered locally; every other read goes through the [`RequestCoordinator`], keyed by the
//! full query and merge mode, so identical concurrent reads share one request.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::api::FeedApi;
use crate::cache::{EntrySet, MergeMode};
use crate::coordinator::RequestCoordinator;
use crate::credentials::CredentialProvider;
use crate::error::SyncError;
use crate::models::{Article, ArticlePage, SortOrder, StatusUpdate};

/// Server-side filter a cached article list was fetched with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArticleScope {
    All,
    Feed(i64),
    Unread,
    Favorite,
    ReadLater,
    Latest,
}

impl ArticleScope {
    /// Scopes that are derived views of the article collection, cleared by a full invalidation.
    pub fn is_aggregate(self) -> bool {
        !matches!(self, ArticleScope::All)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArticleQuery {
    pub scope: ArticleScope,
    pub skip: u32,
    pub limit: Option<u32>,
    pub sort: Option<SortOrder>,
    pub days_ago: Option<u32>,
}

impl ArticleQuery {
    pub fn new(scope: ArticleScope) -> Self {
        Self {
            scope,
            skip: 0,
            limit: None,
            sort: None,
            days_ago: None,
        }
    }

    pub fn page(mut self, skip: u32, limit: u32) -> Self {
        self.skip = skip;
        self.limit = Some(limit);
        self
    }

    pub fn sorted(mut self, sort: SortOrder) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn within_days(mut self, days: u32) -> Self {
        self.days_ago = Some(days);
        self
    }

    /// Query string of `GET /articles`.
    pub fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("skip", self.skip.to_string())];
        if let Some(limit) = self.limit {
            params.push(("limit", limit.to_string()));
        }
        match self.scope {
            ArticleScope::All | ArticleScope::Latest => {}
            ArticleScope::Feed(feed_id) => params.push(("feed_id", feed_id.to_string())),
            ArticleScope::Unread => params.push(("is_read", "false".into())),
            ArticleScope::Favorite => params.push(("is_favorite", "true".into())),
            ArticleScope::ReadLater => params.push(("read_later", "true".into())),
        }
        if let Some(days) = self.days_ago {
            params.push(("days_ago", days.to_string()));
        }
        if let Some(sort) = self.sort {
            params.push(("sort", sort.as_str().into()));
        }
        params
    }
}

/// Pagination metadata of the last page stored into a scope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageInfo {
    pub total: u64,
    pub page: u32,
    pub total_pages: u32,
    pub has_more: bool,
}

impl From<&ArticlePage> for PageInfo {
    fn from(page: &ArticlePage) -> Self {
        Self {
            total: page.total,
            page: page.page,
            total_pages: page.total_pages,
            has_more: page.has_more,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BadgeCounts {
    pub favorites: u64,
    pub read_later: u64,
    pub unread: u64,
}

#[derive(Debug, Default)]
pub(crate) struct ScopeCache {
    pub(crate) entries: EntrySet<Article>,
    pub(crate) page: PageInfo,
    // First-page query the entries were fetched with; the fast path only serves the same one.
    first_page: Option<ArticleQuery>,
}

impl ScopeCache {
    fn serves(&self, query: &ArticleQuery, window: Duration) -> bool {
        self.first_page.as_ref() == Some(query)
            && !self.entries.is_empty()
            && self.entries.is_fresh(window)
    }

    fn snapshot(&self) -> ArticlePage {
        ArticlePage {
            data: self.entries.items().to_vec(),
            total: self.page.total,
            page: self.page.page,
            total_pages: self.page.total_pages,
            has_more: self.page.has_more,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct ArticleState {
    pub(crate) scopes: HashMap<ArticleScope, ScopeCache>,
    pub(crate) search: EntrySet<Article>,
    pub(crate) current: Option<Article>,
    pub(crate) badges: BadgeCounts,
}

impl ArticleState {
    /// Looks an article up in search results, then in the cached scopes.
    pub(crate) fn find(&self, id: i64) -> Option<Article> {
        self.search
            .get(id)
            .or_else(|| self.scopes.values().find_map(|s| s.entries.get(id)))
            .or_else(|| self.current.as_ref().filter(|a| a.id == id))
            .cloned()
    }

    /// Applies `f` to every cached copy of article `id`; returns how many were touched.
    pub(crate) fn for_each_copy(&mut self, id: i64, mut f: impl FnMut(&mut Article)) -> usize {
        let mut touched = 0;
        for scope in self.scopes.values_mut() {
            if let Some(article) = scope.entries.get_mut(id) {
                f(article);
                touched += 1;
            }
        }
        if let Some(article) = self.search.get_mut(id) {
            f(article);
            touched += 1;
        }
        if let Some(article) = self.current.as_mut().filter(|a| a.id == id) {
            f(article);
            touched += 1;
        }
        touched
    }

    pub(crate) fn for_each_article(&mut self, mut f: impl FnMut(&mut Article)) {
        for scope in self.scopes.values_mut() {
            scope.entries.items_mut().for_each(&mut f);
        }
        self.search.items_mut().for_each(&mut f);
        if let Some(article) = self.current.as_mut() {
            f(article);
        }
    }

    pub(crate) fn invalidate_scopes_holding(&mut self, id: i64) {
        for (scope, cache) in self.scopes.iter_mut() {
            if cache.entries.contains(id) {
                debug!(?scope, article_id = id, "marking scope stale");
                cache.entries.invalidate();
            }
        }
    }

    // Creates the scope if needed so a fetch already running for it sees the bump.
    fn invalidate(&mut self, scope: ArticleScope) {
        self.scopes.entry(scope).or_default().entries.invalidate();
    }
}

#[derive(Clone)]
pub struct ArticleStore {
    pub(crate) api: Arc<dyn FeedApi>,
    pub(crate) credentials: Arc<dyn CredentialProvider>,
    pub(crate) state: Arc<RwLock<ArticleState>>,
    requests: Arc<RequestCoordinator<(ArticleQuery, MergeMode), ArticlePage>>,
    freshness: Duration,
}

impl ArticleStore {
    pub fn new(
        api: Arc<dyn FeedApi>,
        credentials: Arc<dyn CredentialProvider>,
        freshness: Duration,
    ) -> Self {
        Self {
            api,
            credentials,
            state: Arc::new(RwLock::new(ArticleState::default())),
            requests: Arc::new(RequestCoordinator::new()),
            freshness,
        }
    }

    /// Reads one page of a scope.
    ///
    /// A non-forced first-page replace read of a fresh scope is served from the cache. On
    /// failure the cached entries are left as they were.
    pub async fn fetch(
        &self,
        query: ArticleQuery,
        mode: MergeMode,
        force: bool,
    ) -> Result<ArticlePage, SyncError> {
        let started = {
            let state = self.state.read().await;
            let cached = state.scopes.get(&query.scope);
            if !force && mode == MergeMode::Replace && query.skip == 0 {
                if let Some(cache) = cached.filter(|c| c.serves(&query, self.freshness)) {
                    debug!(scope = ?query.scope, "serving articles from cache");
                    return Ok(cache.snapshot());
                }
            }
            cached.map(|c| c.entries.generation()).unwrap_or(0)
        };

        let api = Arc::clone(&self.api);
        let state = Arc::clone(&self.state);
        let key = (query.clone(), mode);
        self.requests
            .coalesce(key, move || async move {
                let page = api
                    .list_articles(&query)
                    .await
                    .map_err(|e| {
                        warn!(error = %e, scope = ?query.scope, "failed to fetch articles");
                        SyncError::from(e)
                    })?
                    .into_page(query.skip, query.limit);

                let mut state = state.write().await;
                let cache = state.scopes.entry(query.scope).or_default();
                let fresh = cache.entries.store(page.data.clone(), mode, started);
                cache.page = PageInfo::from(&page);
                if query.skip == 0 && mode == MergeMode::Replace {
                    cache.first_page = Some(query.clone());
                }
                debug!(
                    scope = ?query.scope,
                    count = page.data.len(),
                    fresh,
                    "stored article page"
                );
                Ok(page)
            })
            .await
    }

    /// Combines `incoming` with a scope's cached entries without touching its freshness.
    pub async fn replace_or_merge(
        &self,
        scope: ArticleScope,
        incoming: Vec<Article>,
        mode: MergeMode,
    ) -> usize {
        let mut state = self.state.write().await;
        state
            .scopes
            .entry(scope)
            .or_default()
            .entries
            .replace_or_merge(incoming, mode)
    }

    pub async fn invalidate(&self, scope: ArticleScope) {
        self.state.write().await.invalidate(scope);
    }

    /// Marks every scope stale and drops the aggregate views; the `all` list is kept.
    pub async fn invalidate_all(&self) {
        let mut state = self.state.write().await;
        for (scope, cache) in state.scopes.iter_mut() {
            if scope.is_aggregate() {
                cache.entries.clear();
                cache.page = PageInfo::default();
                cache.first_page = None;
            } else {
                cache.entries.invalidate();
            }
        }
        debug!("invalidated all article scopes");
    }

    /// Marks the scopes that new articles would show up in as stale: the unread and latest
    /// views, plus the feed's own scope when the articles are attributed to one.
    pub async fn invalidate_new_articles(&self, feed_id: Option<i64>) {
        let mut state = self.state.write().await;
        if let Some(feed_id) = feed_id {
            state.invalidate(ArticleScope::Feed(feed_id));
        }
        state.invalidate(ArticleScope::Unread);
        state.invalidate(ArticleScope::Latest);
    }

    /// Full-text search; results live apart from the scopes and are never coalesced.
    pub async fn search(&self, q: &str, skip: u32, limit: u32) -> Result<ArticlePage, SyncError> {
        let page = self.api.search_articles(q, skip, limit).await?;
        let mode = if skip == 0 {
            MergeMode::Replace
        } else {
            MergeMode::Merge
        };
        self.state
            .write()
            .await
            .search
            .replace_or_merge(page.data.clone(), mode);
        Ok(page)
    }

    /// Makes `id` the currently viewed article, fetching it when no copy is cached.
    ///
    /// An unread article is marked read on the way.
    pub async fn open(&self, id: i64) -> Result<Article, SyncError> {
        let cached = self.state.read().await.find(id);
        let article = match cached {
            Some(article) => article,
            None => {
                let article = self.api.get_article(id).await?;
                let mut state = self.state.write().await;
                state
                    .scopes
                    .entry(ArticleScope::All)
                    .or_default()
                    .entries
                    .insert_front(article.clone());
                article
            }
        };
        self.state.write().await.current = Some(article.clone());

        if !article.is_read && self.credentials.has_token() {
            if let Err(e) = self.update_status(id, StatusUpdate::read(true)).await {
                warn!(error = %e, article_id = id, "failed to mark opened article as read");
            }
        }
        Ok(self.current().await.unwrap_or(article))
    }

    /// Loads the full content of `id` into every cached copy.
    pub async fn fetch_content(&self, id: i64) -> Result<Option<String>, SyncError> {
        let content = self.api.get_article_content(id).await?.content;
        let mut state = self.state.write().await;
        state.for_each_copy(id, |article| article.content = content.clone());
        Ok(content)
    }

    /// Refreshes the favorite, read-later and unread totals shown as badges.
    pub async fn fetch_badge_counts(&self) -> Result<BadgeCounts, SyncError> {
        let favorites = ArticleQuery::new(ArticleScope::Favorite).page(0, 1);
        let read_later = ArticleQuery::new(ArticleScope::ReadLater).page(0, 1);
        let unread = ArticleQuery::new(ArticleScope::Unread).page(0, 1);

        let (favorites, read_later, unread) = tokio::try_join!(
            self.api.list_articles(&favorites),
            self.api.list_articles(&read_later),
            self.api.list_articles(&unread),
        )?;
        let badges = BadgeCounts {
            favorites: favorites.into_page(0, Some(1)).total,
            read_later: read_later.into_page(0, Some(1)).total,
            unread: unread.into_page(0, Some(1)).total,
        };
        self.state.write().await.badges = badges;
        Ok(badges)
    }

    pub async fn article(&self, id: i64) -> Option<Article> {
        self.state.read().await.find(id)
    }

    pub async fn current(&self) -> Option<Article> {
        self.state.read().await.current.clone()
    }

    pub async fn scope_snapshot(&self, scope: ArticleScope) -> Vec<Article> {
        self.state
            .read()
            .await
            .scopes
            .get(&scope)
            .map(|c| c.entries.items().to_vec())
            .unwrap_or_default()
    }

    pub async fn page_info(&self, scope: ArticleScope) -> Option<PageInfo> {
        self.state.read().await.scopes.get(&scope).map(|c| c.page)
    }

    pub async fn is_fresh(&self, scope: ArticleScope) -> bool {
        self.state
            .read()
            .await
            .scopes
            .get(&scope)
            .map(|c| c.entries.is_fresh(self.freshness))
            .unwrap_or(false)
    }

    pub async fn search_results(&self) -> Vec<Article> {
        self.state.read().await.search.items().to_vec()
    }

    pub async fn badge_counts(&self) -> BadgeCounts {
        self.state.read().await.badges
    }
}
