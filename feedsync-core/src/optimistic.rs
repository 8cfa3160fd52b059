//! Optimistic status changes on cached articles.
//!
//! The proposed values are written into every cached copy before the server is asked. The
//! server's answer then overwrites them; if the server rejects the change, the article is
//! fetched again and that copy wins. There is no blind revert to the prior values.

use tracing::{debug, warn};

use crate::article::ArticleStore;
use crate::error::SyncError;
use crate::models::{ArticleStatus, MarkAllReadResponse, StatusUpdate};

/// A status change that is waiting for the server's confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptimisticDelta {
    pub article_id: i64,
    pub prior: ArticleStatus,
    pub proposed: StatusUpdate,
}

impl ArticleStore {
    /// Changes the status flags of article `id`.
    ///
    /// The local change is visible as soon as this future is first polled past the
    /// credential check. On failure the cached copies reflect the server's state and the
    /// error is returned.
    pub async fn update_status(
        &self,
        id: i64,
        update: StatusUpdate,
    ) -> Result<ArticleStatus, SyncError> {
        if !self.credentials.has_token() {
            return Err(SyncError::Unauthenticated);
        }

        let delta = {
            let mut state = self.state.write().await;
            let prior = state.find(id).map(|article| article.status());
            state.for_each_copy(id, |article| article.apply_update(&update));
            prior.map(|prior| OptimisticDelta {
                article_id: id,
                prior,
                proposed: update.clone(),
            })
        };
        debug!(article_id = id, ?delta, "applied optimistic status change");

        match self.api.update_article_status(id, &update).await {
            Ok(status) => {
                let mut state = self.state.write().await;
                state.for_each_copy(id, |article| article.apply_status(&status));
                Ok(status)
            }
            Err(e) => {
                warn!(error = %e, article_id = id, "status update rejected, reloading article");
                self.recover(id, delta).await;
                Err(e.into())
            }
        }
    }

    async fn recover(&self, id: i64, delta: Option<OptimisticDelta>) {
        match self.api.get_article(id).await {
            Ok(article) => {
                let status = article.status();
                let mut state = self.state.write().await;
                let touched = state.for_each_copy(id, |cached| cached.apply_status(&status));
                debug!(article_id = id, touched, "restored server status");
            }
            Err(e) => {
                warn!(
                    error = %e,
                    article_id = id,
                    prior = ?delta.map(|d| d.prior),
                    "could not reload article, marking its scopes stale"
                );
                self.state.write().await.invalidate_scopes_holding(id);
            }
        }
    }

    /// Marks every article (or every article of `feed_id`) as read.
    ///
    /// Cached copies are flagged first. A failed request is returned without rollback; a
    /// successful one invalidates every scope.
    pub async fn mark_all_read(
        &self,
        feed_id: Option<i64>,
    ) -> Result<MarkAllReadResponse, SyncError> {
        if !self.credentials.has_token() {
            return Err(SyncError::Unauthenticated);
        }

        self.state.write().await.for_each_article(|article| {
            if feed_id.map_or(true, |feed_id| article.feed_id == feed_id) {
                article.is_read = true;
            }
        });

        let response = self.api.mark_all_read(feed_id).await.map_err(|e| {
            warn!(error = %e, ?feed_id, "mark all read failed");
            SyncError::from(e)
        })?;
        debug!(?feed_id, count = response.count, "marked articles as read");
        self.invalidate_all().await;
        Ok(response)
    }
}
