//! HTTP boundary of the sync layer.
//!
//! Stores talk to the server through [`FeedApi`]; [`HttpApi`] is the reqwest-backed
//! implementation. Handling of a rejected credential (sign-out, redirect) is left to the
//! caller, which sees [`ApiError::Unauthorized`].

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, ClientBuilder, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::article::ArticleQuery;
use crate::config::ApiConfig;
use crate::credentials::CredentialProvider;
use crate::error::ApiError;
use crate::models::{
    Ack, Article, ArticleContent, ArticleListResponse, ArticlePage, ArticleStatus, Feed,
    FeedCreate, MarkAllReadResponse, Preferences, StatusUpdate,
};

#[async_trait]
pub trait FeedApi: Send + Sync {
    async fn list_articles(&self, query: &ArticleQuery) -> Result<ArticleListResponse, ApiError>;
    async fn search_articles(
        &self,
        query: &str,
        skip: u32,
        limit: u32,
    ) -> Result<ArticlePage, ApiError>;
    async fn get_article(&self, id: i64) -> Result<Article, ApiError>;
    async fn get_article_content(&self, id: i64) -> Result<ArticleContent, ApiError>;
    async fn update_article_status(
        &self,
        id: i64,
        update: &StatusUpdate,
    ) -> Result<ArticleStatus, ApiError>;
    async fn mark_all_read(&self, feed_id: Option<i64>) -> Result<MarkAllReadResponse, ApiError>;

    async fn list_feeds(&self) -> Result<Vec<Feed>, ApiError>;
    async fn add_feed(&self, feed: &FeedCreate) -> Result<Feed, ApiError>;
    async fn delete_feed(&self, feed_id: i64) -> Result<(), ApiError>;
    async fn refresh_feed(&self, feed_id: i64) -> Result<Ack, ApiError>;
    async fn refresh_all_feeds(&self) -> Result<Ack, ApiError>;

    async fn get_preferences(&self) -> Result<Preferences, ApiError>;
    async fn put_preferences(&self, preferences: &Preferences) -> Result<Preferences, ApiError>;
}

#[derive(Clone)]
pub struct HttpApi {
    client: Client,
    base: Url,
    credentials: Arc<dyn CredentialProvider>,
}

#[derive(Deserialize)]
struct ErrorBody {
    detail: serde_json::Value,
}

impl HttpApi {
    pub fn new(config: &ApiConfig, credentials: Arc<dyn CredentialProvider>) -> Result<Self, ApiError> {
        let client = ClientBuilder::new()
            .timeout(config.request_timeout())
            .user_agent(config.user_agent.clone())
            .build()?;
        Self::with_client(client, &config.base_url, credentials)
    }

    pub fn with_client(
        client: Client,
        base_url: &str,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self, ApiError> {
        let mut base = Url::parse(base_url)?;
        // Url::join drops the last path segment unless it ends with a slash.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self {
            client,
            base,
            credentials,
        })
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, ApiError> {
        let url = self.base.join(path)?;
        let mut request = self.client.request(method, url);
        if let Some(token) = self.credentials.token() {
            request = request.bearer_auth(token);
        }
        Ok(request)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        let response = request.send().await?;
        let status = response.status();
        debug!(%status, url = %response.url(), "api response");
        let bytes = response.bytes().await?;

        if status == StatusCode::UNAUTHORIZED {
            return Err(ApiError::Unauthorized);
        }
        if !status.is_success() {
            let detail = serde_json::from_slice::<ErrorBody>(&bytes)
                .ok()
                .map(|body| match body.detail {
                    serde_json::Value::String(text) => text,
                    other => other.to_string(),
                });
            return Err(ApiError::Status {
                status: status.as_u16(),
                detail,
            });
        }
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl FeedApi for HttpApi {
    async fn list_articles(&self, query: &ArticleQuery) -> Result<ArticleListResponse, ApiError> {
        let request = self
            .request(Method::GET, "articles")?
            .query(&query.params());
        self.send(request).await
    }

    async fn search_articles(
        &self,
        query: &str,
        skip: u32,
        limit: u32,
    ) -> Result<ArticlePage, ApiError> {
        let request = self.request(Method::GET, "articles/search")?.query(&[
            ("q", query.to_string()),
            ("skip", skip.to_string()),
            ("limit", limit.to_string()),
        ]);
        self.send(request).await
    }

    async fn get_article(&self, id: i64) -> Result<Article, ApiError> {
        let request = self.request(Method::GET, &format!("articles/{id}"))?;
        self.send(request).await
    }

    async fn get_article_content(&self, id: i64) -> Result<ArticleContent, ApiError> {
        let request = self.request(Method::GET, &format!("articles/{id}/content"))?;
        self.send(request).await
    }

    async fn update_article_status(
        &self,
        id: i64,
        update: &StatusUpdate,
    ) -> Result<ArticleStatus, ApiError> {
        let request = self
            .request(Method::PATCH, &format!("articles/{id}/status"))?
            .json(update);
        self.send(request).await
    }

    async fn mark_all_read(&self, feed_id: Option<i64>) -> Result<MarkAllReadResponse, ApiError> {
        let mut request = self.request(Method::POST, "articles/mark-all-read")?;
        if let Some(feed_id) = feed_id {
            request = request.query(&[("feed_id", feed_id)]);
        }
        self.send(request).await
    }

    async fn list_feeds(&self) -> Result<Vec<Feed>, ApiError> {
        let request = self.request(Method::GET, "feeds")?;
        self.send(request).await
    }

    async fn add_feed(&self, feed: &FeedCreate) -> Result<Feed, ApiError> {
        let request = self.request(Method::POST, "feeds")?.json(feed);
        self.send(request).await
    }

    async fn delete_feed(&self, feed_id: i64) -> Result<(), ApiError> {
        let request = self.request(Method::DELETE, &format!("feeds/{feed_id}"))?;
        self.send::<Ack>(request).await.map(|_| ())
    }

    async fn refresh_feed(&self, feed_id: i64) -> Result<Ack, ApiError> {
        let request = self.request(Method::POST, &format!("feeds/{feed_id}/refresh"))?;
        self.send(request).await
    }

    async fn refresh_all_feeds(&self) -> Result<Ack, ApiError> {
        let request = self.request(Method::POST, "feeds/refresh-all")?;
        self.send(request).await
    }

    async fn get_preferences(&self) -> Result<Preferences, ApiError> {
        let request = self.request(Method::GET, "preferences")?;
        self.send(request).await
    }

    async fn put_preferences(&self, preferences: &Preferences) -> Result<Preferences, ApiError> {
        let request = self.request(Method::PUT, "preferences")?.json(preferences);
        self.send(request).await
    }
}
