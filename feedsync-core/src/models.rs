use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::cache::Cacheable;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Article {
    pub id: i64,
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default, deserialize_with = "lenient_datetime")]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub guid: Option<String>,
    pub feed_id: i64,
    #[serde(default)]
    pub feed_title: String,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub is_favorite: bool,
    #[serde(default)]
    pub read_later: bool,
    #[serde(default)]
    pub read_position: i64,
    #[serde(default, deserialize_with = "lenient_datetime")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_datetime")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Article {
    pub fn status(&self) -> ArticleStatus {
        ArticleStatus {
            article_id: self.id,
            is_read: self.is_read,
            is_favorite: self.is_favorite,
            read_later: self.read_later,
            read_position: self.read_position,
        }
    }

    /// Overlays the fields present in `update`.
    pub fn apply_update(&mut self, update: &StatusUpdate) {
        if let Some(v) = update.is_read {
            self.is_read = v;
        }
        if let Some(v) = update.is_favorite {
            self.is_favorite = v;
        }
        if let Some(v) = update.read_later {
            self.read_later = v;
        }
        if let Some(v) = update.read_position {
            self.read_position = v;
        }
    }

    pub fn apply_status(&mut self, status: &ArticleStatus) {
        self.is_read = status.is_read;
        self.is_favorite = status.is_favorite;
        self.read_later = status.read_later;
        self.read_position = status.read_position;
    }
}

impl Cacheable for Article {
    type Key = i64;

    fn cache_key(&self) -> i64 {
        self.id
    }
}

/// Body of `PATCH /articles/{id}/status`; absent fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_read: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_favorite: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_later: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_position: Option<i64>,
}

impl StatusUpdate {
    pub fn read(is_read: bool) -> Self {
        Self {
            is_read: Some(is_read),
            ..Self::default()
        }
    }

    pub fn favorite(is_favorite: bool) -> Self {
        Self {
            is_favorite: Some(is_favorite),
            ..Self::default()
        }
    }

    pub fn read_later(read_later: bool) -> Self {
        Self {
            read_later: Some(read_later),
            ..Self::default()
        }
    }

    pub fn position(read_position: i64) -> Self {
        Self {
            read_position: Some(read_position),
            ..Self::default()
        }
    }
}

/// Authoritative per-user status returned by the server after a status change.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArticleStatus {
    pub article_id: i64,
    pub is_read: bool,
    pub is_favorite: bool,
    pub read_later: bool,
    pub read_position: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ArticlePage {
    pub data: Vec<Article>,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub page: u32,
    #[serde(default, alias = "totalPages")]
    pub total_pages: u32,
    #[serde(default, alias = "hasMore")]
    pub has_more: bool,
}

/// `GET /articles` answers either with a paginated envelope or a bare array.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ArticleListResponse {
    Paginated(ArticlePage),
    Flat(Vec<Article>),
}

impl ArticleListResponse {
    pub fn into_page(self, skip: u32, limit: Option<u32>) -> ArticlePage {
        match self {
            ArticleListResponse::Paginated(page) => page,
            ArticleListResponse::Flat(data) => {
                let limit = limit.filter(|l| *l > 0).unwrap_or(10);
                let has_more = data.len() == limit as usize;
                ArticlePage {
                    total: data.len() as u64,
                    page: skip / limit + 1,
                    total_pages: 1,
                    has_more,
                    data,
                }
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArticleContent {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MarkAllReadResponse {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub count: u64,
}

/// Generic `{message}` acknowledgement of fire-and-forget endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Ack {
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FeedCategory {
    News,
    Tech,
    Design,
    Business,
    Entertainment,
    Sports,
    Science,
    Health,
    Blog,
    #[default]
    Other,
}

/// A subscription as listed by `GET /feeds`.
///
/// `POST /feeds` answers with a reduced shape (no subscription id, `feed_category`),
/// which also decodes into this type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Feed {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub title_override: Option<String>,
    #[serde(default, alias = "feed_category")]
    pub category: FeedCategory,
    #[serde(default, deserialize_with = "lenient_datetime")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_datetime")]
    pub updated_at: Option<DateTime<Utc>>,
    pub feed_id: i64,
    pub feed_title: String,
    pub feed_url: String,
    #[serde(default)]
    pub feed_description: Option<String>,
    #[serde(default)]
    pub feed_website_url: Option<String>,
    #[serde(default)]
    pub feed_image_url: Option<String>,
    #[serde(default, deserialize_with = "lenient_datetime")]
    pub feed_last_fetched: Option<DateTime<Utc>>,
}

impl Feed {
    pub fn display_title(&self) -> &str {
        self.title_override
            .as_deref()
            .filter(|t| !t.is_empty())
            .unwrap_or(&self.feed_title)
    }
}

impl Cacheable for Feed {
    type Key = i64;

    fn cache_key(&self) -> i64 {
        self.feed_id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedCreate {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<FeedCategory>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Newest,
    Oldest,
    Source,
}

impl SortOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            SortOrder::Newest => "newest",
            SortOrder::Oldest => "oldest",
            SortOrder::Source => "source",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Preferences {
    pub font_size: u32,
    pub latest_articles_days: u32,
    pub notifications_enabled: bool,
    pub auto_refresh_enabled: bool,
    /// Minutes between background refreshes of all feeds.
    pub refresh_interval: u32,
    pub default_sorting: SortOrder,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            font_size: 100,
            latest_articles_days: 7,
            notifications_enabled: true,
            auto_refresh_enabled: true,
            refresh_interval: 60,
            default_sorting: SortOrder::Newest,
        }
    }
}

// The API emits naive ISO-8601 timestamps; they are UTC.
fn lenient_datetime<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    let Some(raw) = raw else {
        return Ok(None);
    };
    if let Ok(dt) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(Some(dt.with_timezone(&Utc)));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| Some(naive.and_utc()))
        .map_err(serde::de::Error::custom)
}
