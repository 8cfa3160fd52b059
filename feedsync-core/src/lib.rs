pub mod api;
pub mod article;
pub mod auto_refresh;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod credentials;
pub mod error;
pub mod event;
pub mod feed;
pub mod models;
pub mod notice;
pub mod optimistic;
pub mod preferences;
pub mod push;
pub mod router;
pub mod session;
pub mod unread;

pub use api::{FeedApi, HttpApi};
pub use article::{ArticleQuery, ArticleScope, ArticleStore, BadgeCounts, PageInfo};
pub use auto_refresh::{spawn_auto_refresh, AutoRefreshHandle};
pub use cache::{Cacheable, EntrySet, MergeMode};
pub use config::SyncConfig;
pub use coordinator::RequestCoordinator;
pub use credentials::{CredentialProvider, TokenStore};
pub use error::{ApiError, ConfigError, PushError, SyncError};
pub use event::PushEvent;
pub use feed::FeedStore;
pub use models::{
    Article, ArticlePage, ArticleStatus, Feed, FeedCategory, FeedCreate, Preferences, SortOrder,
    StatusUpdate,
};
pub use notice::{Notice, NoticeLevel, NoticeSink};
pub use optimistic::OptimisticDelta;
pub use preferences::PreferencesStore;
pub use push::{ConnectionState, PushChannel, PushOptions};
pub use router::{spawn_router, EventRouter, RouterHandle};
pub use session::Session;
pub use unread::UnreadCounters;
