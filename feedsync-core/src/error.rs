use std::sync::Arc;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("request rejected: missing or expired credential")]
    Unauthorized,
    #[error("server answered {status}: {}", .detail.as_deref().unwrap_or("no detail"))]
    Status { status: u16, detail: Option<String> },
    #[error("unexpected response body: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid endpoint url: {0}")]
    Url(#[from] url::ParseError),
}

/// Failure shared by every caller attached to the same request, hence `Clone`.
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    #[error(transparent)]
    Api(Arc<ApiError>),
    #[error("no credential available; sign in first")]
    Unauthenticated,
    #[error("background task failed: {0}")]
    Task(String),
}

impl From<ApiError> for SyncError {
    fn from(err: ApiError) -> Self {
        SyncError::Api(Arc::new(err))
    }
}

impl From<tokio::task::JoinError> for SyncError {
    fn from(err: tokio::task::JoinError) -> Self {
        SyncError::Task(err.to_string())
    }
}

impl SyncError {
    /// True when the server rejected the credential; the caller should sign out.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, SyncError::Api(err) if matches!(**err, ApiError::Unauthorized))
    }
}

#[derive(Debug, Error)]
pub enum PushError {
    #[error("websocket error: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("malformed push frame: {0}")]
    Frame(#[from] serde_json::Error),
    #[error("`{kind}` frame without `{field}`")]
    MissingField {
        kind: &'static str,
        field: &'static str,
    },
    #[error("invalid push url: {0}")]
    Url(#[from] url::ParseError),
    #[error("no credential available for the push channel")]
    Unauthenticated,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no configuration directory on this platform")]
    NoConfigDir,
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
}
