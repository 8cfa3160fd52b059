use serde::{Deserialize, Serialize};

use crate::error::PushError;

/// A decoded server push frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushEvent {
    ConnectionEstablished {
        message: Option<String>,
    },
    FeedProcessed {
        feed_id: i64,
        message: Option<String>,
    },
    NewArticles {
        /// Absent when the server does not attribute the articles to one subscription.
        feed_id: Option<i64>,
        count: u64,
        message: Option<String>,
    },
    Error {
        message: String,
    },
    Pong,
    /// A frame type this client does not act on.
    Unknown {
        kind: String,
    },
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    feed_id: Option<i64>,
    #[serde(default)]
    count: Option<u64>,
    #[serde(default)]
    code: Option<String>,
}

impl PushEvent {
    pub fn parse(text: &str) -> Result<Self, PushError> {
        let raw: RawFrame = serde_json::from_str(text)?;
        let event = match raw.kind.as_str() {
            "connection_established" => PushEvent::ConnectionEstablished {
                message: raw.message,
            },
            "system" if raw.code.as_deref() == Some("CONNECTION_ESTABLISHED") => {
                PushEvent::ConnectionEstablished {
                    message: raw.message,
                }
            }
            "feed_processed" => PushEvent::FeedProcessed {
                feed_id: raw.feed_id.ok_or(PushError::MissingField {
                    kind: "feed_processed",
                    field: "feed_id",
                })?,
                message: raw.message,
            },
            "new_articles" => PushEvent::NewArticles {
                feed_id: raw.feed_id,
                count: raw.count.unwrap_or(0),
                message: raw.message,
            },
            "error" => PushEvent::Error {
                message: raw
                    .message
                    .unwrap_or_else(|| "the server reported an error".into()),
            },
            "pong" => PushEvent::Pong,
            _ => PushEvent::Unknown { kind: raw.kind },
        };
        Ok(event)
    }

    pub fn kind(&self) -> &str {
        match self {
            PushEvent::ConnectionEstablished { .. } => "connection_established",
            PushEvent::FeedProcessed { .. } => "feed_processed",
            PushEvent::NewArticles { .. } => "new_articles",
            PushEvent::Error { .. } => "error",
            PushEvent::Pong => "pong",
            PushEvent::Unknown { kind } => kind,
        }
    }
}

/// Frames the client sends.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Ping,
}

impl ClientFrame {
    pub fn to_text(self) -> Result<String, PushError> {
        Ok(serde_json::to_string(&self)?)
    }
}
