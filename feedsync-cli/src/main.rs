use std::sync::Arc;

use feedsync_core::{ArticleScope, CredentialProvider, Notice, Session, SyncConfig, TokenStore};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const TOKEN_VAR: &str = "FEEDSYNC_TOKEN";
const CONFIG_VAR: &str = "FEEDSYNC_CONFIG";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = load_config();
    let token = std::env::var(TOKEN_VAR).ok();
    if token.is_none() {
        warn!("{TOKEN_VAR} is not set; nothing will be synchronised");
    }
    let credentials = Arc::new(TokenStore::new(token));

    let (notice_tx, mut notices) = mpsc::unbounded_channel::<Notice>();
    let mut session = Session::new(config, credentials, Arc::new(notice_tx))?;
    session.start().await?;
    print_overview(&session).await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, shutting down");
                break;
            }
            notice = notices.recv() => match notice {
                Some(notice) => println!("{notice}"),
                None => break,
            },
        }
    }

    session.shutdown().await;
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn load_config() -> SyncConfig {
    match std::env::var(CONFIG_VAR) {
        Ok(path) => SyncConfig::from_file(&path).unwrap_or_else(|e| {
            warn!(error = %e, %path, "could not read configuration, using defaults");
            SyncConfig::default()
        }),
        Err(_) => SyncConfig::load(),
    }
}

async fn print_overview(session: &Session) {
    if !session.credentials().has_token() {
        return;
    }
    match session.feeds().fetch(false).await {
        Ok(feeds) => {
            println!("{} subscriptions", feeds.len());
            for feed in &feeds {
                println!("  [{}] {}", feed.feed_id, feed.display_title());
            }
        }
        Err(e) => warn!(error = %e, "could not load feeds"),
    }
    match session.load_articles(ArticleScope::Unread, 0, 10, false).await {
        Ok(page) => {
            println!("{} unread articles", page.total);
            for article in &page.data {
                println!("  {} ({})", article.title, article.feed_title);
            }
        }
        Err(e) => warn!(error = %e, "could not load unread articles"),
    }
}
