use std::sync::Arc;
use std::time::Duration;

use feedsync_core::{
    Article, ArticleQuery, ArticleScope, ArticleStore, HttpApi, MergeMode, StatusUpdate,
    SyncError, TokenStore,
};
use reqwest::Client;
use serde_json::{json, Value};
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn article(id: i64, feed_id: i64) -> Value {
    json!({
        "id": id,
        "title": format!("Article {id}"),
        "url": format!("https://example.com/{id}"),
        "feed_id": feed_id,
        "feed_title": "Rust Blog",
        "is_read": false,
        "is_favorite": false,
        "read_later": false,
        "read_position": 0
    })
}

fn store_with_token(server: &MockServer, token: Option<&str>) -> ArticleStore {
    let credentials = Arc::new(TokenStore::new(token.map(str::to_owned)));
    let api = HttpApi::with_client(
        Client::new(),
        &format!("{}/api/", server.uri()),
        credentials.clone(),
    )
    .unwrap();
    ArticleStore::new(Arc::new(api), credentials, Duration::from_secs(60))
}

async fn seeded_store(server: &MockServer, items: Vec<Value>) -> ArticleStore {
    Mock::given(method("GET"))
        .and(path("/api/articles"))
        .respond_with(ResponseTemplate::new(200).set_body_json(Value::Array(items)))
        .mount(server)
        .await;
    let store = store_with_token(server, Some("secret"));
    store
        .fetch(ArticleQuery::new(ArticleScope::All), MergeMode::Replace, false)
        .await
        .unwrap();
    store
}

#[tokio::test]
async fn local_change_is_visible_before_the_server_answers() {
    let server = MockServer::start().await;
    let store = seeded_store(&server, vec![article(1, 7)]).await;
    Mock::given(method("PATCH"))
        .and(path("/api/articles/1/status"))
        .and(body_json(json!({"is_favorite": true})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({
                    "article_id": 1,
                    "is_read": false,
                    "is_favorite": true,
                    "read_later": false,
                    "read_position": 0
                }))
                .set_delay(Duration::from_millis(300)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let background = store.clone();
    let pending =
        tokio::spawn(async move { background.update_status(1, StatusUpdate::favorite(true)).await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!pending.is_finished());
    assert!(store.article(1).await.unwrap().is_favorite);

    let status = pending.await.unwrap().unwrap();
    assert!(status.is_favorite);
    assert!(store.article(1).await.unwrap().is_favorite);
}

#[tokio::test]
async fn rejected_change_is_replaced_by_the_server_copy() {
    let server = MockServer::start().await;
    let store = seeded_store(&server, vec![article(1, 7)]).await;
    Mock::given(method("PATCH"))
        .and(path("/api/articles/1/status"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    let mut canonical = article(1, 7);
    canonical["read_position"] = json!(42);
    canonical["read_later"] = json!(true);
    Mock::given(method("GET"))
        .and(path("/api/articles/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(canonical))
        .expect(1)
        .mount(&server)
        .await;

    let result = store.update_status(1, StatusUpdate::favorite(true)).await;
    assert!(matches!(result, Err(SyncError::Api(_))));

    let cached = store.article(1).await.unwrap();
    assert!(!cached.is_favorite);
    assert!(cached.read_later);
    assert_eq!(cached.read_position, 42);
}

#[tokio::test]
async fn failed_recovery_marks_the_holding_scopes_stale() {
    let server = MockServer::start().await;
    let store = seeded_store(&server, vec![article(1, 7), article(2, 7)]).await;
    Mock::given(method("PATCH"))
        .and(path("/api/articles/2/status"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/articles/2"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    assert!(store.is_fresh(ArticleScope::All).await);
    assert!(store
        .update_status(2, StatusUpdate::read(true))
        .await
        .is_err());
    assert!(!store.is_fresh(ArticleScope::All).await);
}

#[tokio::test]
async fn change_of_an_uncached_article_still_reaches_the_server() {
    let server = MockServer::start().await;
    let store = seeded_store(&server, vec![article(1, 7)]).await;
    Mock::given(method("PATCH"))
        .and(path("/api/articles/99/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "article_id": 99,
            "is_read": true,
            "is_favorite": false,
            "read_later": false,
            "read_position": 0
        })))
        .expect(1)
        .mount(&server)
        .await;

    let status = store.update_status(99, StatusUpdate::read(true)).await.unwrap();
    assert!(status.is_read);
    assert!(store.article(99).await.is_none());
}

fn decoded(value: Value) -> Article {
    serde_json::from_value(value).unwrap()
}

#[tokio::test]
async fn confirmed_change_of_an_evicted_article_is_not_reinserted() {
    let server = MockServer::start().await;
    let store = seeded_store(&server, vec![article(1, 7), article(2, 7)]).await;
    Mock::given(method("PATCH"))
        .and(path("/api/articles/1/status"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({
                    "article_id": 1,
                    "is_read": true,
                    "is_favorite": false,
                    "read_later": false,
                    "read_position": 0
                }))
                .set_delay(Duration::from_millis(300)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let background = store.clone();
    let pending =
        tokio::spawn(async move { background.update_status(1, StatusUpdate::read(true)).await });
    tokio::time::sleep(Duration::from_millis(100)).await;
    store
        .replace_or_merge(
            ArticleScope::All,
            vec![decoded(article(2, 7))],
            MergeMode::Replace,
        )
        .await;

    assert!(pending.await.unwrap().unwrap().is_read);
    assert!(store.article(1).await.is_none());
    let cached = store.scope_snapshot(ArticleScope::All).await;
    assert_eq!(cached.len(), 1);
    assert_eq!(cached[0].id, 2);
    assert!(!cached[0].is_read);
}

#[tokio::test]
async fn rejected_change_of_an_evicted_article_is_not_reinserted() {
    let server = MockServer::start().await;
    let store = seeded_store(&server, vec![article(1, 7)]).await;
    Mock::given(method("PATCH"))
        .and(path("/api/articles/1/status"))
        .respond_with(ResponseTemplate::new(500).set_delay(Duration::from_millis(300)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/articles/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(article(1, 7)))
        .expect(1)
        .mount(&server)
        .await;

    let background = store.clone();
    let pending =
        tokio::spawn(async move { background.update_status(1, StatusUpdate::favorite(true)).await });
    tokio::time::sleep(Duration::from_millis(100)).await;
    store
        .replace_or_merge(ArticleScope::All, Vec::new(), MergeMode::Replace)
        .await;

    assert!(matches!(pending.await.unwrap(), Err(SyncError::Api(_))));
    assert!(store.article(1).await.is_none());
    assert!(store.scope_snapshot(ArticleScope::All).await.is_empty());
}

#[tokio::test]
async fn mark_all_read_flags_cached_articles_and_leaves_cache_stale() {
    let server = MockServer::start().await;
    let store = seeded_store(&server, vec![article(1, 7), article(2, 8)]).await;
    Mock::given(method("POST"))
        .and(path("/api/articles/mark-all-read"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"message": "Marked 2 articles as read", "count": 2})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let response = store.mark_all_read(None).await.unwrap();
    assert_eq!(response.count, 2);

    let cached = store.scope_snapshot(ArticleScope::All).await;
    assert_eq!(cached.len(), 2);
    assert!(cached.iter().all(|a| a.is_read));
    assert!(!store.is_fresh(ArticleScope::All).await);
}

#[tokio::test]
async fn mark_all_read_for_one_feed_only_touches_that_feed() {
    let server = MockServer::start().await;
    let store = seeded_store(&server, vec![article(1, 7), article(2, 8)]).await;
    Mock::given(method("POST"))
        .and(path("/api/articles/mark-all-read"))
        .and(query_param("feed_id", "7"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    assert!(store.mark_all_read(Some(7)).await.is_err());

    // No rollback on failure.
    assert!(store.article(1).await.unwrap().is_read);
    assert!(!store.article(2).await.unwrap().is_read);
}

#[tokio::test]
async fn mutation_without_credential_is_rejected_locally() {
    let server = MockServer::start().await;
    let store = store_with_token(&server, None);

    let result = store.update_status(1, StatusUpdate::read(true)).await;
    assert!(matches!(result, Err(SyncError::Unauthenticated)));
    assert!(matches!(
        store.mark_all_read(None).await,
        Err(SyncError::Unauthenticated)
    ));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn opening_an_unread_article_fetches_and_marks_it_read() {
    let server = MockServer::start().await;
    let store = store_with_token(&server, Some("secret"));
    Mock::given(method("GET"))
        .and(path("/api/articles/5"))
        .respond_with(ResponseTemplate::new(200).set_body_json(article(5, 7)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/api/articles/5/status"))
        .and(body_json(json!({"is_read": true})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "article_id": 5,
            "is_read": true,
            "is_favorite": false,
            "read_later": false,
            "read_position": 0
        })))
        .expect(1)
        .mount(&server)
        .await;

    let opened = store.open(5).await.unwrap();
    assert!(opened.is_read);
    assert_eq!(store.current().await.unwrap().id, 5);
    assert_eq!(store.scope_snapshot(ArticleScope::All).await[0].id, 5);
}
