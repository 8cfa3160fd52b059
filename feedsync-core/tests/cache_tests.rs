use std::sync::Arc;
use std::time::Duration;

use feedsync_core::{
    ArticleQuery, ArticleScope, ArticleStore, HttpApi, MergeMode, SyncError, TokenStore,
};
use reqwest::Client;
use serde_json::{json, Value};
use wiremock::matchers::{method, path, query_param};
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
        "read_position": 0,
        "published_at": "2024-10-21T07:28:00"
    })
}

fn page(items: Vec<Value>) -> Value {
    let total = items.len();
    json!({
        "data": items,
        "total": total,
        "page": 1,
        "totalPages": 1,
        "hasMore": false
    })
}

fn store_for(server: &MockServer) -> ArticleStore {
    let credentials = Arc::new(TokenStore::new(Some("secret".into())));
    let api = HttpApi::with_client(
        Client::new(),
        &format!("{}/api", server.uri()),
        credentials.clone(),
    )
    .unwrap();
    ArticleStore::new(Arc::new(api), credentials, Duration::from_secs(60))
}

#[tokio::test]
async fn second_read_within_window_is_served_locally() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/articles"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(vec![
            article(1, 7),
            article(2, 7),
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let store = store_for(&server);
    let query = ArticleQuery::new(ArticleScope::All).page(0, 10);

    let first = store
        .fetch(query.clone(), MergeMode::Replace, false)
        .await
        .unwrap();
    let second = store.fetch(query, MergeMode::Replace, false).await.unwrap();

    assert_eq!(first.data.len(), 2);
    assert_eq!(first, second);
    assert!(store.is_fresh(ArticleScope::All).await);
}

#[tokio::test]
async fn concurrent_reads_share_one_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/articles"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(page(vec![article(1, 7)]))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let store = store_for(&server);
    let query = ArticleQuery::new(ArticleScope::Unread).page(0, 10);

    let reads = (0..5).map(|_| store.fetch(query.clone(), MergeMode::Replace, false));
    let results = futures_util::future::join_all(reads).await;

    let first = results[0].as_ref().unwrap();
    for result in &results {
        assert_eq!(result.as_ref().unwrap(), first);
    }
}

#[tokio::test]
async fn failed_fetch_keeps_cached_entries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/articles"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(vec![article(1, 7)])))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/articles"))
        .respond_with(
            ResponseTemplate::new(500).set_body_json(json!({"detail": "database unavailable"})),
        )
        .mount(&server)
        .await;

    let store = store_for(&server);
    let query = ArticleQuery::new(ArticleScope::All).page(0, 10);
    store
        .fetch(query.clone(), MergeMode::Replace, false)
        .await
        .unwrap();

    let err = store
        .fetch(query.clone(), MergeMode::Replace, true)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("database unavailable"));
    assert_eq!(store.scope_snapshot(ArticleScope::All).await.len(), 1);

    // The failed request released its handle, so a new one is issued.
    assert!(store.fetch(query, MergeMode::Replace, true).await.is_err());
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn flat_array_is_normalised_into_a_page() {
    let server = MockServer::start().await;
    let items: Vec<Value> = (1..=10).map(|id| article(id, 3)).collect();
    Mock::given(method("GET"))
        .and(path("/api/articles"))
        .and(query_param("limit", "10"))
        .respond_with(ResponseTemplate::new(200).set_body_json(Value::Array(items)))
        .mount(&server)
        .await;

    let store = store_for(&server);
    let page = store
        .fetch(
            ArticleQuery::new(ArticleScope::Feed(3)).page(0, 10),
            MergeMode::Replace,
            false,
        )
        .await
        .unwrap();

    assert_eq!(page.data.len(), 10);
    assert_eq!(page.total, 10);
    assert_eq!(page.page, 1);
    assert_eq!(page.total_pages, 1);
    assert!(page.has_more);
}

#[tokio::test]
async fn invalidation_sends_the_next_read_to_the_network() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/articles"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(vec![article(1, 7)])))
        .expect(2)
        .mount(&server)
        .await;

    let store = store_for(&server);
    let query = ArticleQuery::new(ArticleScope::All).page(0, 10);
    store
        .fetch(query.clone(), MergeMode::Replace, false)
        .await
        .unwrap();
    store.invalidate(ArticleScope::All).await;
    assert!(!store.is_fresh(ArticleScope::All).await);
    store.fetch(query, MergeMode::Replace, false).await.unwrap();
}

#[tokio::test]
async fn load_more_merges_without_duplicates() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/articles"))
        .and(query_param("skip", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(vec![
            article(1, 7),
            article(2, 7),
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/articles"))
        .and(query_param("skip", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(vec![
            article(2, 7),
            article(3, 7),
        ])))
        .mount(&server)
        .await;

    let store = store_for(&server);
    store
        .fetch(
            ArticleQuery::new(ArticleScope::All).page(0, 2),
            MergeMode::Replace,
            false,
        )
        .await
        .unwrap();
    store
        .fetch(
            ArticleQuery::new(ArticleScope::All).page(2, 2),
            MergeMode::Merge,
            false,
        )
        .await
        .unwrap();

    let ids: Vec<i64> = store
        .scope_snapshot(ArticleScope::All)
        .await
        .iter()
        .map(|a| a.id)
        .collect();
    assert_eq!(ids, vec![1, 2, 3]);
}

#[tokio::test]
async fn rejected_credential_is_reported_as_unauthorized() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/articles"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let store = store_for(&server);
    let err = store
        .fetch(ArticleQuery::new(ArticleScope::All), MergeMode::Replace, false)
        .await
        .unwrap_err();
    assert!(err.is_unauthorized());
    assert!(!matches!(err, SyncError::Unauthenticated));
}

#[tokio::test]
async fn badge_counts_come_from_listing_totals() {
    let server = MockServer::start().await;
    for (param, value, total) in [
        ("is_favorite", "true", 4),
        ("read_later", "true", 2),
        ("is_read", "false", 9),
    ] {
        Mock::given(method("GET"))
            .and(path("/api/articles"))
            .and(query_param(param, value))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [article(1, 7)],
                "total": total,
                "page": 1,
                "total_pages": total,
                "has_more": true
            })))
            .mount(&server)
            .await;
    }

    let store = store_for(&server);
    let badges = store.fetch_badge_counts().await.unwrap();
    assert_eq!(badges.favorites, 4);
    assert_eq!(badges.read_later, 2);
    assert_eq!(badges.unread, 9);
}
