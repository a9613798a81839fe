//! Integration tests for the feed cache controller over a real SQLite store.
//!
//! Each test creates its own in-memory database. The remote side is either
//! an in-process paged source or a wiremock HTTP backend.

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use localfeed::feed::{
    AppLifecycle, FeedCacheController, FeedServices, FeedSettings, NoScratch, UserAnnotationCache,
};
use localfeed::remote::{
    HttpBackend, LookupError, PaginationCursor, RemoteError, RemoteFeedSource, RemotePage,
    UserDirectory,
};
use localfeed::storage::{Database, FeedItem, FeedOrdering, LocalFeedStore, UserAnnotation};

/// Serves a fixed item list page by page; the cursor is the next offset.
struct PagedSource {
    items: Vec<FeedItem>,
    calls: AtomicUsize,
}

impl PagedSource {
    fn new(items: Vec<FeedItem>) -> Arc<Self> {
        Arc::new(Self {
            items,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl RemoteFeedSource for PagedSource {
    async fn fetch_page(
        &self,
        _filter_key: &str,
        _ordering: FeedOrdering,
        page_size: usize,
        after: Option<&PaginationCursor>,
    ) -> Result<RemotePage, RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let start = after
            .and_then(|c| c.as_str().parse::<usize>().ok())
            .unwrap_or(0)
            .min(self.items.len());
        let end = (start + page_size).min(self.items.len());
        Ok(RemotePage {
            items: self.items[start..end].to_vec(),
            next_cursor: (end > start).then(|| PaginationCursor::new(end.to_string())),
            skipped: 0,
        })
    }
}

struct StaticDirectory;

#[async_trait]
impl UserDirectory for StaticDirectory {
    async fn fetch_user(&self, user_id: &str) -> Result<UserAnnotation, LookupError> {
        Ok(annotation_for(user_id))
    }
}

fn annotation_for(user_id: &str) -> UserAnnotation {
    UserAnnotation {
        display_name: format!("Resident {user_id}"),
        avatar_url: Some(format!("https://cdn.example.com/{user_id}.png")),
        role: "citizen".to_string(),
    }
}

fn item(id: &str, created_at: i64) -> FeedItem {
    FeedItem {
        id: id.to_string(),
        filter_key: String::new(),
        owner_id: "u1".to_string(),
        body: format!("News {id}"),
        created_at,
        like_count: 0,
        comment_count: 0,
        media_urls: Vec::new(),
        annotation: None,
    }
}

async fn controller_over(
    remote: Arc<dyn RemoteFeedSource>,
    directory: Arc<dyn UserDirectory>,
    page_size: usize,
    max_cached_items: usize,
) -> (FeedCacheController, Database) {
    let db = Database::open(":memory:").await.unwrap();
    let services = FeedServices {
        remote,
        store: Arc::new(db.clone()),
        annotations: Arc::new(UserAnnotationCache::new(directory, 100)),
        freshness: Arc::new(AppLifecycle::new()),
        scratch: Arc::new(NoScratch),
    };
    let settings = FeedSettings {
        page_size,
        max_cached_items,
        cache_expiry_minutes: 30,
    };
    (
        FeedCacheController::new(settings, FeedOrdering::Recent, services),
        db,
    )
}

async fn scroll_to_end(controller: &FeedCacheController, db: &Database, key: &str) {
    let visible = db.fetch_all(key, FeedOrdering::Recent).await.unwrap();
    let last = visible.last().cloned().unwrap();
    controller
        .load_more_if_needed(key, &last, &visible)
        .await
        .unwrap();
}

async fn ids(db: &Database, key: &str) -> Vec<String> {
    db.fetch_all(key, FeedOrdering::Recent)
        .await
        .unwrap()
        .into_iter()
        .map(|i| i.id)
        .collect()
}

// ============================================================================
// Pagination
// ============================================================================

#[tokio::test]
async fn test_locality_scenario_two_pages() {
    let source = PagedSource::new(vec![item("n1", 100), item("n2", 90), item("n3", 80)]);
    let (controller, db) = controller_over(source.clone(), Arc::new(StaticDirectory), 2, 50).await;

    controller.initial_load("560001").await.unwrap();
    assert_eq!(ids(&db, "560001").await, vec!["n1", "n2"]);
    assert!(controller.status().has_more_content);

    scroll_to_end(&controller, &db, "560001").await;

    assert_eq!(ids(&db, "560001").await, vec!["n1", "n2", "n3"]);
    assert!(!controller.status().has_more_content);
    assert_eq!(source.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_first_page_is_exactly_remote_page() {
    let source = PagedSource::new((0..25).map(|i| item(&format!("n{i:02}"), 1000 - i)).collect());
    let (controller, db) = controller_over(source, Arc::new(StaticDirectory), 10, 50).await;

    // Stale rows from an earlier session are replaced, not merged
    db.append_scope("k", &[item("stale", 5000)]).await.unwrap();

    controller.initial_load("k").await.unwrap();

    let expected: Vec<String> = (0..10).map(|i| format!("n{i:02}")).collect();
    assert_eq!(ids(&db, "k").await, expected);
}

#[tokio::test]
async fn test_eviction_keeps_five_most_recent() {
    let source = PagedSource::new(vec![
        item("a", 800),
        item("b", 700),
        item("c", 600),
        item("d", 500),
        item("e", 400),
        item("f", 300),
        item("g", 200),
        item("h", 100),
    ]);
    let (controller, db) = controller_over(source, Arc::new(StaticDirectory), 4, 5).await;

    controller.initial_load("k").await.unwrap();
    scroll_to_end(&controller, &db, "k").await;

    assert_eq!(ids(&db, "k").await, vec!["a", "b", "c", "d", "e"]);
    assert_eq!(db.count("k").await.unwrap(), 5);
}

#[tokio::test]
async fn test_appended_item_round_trips() {
    let mut rich = item("n3", 80);
    rich.owner_id = "u7".to_string();
    rich.body = "Ward 12 water supply restored".to_string();
    rich.like_count = 42;
    rich.comment_count = 7;
    rich.media_urls = vec![
        "https://cdn.example.com/a.jpg".to_string(),
        "https://cdn.example.com/b.mp4".to_string(),
    ];

    let source = PagedSource::new(vec![item("n1", 100), item("n2", 90), rich.clone()]);
    let (controller, db) = controller_over(source, Arc::new(StaticDirectory), 2, 50).await;

    controller.initial_load("560001").await.unwrap();
    scroll_to_end(&controller, &db, "560001").await;

    let stored = db.fetch_all("560001", FeedOrdering::Recent).await.unwrap();
    let expected = FeedItem {
        filter_key: "560001".to_string(),
        annotation: Some(annotation_for("u7")),
        ..rich
    };
    assert_eq!(stored[2], expected);
}

#[tokio::test]
async fn test_filter_keys_are_isolated() {
    let source = PagedSource::new(vec![item("n1", 100), item("n2", 90)]);
    let (controller, db) = controller_over(source, Arc::new(StaticDirectory), 10, 50).await;

    controller.initial_load("560001").await.unwrap();
    controller.initial_load("560002").await.unwrap();

    // Same ids moved to the newer scope by upsert
    assert_eq!(ids(&db, "560002").await, vec!["n1", "n2"]);
    assert!(ids(&db, "560001").await.is_empty());
}

// ============================================================================
// HTTP backend end to end
// ============================================================================

#[tokio::test]
async fn test_http_backend_pagination() {
    use wiremock::matchers::{method, path, query_param, query_param_is_missing};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/feeds/560001/items"))
        .and(query_param_is_missing("after"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"documents": [
                {"id": "n1", "owner_id": "u1", "body": "Road repaired", "created_at": 100},
                {"id": "n2", "owner_id": "u2", "body": "Market day", "created_at": 90},
                {"broken": true}
            ], "next_cursor": "n2"}"#,
        ))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/feeds/560001/items"))
        .and(query_param("after", "n2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"documents": [
                {"id": "n3", "owner_id": "u1", "body": "Power cut tonight", "created_at": 80}
            ], "next_cursor": null}"#,
        ))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/users/u1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(r#"{"display_name": "Asha", "role": "reporter"}"#),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/users/u2"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let backend = Arc::new(HttpBackend::new(reqwest::Client::new(), &server.uri(), None).unwrap());
    let (controller, db) = controller_over(backend.clone(), backend, 2, 50).await;

    controller.initial_load("560001").await.unwrap();
    scroll_to_end(&controller, &db, "560001").await;

    let stored = db.fetch_all("560001", FeedOrdering::Recent).await.unwrap();
    let stored_ids: Vec<&str> = stored.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(stored_ids, vec!["n1", "n2", "n3"]);
    assert_eq!(stored[0].annotation.as_ref().unwrap().display_name, "Asha");
    assert!(stored[1].annotation.is_none());
    assert!(!controller.status().has_more_content);
}

#[tokio::test]
async fn test_http_page_with_undecodable_document_keeps_paginating() {
    use wiremock::matchers::{method, path, query_param, query_param_is_missing};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/feeds/560001/items"))
        .and(query_param_is_missing("after"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"documents": [
                {"id": "n1", "owner_id": "u1", "body": "Road repaired", "created_at": 100},
                {"id": 42, "created_at": "yesterday"}
            ], "next_cursor": "n1"}"#,
        ))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/feeds/560001/items"))
        .and(query_param("after", "n1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"documents": [
                {"id": "n2", "owner_id": "u1", "body": "Market day", "created_at": 90}
            ], "next_cursor": null}"#,
        ))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/users/u1"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let backend = Arc::new(HttpBackend::new(reqwest::Client::new(), &server.uri(), None).unwrap());
    let (controller, db) = controller_over(backend.clone(), backend, 2, 50).await;

    controller.initial_load("560001").await.unwrap();
    assert!(controller.status().has_more_content);

    scroll_to_end(&controller, &db, "560001").await;
    assert_eq!(ids(&db, "560001").await, vec!["n1", "n2"]);
    assert!(!controller.status().has_more_content);
}

#[tokio::test]
async fn test_http_failure_surfaces_and_keeps_cache() {
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    let source = PagedSource::new(vec![item("n1", 100), item("n2", 90)]);
    let (controller, db) = controller_over(source, Arc::new(StaticDirectory), 2, 50).await;
    controller.initial_load("k").await.unwrap();

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    let backend = Arc::new(HttpBackend::new(reqwest::Client::new(), &server.uri(), None).unwrap());

    // A second controller sharing the same database, failing remotely
    let services = FeedServices {
        remote: backend.clone(),
        store: Arc::new(db.clone()),
        annotations: Arc::new(UserAnnotationCache::new(backend, 10)),
        freshness: Arc::new(AppLifecycle::new()),
        scratch: Arc::new(NoScratch),
    };
    let failing = FeedCacheController::new(FeedSettings::default(), FeedOrdering::Recent, services);

    assert!(failing.refresh("k").await.is_err());
    assert!(failing.status().last_error.is_some());
    assert!(!failing.status().is_loading);
    assert_eq!(ids(&db, "k").await, vec!["n1", "n2"]);
}

// ============================================================================
// Size bound property
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_cache_never_exceeds_bound(
        total in 0usize..60,
        page_size in 1usize..8,
        max_cached in 1usize..20,
        scrolls in 0usize..10,
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let count = runtime.block_on(async {
            let items: Vec<FeedItem> = (0..total)
                .map(|i| item(&format!("n{i}"), 10_000 - i as i64))
                .collect();
            let (controller, db) =
                controller_over(PagedSource::new(items), Arc::new(StaticDirectory), page_size, max_cached)
                    .await;

            controller.initial_load("k").await.unwrap();
            for _ in 0..scrolls {
                let visible = db.fetch_all("k", FeedOrdering::Recent).await.unwrap();
                let Some(last) = visible.last().cloned() else { break };
                controller.load_more_if_needed("k", &last, &visible).await.unwrap();
            }
            db.count("k").await.unwrap()
        });

        let bound = max_cached.max(page_size);
        prop_assert!(count as usize <= bound);
    }
}
