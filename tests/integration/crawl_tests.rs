//! Integration tests for the catalog crawler
//!
//! These tests use wiremock to create mock HTTP servers and test the
//! crawl cycle end-to-end.

use crate::common::{
    client_pool, create_test_config, listing_page, mount_catalog_page, mount_empty_catalog,
    mount_pdf,
};
use neb_harvest::crawler::scheduler::{claim_batch, should_exit};
use neb_harvest::crawler::CatalogCrawler;
use neb_harvest::state::{Request, StateStore, TaskOutcome};
use neb_harvest::Coordinator;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn store_for(request: Request, dir: &std::path::Path) -> Arc<StateStore> {
    Arc::new(StateStore::new(
        request,
        dir.join("progress.json"),
        Duration::ZERO,
    ))
}

#[tokio::test]
async fn test_full_harvest_catalog() {
    let server = MockServer::start().await;
    let dir = tempdir().unwrap();

    mount_catalog_page(&server, "abc", 1, &["id-1", "id-2"]).await;
    mount_catalog_page(&server, "abc", 2, &["id-2", "id-3"]).await;
    mount_catalog_page(&server, "abc", 3, &["id-4"]).await;
    mount_empty_catalog(&server, "abc").await;
    for id in ["id-1", "id-2", "id-3", "id-4"] {
        mount_pdf(&server, id).await;
    }

    let config = create_test_config(&server.uri(), dir.path());
    let clients = client_pool(&config);
    let coordinator =
        Coordinator::with_client_pool(config, Request::catalog("abc"), clients, false)
            .await
            .unwrap();

    let report = coordinator.run().await.unwrap();

    assert!(report.reached_end);
    assert!(!report.has_error);
    assert!(!report.cancelled);
    assert_eq!(report.highest_page, 4);
    assert_eq!(report.discovered, 4);
    assert_eq!(report.downloaded, 4);
    assert_eq!(report.queued, 0);
    assert!(report.is_complete());

    let downloads = dir.path().join("abc").join("downloads");
    for id in ["id-1", "id-2", "id-3", "id-4"] {
        let file = downloads.join(format!("{}.pdf", id));
        assert!(file.exists(), "missing {}", file.display());
    }

    let checkpoint = std::fs::read_to_string(dir.path().join("abc").join("progress.json")).unwrap();
    let json: serde_json::Value = serde_json::from_str(&checkpoint).unwrap();
    assert_eq!(json["request"], "abc");
    assert_eq!(json["max_page_found"], 4);
    assert_eq!(json["downloaded"].as_array().unwrap().len(), 4);
    assert!(json["download_queue"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_full_harvest_search() {
    let server = MockServer::start().await;
    let dir = tempdir().unwrap();
    let phrase = "Петроградская газета 1911";

    Mock::given(method("GET"))
        .and(path("/search/"))
        .and(query_param("q", phrase))
        .and(query_param("PAGEN_1", "1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(listing_page(&["s-1", "s-2"]), "text/html"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/search/"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(listing_page(&[]), "text/html"))
        .mount(&server)
        .await;
    mount_pdf(&server, "s-1").await;
    mount_pdf(&server, "s-2").await;

    let config = create_test_config(&server.uri(), dir.path());
    let clients = client_pool(&config);
    let coordinator =
        Coordinator::with_client_pool(config, Request::search(phrase), clients, false)
            .await
            .unwrap();

    let report = coordinator.run().await.unwrap();

    assert_eq!(report.downloaded, 2);
    assert!(report.is_complete());
    assert!(dir
        .path()
        .join(format!("search_{}", phrase))
        .join("downloads")
        .join("s-1.pdf")
        .exists());
}

#[tokio::test]
async fn test_many_workers_terminate_and_dedup() {
    let server = MockServer::start().await;
    let dir = tempdir().unwrap();

    for page in 1..=6u32 {
        let first = format!("p{}-a", page);
        let shared = format!("shared-{}", page % 2);
        mount_catalog_page(&server, "multi", page, &[first.as_str(), shared.as_str()]).await;
    }
    mount_empty_catalog(&server, "multi").await;

    let mut config = create_test_config(&server.uri(), dir.path());
    config.harvest.parser_workers = 3;
    config.harvest.chunk_size = 3;

    let store = store_for(Request::catalog("multi"), dir.path());
    let crawler = Arc::new(
        CatalogCrawler::new(
            &config,
            Arc::clone(&store),
            client_pool(&config),
            CancellationToken::new(),
        )
        .unwrap(),
    );

    tokio::time::timeout(Duration::from_secs(30), crawler.run())
        .await
        .expect("crawl did not terminate")
        .unwrap();

    let state = store.access().await;
    assert!(state.no_more_pages());
    assert_eq!(state.retry_queue_len(), 0);
    for page in 1..=6 {
        assert!(state.is_processed(page), "page {} not processed", page);
    }
    // 6 unique ids plus 2 shared ones
    assert_eq!(state.pending_downloads(), 8);
    assert!(state.check_invariants().is_ok());
}

#[tokio::test]
async fn test_end_of_catalog_at_highest_page() {
    let server = MockServer::start().await;
    let dir = tempdir().unwrap();
    mount_empty_catalog(&server, "abc").await;

    let config = create_test_config(&server.uri(), dir.path());
    let store = store_for(Request::catalog("abc"), dir.path());
    let crawler = CatalogCrawler::new(
        &config,
        Arc::clone(&store),
        client_pool(&config),
        CancellationToken::new(),
    )
    .unwrap();

    let mut batch = {
        let mut state = store.access().await;
        let batch = claim_batch(&mut state, 7, 0);
        for page in 1..=6 {
            state.mark_processed(page);
        }
        batch
    };
    assert_eq!(store.access().await.highest_page_seen(), 7);

    let task = batch.pop().unwrap();
    assert_eq!(task.page_number, 7);

    let outcome = crawler.process_task(&reqwest::Client::new(), task).await;
    assert_eq!(outcome, TaskOutcome::EndOfCatalog { triggered: true });

    let mut state = store.access().await;
    assert!(state.no_more_pages());
    let next = claim_batch(&mut state, 7, 1);
    assert!(next.is_empty());
    assert!(should_exit(&state, &next));
}

#[tokio::test]
async fn test_failed_page_is_retried_then_dropped() {
    let server = MockServer::start().await;
    let dir = tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/catalog/abc/"))
        .and(query_param("volumes", "page-1"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let config = create_test_config(&server.uri(), dir.path());
    let store = store_for(Request::catalog("abc"), dir.path());
    let crawler = CatalogCrawler::new(
        &config,
        Arc::clone(&store),
        client_pool(&config),
        CancellationToken::new(),
    )
    .unwrap();
    let client = reqwest::Client::new();

    let task = claim_batch(&mut *store.access().await, 1, 0).remove(0);
    let outcome = crawler.process_task(&client, task).await;
    assert_eq!(outcome, TaskOutcome::Retrying { attempt: 1 });
    assert_eq!(store.access().await.retry_pages(), vec![1]);

    let task = claim_batch(&mut *store.access().await, 1, 0).remove(0);
    assert_eq!(task.last_error.as_deref(), Some("HTTP 503"));
    let outcome = crawler.process_task(&client, task).await;
    assert_eq!(outcome, TaskOutcome::Retrying { attempt: 2 });

    let task = claim_batch(&mut *store.access().await, 1, 0).remove(0);
    let outcome = crawler.process_task(&client, task).await;
    assert_eq!(outcome, TaskOutcome::Dropped { attempts: 3 });

    let state = store.access().await;
    assert_eq!(state.retry_queue_len(), 0);
    // The page stays a gap for the next run
    assert!(!state.is_processed(1));
    assert!(state.dropped_pages().contains(&1));
}

#[tokio::test]
async fn test_processed_page_is_not_fetched_again() {
    let server = MockServer::start().await;
    let dir = tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/catalog/abc/"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(listing_page(&["x"]), "text/html"))
        .expect(1)
        .mount(&server)
        .await;

    let config = create_test_config(&server.uri(), dir.path());
    let store = store_for(Request::catalog("abc"), dir.path());
    let crawler = CatalogCrawler::new(
        &config,
        Arc::clone(&store),
        client_pool(&config),
        CancellationToken::new(),
    )
    .unwrap();
    let client = reqwest::Client::new();

    // Two workers ended up holding the same page number
    let first = claim_batch(&mut *store.access().await, 1, 0).remove(0);
    let mut duplicate = first.clone();
    duplicate.worker_id = Some(1);

    let outcome = crawler.process_task(&client, first).await;
    assert_eq!(outcome, TaskOutcome::Processed { found: 1, added: 1 });

    let outcome = crawler.process_task(&client, duplicate).await;
    assert_eq!(outcome, TaskOutcome::Skipped);
    assert_eq!(store.access().await.pending_downloads(), 1);
}

/// Runs a crawler pool to completion, failing the test if it hangs
async fn crawl_to_end(crawler: CatalogCrawler) {
    tokio::time::timeout(Duration::from_secs(30), Arc::new(crawler).run())
        .await
        .expect("crawl did not terminate")
        .unwrap();
}

/// Every page up to the highest one is either processed or dropped
fn assert_all_pages_settled(state: &neb_harvest::CrawlState) {
    for page in 1..=state.highest_page_seen() {
        assert!(
            state.is_processed(page) || state.dropped_pages().contains(&page),
            "page {} was neither processed nor dropped",
            page
        );
    }
}

#[tokio::test]
async fn test_permanently_failing_page_does_not_block_termination() {
    let server = MockServer::start().await;
    let dir = tempdir().unwrap();

    mount_catalog_page(&server, "abc", 1, &["a"]).await;
    Mock::given(method("GET"))
        .and(path("/catalog/abc/"))
        .and(query_param("volumes", "page-2"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;
    mount_catalog_page(&server, "abc", 3, &["b"]).await;
    mount_empty_catalog(&server, "abc").await;

    let mut config = create_test_config(&server.uri(), dir.path());
    config.harvest.parser_workers = 3;
    config.harvest.chunk_size = 3;
    config.harvest.page_retries = 2;

    let store = store_for(Request::catalog("abc"), dir.path());
    let crawler = CatalogCrawler::new(
        &config,
        Arc::clone(&store),
        client_pool(&config),
        CancellationToken::new(),
    )
    .unwrap();

    crawl_to_end(crawler).await;

    let state = store.access().await;
    assert!(state.no_more_pages());
    assert_eq!(state.retry_queue_len(), 0);
    assert!(!state.is_processed(2));
    assert_eq!(state.dropped_pages().iter().copied().collect::<Vec<_>>(), vec![2]);
    assert_all_pages_settled(&state);
    assert_eq!(state.pending_downloads(), 2);
    assert!(state.check_invariants().is_ok());
}

#[tokio::test]
async fn test_retried_and_dropped_pages_settle_before_termination() {
    let server = MockServer::start().await;
    let dir = tempdir().unwrap();

    mount_catalog_page(&server, "abc", 1, &["p1"]).await;

    // Page 2 recovers on its third attempt
    Mock::given(method("GET"))
        .and(path("/catalog/abc/"))
        .and(query_param("volumes", "page-2"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    mount_catalog_page(&server, "abc", 2, &["p2"]).await;

    mount_catalog_page(&server, "abc", 3, &["p3"]).await;

    // Page 4 never recovers
    Mock::given(method("GET"))
        .and(path("/catalog/abc/"))
        .and(query_param("volumes", "page-4"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    mount_catalog_page(&server, "abc", 5, &["p5"]).await;
    mount_empty_catalog(&server, "abc").await;

    let mut config = create_test_config(&server.uri(), dir.path());
    config.harvest.parser_workers = 3;
    config.harvest.chunk_size = 2;
    config.harvest.page_retries = 3;

    let store = store_for(Request::catalog("abc"), dir.path());
    let crawler = CatalogCrawler::new(
        &config,
        Arc::clone(&store),
        client_pool(&config),
        CancellationToken::new(),
    )
    .unwrap();

    crawl_to_end(crawler).await;

    let state = store.access().await;
    assert!(state.no_more_pages());
    assert_eq!(state.retry_queue_len(), 0);
    assert!(state.is_processed(2));
    assert!(state.is_pending("p2"));
    assert!(!state.is_processed(4));
    assert_eq!(state.dropped_pages().iter().copied().collect::<Vec<_>>(), vec![4]);
    assert_all_pages_settled(&state);
    for id in ["p1", "p2", "p3", "p5"] {
        assert!(state.is_pending(id), "{} was not discovered", id);
    }
    assert!(state.check_invariants().is_ok());
}
