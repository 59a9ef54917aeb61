//! Integration tests for the downloader pool

use crate::common::{client_pool, create_test_config, mount_pdf, PDF_BODY};
use neb_harvest::config::Config;
use neb_harvest::crawler::{Downloader, ItemResult};
use neb_harvest::state::{Request, StateStore};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const DOWNLOAD_PATH: &str = "/local/tools/exalead/getFiles.php";

fn setup(config: &Config, dir: &Path, cancel: CancellationToken) -> (Arc<StateStore>, Arc<Downloader>) {
    let store = Arc::new(StateStore::new(
        Request::catalog("abc"),
        dir.join("progress.json"),
        Duration::ZERO,
    ));
    let downloader = Downloader::new(
        config,
        dir.join("downloads"),
        Arc::clone(&store),
        client_pool(config),
        cancel,
    )
    .unwrap();
    (store, Arc::new(downloader))
}

#[tokio::test]
async fn test_filename_from_content_disposition() {
    let server = MockServer::start().await;
    let dir = tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path(DOWNLOAD_PATH))
        .and(query_param("book_id", "id-1"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Disposition", r#"attachment; filename="gazeta_1911""#)
                .set_body_raw(PDF_BODY, "application/pdf"),
        )
        .mount(&server)
        .await;

    let config = create_test_config(&server.uri(), dir.path());
    let (_store, downloader) = setup(&config, dir.path(), CancellationToken::new());

    match downloader
        .download_with_retries(&reqwest::Client::new(), "id-1")
        .await
    {
        ItemResult::Saved { path, bytes } => {
            assert_eq!(path, dir.path().join("downloads").join("gazeta_1911.pdf"));
            assert_eq!(bytes, PDF_BODY.len() as u64);
            assert_eq!(std::fs::read(&path).unwrap(), PDF_BODY);
            // The temporary file was renamed into place
            assert!(!dir.path().join("downloads").join("gazeta_1911.pdf.part").exists());
        }
        other => panic!("expected Saved, got {:?}", other),
    }
}

#[tokio::test]
async fn test_wrong_content_type_is_not_retried() {
    let server = MockServer::start().await;
    let dir = tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path(DOWNLOAD_PATH))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw("<html>captcha</html>", "text/html"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let config = create_test_config(&server.uri(), dir.path());
    let (_store, downloader) = setup(&config, dir.path(), CancellationToken::new());

    let result = downloader
        .download_with_retries(&reqwest::Client::new(), "id-1")
        .await;
    assert!(matches!(result, ItemResult::Failed { reason } if reason.contains("text/html")));
}

#[tokio::test]
async fn test_server_errors_requeue_then_park() {
    let server = MockServer::start().await;
    let dir = tempdir().unwrap();

    // 3 attempts per pass, 2 passes
    Mock::given(method("GET"))
        .and(path(DOWNLOAD_PATH))
        .and(query_param("book_id", "broken"))
        .respond_with(ResponseTemplate::new(503))
        .expect(6)
        .mount(&server)
        .await;
    mount_pdf(&server, "fine").await;

    let mut config = create_test_config(&server.uri(), dir.path());
    config.harvest.download_retries = 3;
    config.harvest.download_passes = 2;
    let (store, downloader) = setup(&config, dir.path(), CancellationToken::new());

    {
        let mut state = store.access().await;
        state.enqueue_download("broken");
        state.enqueue_download("fine");
        state.set_crawl_finished();
    }

    tokio::time::timeout(Duration::from_secs(30), downloader.run())
        .await
        .expect("downloader did not terminate")
        .unwrap();

    let state = store.access().await;
    assert!(state.is_downloaded("fine"));
    assert!(!state.is_downloaded("broken"));
    assert!(state.is_pending("broken"));
    assert_eq!(state.parked_downloads(), &["broken".to_string()][..]);
    assert_eq!(state.snapshot().download_queue, vec!["broken".to_string()]);
    assert!(state.check_invariants().is_ok());
}

#[tokio::test]
async fn test_downloader_waits_for_the_crawler() {
    let server = MockServer::start().await;
    let dir = tempdir().unwrap();
    mount_pdf(&server, "late").await;

    let config = create_test_config(&server.uri(), dir.path());
    let (store, downloader) = setup(&config, dir.path(), CancellationToken::new());

    let handle = tokio::spawn(Arc::clone(&downloader).run());

    // An empty queue alone must not end the pool
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!handle.is_finished());

    store.access().await.record_page_items(1, &["late".to_string()]);
    tokio::time::sleep(Duration::from_millis(50)).await;
    store.access().await.set_crawl_finished();

    tokio::time::timeout(Duration::from_secs(30), handle)
        .await
        .expect("downloader did not terminate")
        .unwrap()
        .unwrap();

    assert!(store.access().await.is_downloaded("late"));
    assert!(dir.path().join("downloads").join("late.pdf").exists());
}

#[tokio::test]
async fn test_cancellation_returns_item_to_queue() {
    let server = MockServer::start().await;
    let dir = tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path(DOWNLOAD_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(PDF_BODY, "application/pdf")
                .set_delay(Duration::from_secs(30)),
        )
        .mount(&server)
        .await;

    let config = create_test_config(&server.uri(), dir.path());
    let cancel = CancellationToken::new();
    let (store, downloader) = setup(&config, dir.path(), cancel.clone());
    store.access().await.enqueue_download("slow");

    let handle = tokio::spawn(Arc::clone(&downloader).run());
    tokio::time::sleep(Duration::from_millis(200)).await;
    cancel.cancel();

    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("downloader ignored cancellation")
        .unwrap()
        .unwrap();

    let state = store.access().await;
    assert!(!state.is_downloaded("slow"));
    assert_eq!(state.download_queue().collect::<Vec<_>>(), vec!["slow"]);
}

#[tokio::test]
async fn test_same_header_filename_keeps_both_documents() {
    let server = MockServer::start().await;
    let dir = tempdir().unwrap();

    for (id, body) in [("id-1", &b"%PDF-1.4 first"[..]), ("id-2", &b"%PDF-1.4 second"[..])] {
        Mock::given(method("GET"))
            .and(path(DOWNLOAD_PATH))
            .and(query_param("book_id", id))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Disposition", r#"attachment; filename="issue.pdf""#)
                    .set_body_raw(body, "application/pdf"),
            )
            .mount(&server)
            .await;
    }

    let config = create_test_config(&server.uri(), dir.path());
    let (_store, downloader) = setup(&config, dir.path(), CancellationToken::new());
    let client = reqwest::Client::new();

    let first = downloader.download_with_retries(&client, "id-1").await;
    let second = downloader.download_with_retries(&client, "id-2").await;
    assert!(matches!(first, ItemResult::Saved { .. }));
    assert!(matches!(second, ItemResult::Saved { .. }));

    let downloads = dir.path().join("downloads");
    assert_eq!(std::fs::read(downloads.join("issue.pdf")).unwrap(), b"%PDF-1.4 first");
    assert_eq!(
        std::fs::read(downloads.join("issue_id-2.pdf")).unwrap(),
        b"%PDF-1.4 second"
    );
}
